//! 体素网格的物理几何信息.
//!
//! 物理空间接口 (nifti header, 本模块的 [`Geometry`]) 按 `[x, y, z]` 排列轴,
//! 数组索引空间 (`Array3`) 按 `[z, y, x]` 排列轴. 两者之间的转换统一经由
//! [`reverse3`] 完成.

use nifti::NiftiHeader;

/// 反转三元组的轴序. `[x, y, z] <-> [z, y, x]`.
#[inline]
pub fn reverse3<T: Copy>([a, b, c]: [T; 3]) -> [T; 3] {
    [c, b, a]
}

/// 单位方向矩阵.
pub const IDENTITY_DIRECTION: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// 体素网格的几何信息. 所有三元组按物理轴序 `[x, y, z]` 存储.
///
/// 方向矩阵的第 `j` 列是第 `j` 个索引轴在物理空间 (nifti 的 RAS+ 约定) 中的单位方向.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Geometry {
    /// 各轴体素个数.
    pub size: [usize; 3],

    /// 各轴体素分辨率 (毫米).
    pub spacing: [f64; 3],

    /// 索引 `(0, 0, 0)` 体素中心的物理坐标.
    pub origin: [f64; 3],

    /// 方向矩阵, 行优先.
    pub direction: [[f64; 3]; 3],
}

impl Geometry {
    /// 以单位方向和零原点构建几何信息.
    pub fn new(size: [usize; 3], spacing: [f64; 3]) -> Self {
        Self {
            size,
            spacing,
            origin: [0.0; 3],
            direction: IDENTITY_DIRECTION,
        }
    }

    /// 从 nifti header 中读取几何信息.
    ///
    /// 优先使用 sform, 其次 qform. 两者都缺失时使用单位方向和零原点.
    pub fn from_header(h: &NiftiHeader) -> Self {
        let [_, x, y, z, ..] = h.dim;
        let size = [x as usize, y as usize, z as usize];
        let [_, sx, sy, sz, ..] = h.pixdim;
        let spacing = [sx.abs() as f64, sy.abs() as f64, sz.abs() as f64];

        let (origin, direction) = if h.sform_code > 0 {
            let rows = [h.srow_x, h.srow_y, h.srow_z];
            let mut direction = [[0.0; 3]; 3];
            for (r, row) in rows.iter().enumerate() {
                for (c, sp) in spacing.iter().enumerate() {
                    let v = row[c] as f64;
                    direction[r][c] = if *sp > 0.0 { v / sp } else { v };
                }
            }
            let origin = [rows[0][3] as f64, rows[1][3] as f64, rows[2][3] as f64];
            (origin, direction)
        } else if h.qform_code > 0 {
            let origin = [h.quatern_x as f64, h.quatern_y as f64, h.quatern_z as f64];
            let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
            let direction = quaternion_to_direction(
                h.quatern_b as f64,
                h.quatern_c as f64,
                h.quatern_d as f64,
                qfac,
            );
            (origin, direction)
        } else {
            ([0.0; 3], IDENTITY_DIRECTION)
        };

        Self {
            size,
            spacing,
            origin,
            direction,
        }
    }

    /// 按数组索引序 `[z, y, x]` 返回形状.
    #[inline]
    pub fn shape(&self) -> [usize; 3] {
        reverse3(self.size)
    }

    /// 按数组索引序 `[z, y, x]` 返回分辨率.
    #[inline]
    pub fn spacing_zyx(&self) -> [f64; 3] {
        reverse3(self.spacing)
    }

    /// 各物理轴的覆盖长度 (毫米), `size * spacing`.
    #[inline]
    pub fn extent(&self) -> [f64; 3] {
        let mut ans = [0.0; 3];
        for i in 0..3 {
            ans[i] = self.size[i] as f64 * self.spacing[i];
        }
        ans
    }

    /// 体素总数.
    #[inline]
    pub fn len(&self) -> usize {
        self.size.iter().product()
    }

    /// 是否没有体素.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 保持原点和方向不变, 替换网格大小和分辨率 (均为 `[x, y, z]`).
    #[inline]
    pub fn resized(&self, size: [usize; 3], spacing: [f64; 3]) -> Self {
        Self {
            size,
            spacing,
            ..*self
        }
    }

    /// 数组索引 `[z, y, x]` 对应体素中心的物理坐标 `[x, y, z]`.
    pub fn index_to_physical(&self, index_zyx: [usize; 3]) -> [f64; 3] {
        let idx = reverse3(index_zyx);
        let mut ans = self.origin;
        for (r, out) in ans.iter_mut().enumerate() {
            for c in 0..3 {
                *out += self.direction[r][c] * idx[c] as f64 * self.spacing[c];
            }
        }
        ans
    }

    /// 物理坐标 `[x, y, z]` 对应的连续索引 `[x, y, z]`.
    ///
    /// 方向矩阵退化 (或分辨率为 0) 时返回 `None`.
    pub fn physical_to_index(&self, p: [f64; 3]) -> Option<[f64; 3]> {
        let mut m = self.direction;
        for row in m.iter_mut() {
            for (c, v) in row.iter_mut().enumerate() {
                *v *= self.spacing[c];
            }
        }
        let inv = invert3(&m)?;
        let d = [
            p[0] - self.origin[0],
            p[1] - self.origin[1],
            p[2] - self.origin[2],
        ];
        let mut ans = [0.0; 3];
        for (r, out) in ans.iter_mut().enumerate() {
            *out = inv[r][0] * d[0] + inv[r][1] * d[1] + inv[r][2] * d[2];
        }
        Some(ans)
    }

    /// 两个网格是否完全重合.
    pub fn same_grid(&self, other: &Geometry, tol: f64) -> bool {
        fn close(a: &[f64], b: &[f64], tol: f64) -> bool {
            a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tol)
        }
        self.size == other.size
            && close(&self.spacing, &other.spacing, tol)
            && close(&self.origin, &other.origin, tol)
            && self
                .direction
                .iter()
                .zip(other.direction.iter())
                .all(|(a, b)| close(a, b, tol))
    }
}

/// 3x3 矩阵求逆 (伴随矩阵法). 行列式过小时返回 `None`.
fn invert3(m: &[[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let cof = |r0: usize, r1: usize, c0: usize, c1: usize| m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0];
    let c00 = cof(1, 2, 1, 2);
    let c01 = -cof(1, 2, 0, 2);
    let c02 = cof(1, 2, 0, 1);
    let det = m[0][0] * c00 + m[0][1] * c01 + m[0][2] * c02;
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    Some([
        [
            c00 * inv_det,
            -cof(0, 2, 1, 2) * inv_det,
            cof(0, 1, 1, 2) * inv_det,
        ],
        [
            c01 * inv_det,
            cof(0, 2, 0, 2) * inv_det,
            -cof(0, 1, 0, 2) * inv_det,
        ],
        [
            c02 * inv_det,
            -cof(0, 2, 0, 1) * inv_det,
            cof(0, 1, 0, 1) * inv_det,
        ],
    ])
}

/// nifti qform 四元数 `(b, c, d)` 转换为方向矩阵.
fn quaternion_to_direction(b: f64, c: f64, d: f64, qfac: f64) -> [[f64; 3]; 3] {
    let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
    [
        [
            a * a + b * b - c * c - d * d,
            2.0 * (b * c - a * d),
            qfac * 2.0 * (b * d + a * c),
        ],
        [
            2.0 * (b * c + a * d),
            a * a + c * c - b * b - d * d,
            qfac * 2.0 * (c * d - a * b),
        ],
        [
            2.0 * (b * d - a * c),
            2.0 * (c * d + a * b),
            qfac * (a * a + d * d - c * c - b * b),
        ],
    ]
}
