//! 体素分辨率变换.
//!
//! 正向: 原始扫描 -> 网络分辨率 (图像库约定, 共享原点).
//! 反向: 网络分辨率下的概率体积 -> 原始扫描形状 (张量库约定, 按目标形状缩放).
//!
//! 层间距过大 (厚层扫描) 时, 先在每个水平切片内做线性插值,
//! 再沿 z 方向做最近邻插值, 避免在稀疏的厚层之间引入模糊.

use log::debug;
use ndarray::{Array3, ArrayView3, Axis, Zip};

use crate::config::{Precision, SegConfig};
use crate::data::{reverse3, Geometry};
use crate::error::{SegError, SegResult};
use crate::tensor::{try_zeros4, ProbElem, ProbVolume};

pub mod interp;

use interp::{resize_axis, GridAlign, Interp};

/// 将 `src_size` 个分辨率为 `src_spacing` 的体素变换到 `dst_spacing` 时的体素个数.
///
/// 四舍六入五成双, 最小为 1.
#[inline]
pub fn target_size(src_size: usize, src_spacing: f64, dst_spacing: f64) -> usize {
    let n = (src_size as f64 * src_spacing / dst_spacing).round_ties_even();
    (n.max(1.0)) as usize
}

/// 由取整后的体素个数反推实际分辨率, 使物理覆盖长度保持不变.
#[inline]
pub fn realized_spacing(src_size: usize, src_spacing: f64, dst_size: usize) -> f64 {
    src_size as f64 / dst_size as f64 * src_spacing
}

/// 是否需要分离 z 方向. `spacing_xyz` 按物理轴序排列, 判断其最后一个分量 (层间距).
#[inline]
pub fn needs_separate_z(spacing_xyz: [f64; 3], threshold: f64) -> bool {
    spacing_xyz[2] > threshold
}

/// 正向重采样结果.
#[derive(Debug, Clone)]
pub struct Resampled {
    /// `[z, y, x]` 组织的数据.
    pub data: Array3<f32>,

    /// 重采样后的几何信息. 原点和方向与输入一致, 分辨率为实际分辨率.
    pub geometry: Geometry,

    /// 是否走了分离 z 方向的分支. 反向重采样需要走相同的分支.
    pub separate_z: bool,
}

/// 将 `volume` (几何信息为 `geometry`) 变换到网络分辨率.
///
/// 目标体素个数为 `round(n * spacing / canonical)`, 实际分辨率由取整后的个数反推.
/// 插值结果保持 `f32`, 不转换回源文件的像素类型 (如 `int16`).
pub fn to_canonical_spacing(
    volume: ArrayView3<f32>,
    geometry: &Geometry,
    config: &SegConfig,
) -> Resampled {
    let [z, y, x] = geometry.shape();
    assert_eq!(volume.dim(), (z, y, x), "数据形状与几何信息不一致");

    let target = config.canonical_spacing_xyz();
    let separate_z = needs_separate_z(geometry.spacing, config.anisotropy_threshold)
        || needs_separate_z(target, config.anisotropy_threshold);

    let mut size = [0usize; 3];
    let mut spacing = [0.0f64; 3];
    for i in 0..3 {
        size[i] = target_size(geometry.size[i], geometry.spacing[i], target[i]);
        spacing[i] = realized_spacing(geometry.size[i], geometry.spacing[i], size[i]);
    }
    let [nz, ny, nx] = reverse3(size);
    debug!(
        "resample {:?} -> {:?} (zyx), separate z: {separate_z}",
        geometry.shape(),
        [nz, ny, nx]
    );

    let planar = resize_axis(volume, Axis(2), nx, Interp::Linear, GridAlign::Origin);
    let planar = resize_axis(planar.view(), Axis(1), ny, Interp::Linear, GridAlign::Origin);
    let z_interp = if separate_z {
        Interp::Nearest
    } else {
        Interp::Linear
    };
    let data = resize_axis(planar.view(), Axis(0), nz, z_interp, GridAlign::Origin);

    Resampled {
        data,
        geometry: geometry.resized(size, spacing),
        separate_z,
    }
}

/// 将网络分辨率下的概率体积逐通道缩放到原始扫描形状 `native_shape` (`[z, y, x]`).
///
/// `separate_z` 为真时, 平面内双线性 + z 方向最近邻; 否则三线性.
/// 逐通道处理以限制峰值内存. 插值在 `f32` 下进行, 结果舍入到 `precision` 后以 `T` 存储.
pub fn to_native_geometry<T: ProbElem>(
    prob: ProbVolume<T>,
    native_shape: [usize; 3],
    separate_z: bool,
    precision: Precision,
) -> SegResult<ProbVolume<T>> {
    let channels = prob.len_of(Axis(0));
    let [nz, ny, nx] = native_shape;
    let mut out = try_zeros4([channels, nz, ny, nx], "native probability volume")?;

    let z_interp = if separate_z {
        Interp::Nearest
    } else {
        Interp::Linear
    };
    for (src, mut dst) in prob.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
        let src = src.mapv(T::to_f32);
        let t = resize_axis(src.view(), Axis(1), ny, Interp::Linear, GridAlign::HalfPixel);
        let t = resize_axis(t.view(), Axis(2), nx, Interp::Linear, GridAlign::HalfPixel);
        let t = resize_axis(t.view(), Axis(0), nz, z_interp, GridAlign::HalfPixel);
        Zip::from(&mut dst)
            .and(&t)
            .for_each(|d, &v| *d = T::from_f32(precision.round(v)));
    }
    Ok(out)
}

/// 将标签图 (几何信息为 `src`) 最近邻重采样到参考网格 `reference` 上.
///
/// 两者网格重合时直接复制. 参考网格中落在源图像之外的体素为背景.
pub fn resample_to_reference(
    label: ArrayView3<u8>,
    src: &Geometry,
    reference: &Geometry,
) -> SegResult<Array3<u8>> {
    if src.same_grid(reference, 1e-6) {
        return Ok(label.to_owned());
    }

    let degenerate = || {
        SegError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "degenerate direction matrix",
        ))
    };
    // 提前检查, 避免在逐体素循环中处理错误.
    src.physical_to_index(src.origin).ok_or_else(degenerate)?;

    let [rz, ry, rx] = reference.shape();
    let bounds = src.size;
    let mut out = Array3::<u8>::zeros((rz, ry, rx));
    for ((z, y, x), v) in out.indexed_iter_mut() {
        let p = reference.index_to_physical([z, y, x]);
        let Some(c) = src.physical_to_index(p) else {
            continue;
        };
        let mut idx = [0usize; 3];
        let mut inside = true;
        for a in 0..3 {
            if c[a] < -0.5 || c[a] >= bounds[a] as f64 - 0.5 {
                inside = false;
                break;
            }
            idx[a] = ((c[a] + 0.5).floor().max(0.0) as usize).min(bounds[a] - 1);
        }
        if inside {
            let [ix, iy, iz] = idx;
            *v = label[(iz, iy, ix)];
        }
    }
    Ok(out)
}
