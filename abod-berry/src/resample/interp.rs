//! 可分离的单轴插值.
//!
//! 三线性 (或双线性) 插值等价于沿各轴依次做一维线性插值, 最近邻亦然.
//! 因此所有重采样都拆成若干次 [`resize_axis`] 调用, 每次只改变一个轴的长度.
//!
//! 两种网格约定:
//!
//! 1. [`GridAlign::Origin`]: 图像库约定. 新旧网格共享原点 (首个体素中心),
//!   输出体素 `j` 采样源连续索引 `j * n_in / n_out`. 连续索引落在
//!   `[-0.5, n_in - 0.5)` 之外的体素取默认值 0.
//! 2. [`GridAlign::HalfPixel`]: 张量库 `align_corners = false` 约定.
//!   线性采样源索引 `max((j + 0.5) * n_in / n_out - 0.5, 0)`,
//!   最近邻采样 `floor(j * n_in / n_out)`. 均不会越界.

use ndarray::{Array3, ArrayView3, Axis, Zip};
use num::Float;

/// 插值核.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Interp {
    /// 线性.
    Linear,

    /// 最近邻.
    Nearest,
}

/// 输出网格与源网格的对齐约定.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum GridAlign {
    /// 共享原点. 用于物理分辨率变换.
    Origin,

    /// 半像素中心对齐. 用于按目标形状缩放.
    HalfPixel,
}

/// 单个输出体素的采样方式: `(1 - frac) * src[lo] + frac * src[hi]`.
#[derive(Copy, Clone, Debug, PartialEq)]
struct Tap {
    lo: usize,
    hi: usize,
    frac: f64,
}

/// 预先计算长度为 `n_out` 的输出轴上每个体素的采样方式. `None` 代表越界.
fn plan(n_in: usize, n_out: usize, interp: Interp, align: GridAlign) -> Vec<Option<Tap>> {
    debug_assert!(n_in > 0);
    let last = n_in - 1;
    let scale = n_in as f64 / n_out as f64;

    (0..n_out)
        .map(|j| {
            let j = j as f64;
            match (align, interp) {
                (GridAlign::Origin, _) => {
                    let c = j * scale;
                    if c < -0.5 || c >= n_in as f64 - 0.5 {
                        return None;
                    }
                    Some(match interp {
                        Interp::Linear => {
                            let base = c.floor();
                            let lo = (base.max(0.0) as usize).min(last);
                            let hi = (lo + 1).min(last);
                            Tap {
                                lo,
                                hi,
                                frac: c - base,
                            }
                        }
                        Interp::Nearest => {
                            // round half up
                            let i = ((c + 0.5).floor().max(0.0) as usize).min(last);
                            Tap {
                                lo: i,
                                hi: i,
                                frac: 0.0,
                            }
                        }
                    })
                }
                (GridAlign::HalfPixel, Interp::Linear) => {
                    let c = ((j + 0.5) * scale - 0.5).max(0.0);
                    let lo = (c.floor() as usize).min(last);
                    let hi = (lo + 1).min(last);
                    Some(Tap {
                        lo,
                        hi,
                        frac: c - lo as f64,
                    })
                }
                (GridAlign::HalfPixel, Interp::Nearest) => {
                    let i = ((j * scale).floor() as usize).min(last);
                    Some(Tap {
                        lo: i,
                        hi: i,
                        frac: 0.0,
                    })
                }
            }
        })
        .collect()
}

/// 输出形状: `src` 的形状, 但 `axis` 轴长度替换为 `len`.
#[inline]
fn out_shape<T>(src: &ArrayView3<T>, axis: Axis, len: usize) -> (usize, usize, usize) {
    let mut shape = src.dim();
    match axis.index() {
        0 => shape.0 = len,
        1 => shape.1 = len,
        2 => shape.2 = len,
        _ => unreachable!("只有 3 个轴"),
    }
    shape
}

/// 沿 `axis` 轴将 `src` 重采样到长度 `len`, 其他轴保持不变.
///
/// 若 `len` 与原长度相同且 `align` 为 [`GridAlign::Origin`] 或插值为最近邻,
/// 结果与输入逐元素相同.
///
/// `src` 在 `axis` 轴上长度为 0 时 panic.
pub fn resize_axis<T>(
    src: ArrayView3<T>,
    axis: Axis,
    len: usize,
    interp: Interp,
    align: GridAlign,
) -> Array3<T>
where
    T: Float + Send + Sync,
{
    let n_in = src.len_of(axis);
    assert!(n_in > 0, "沿空轴无法插值");
    let taps = plan(n_in, len, interp, align);
    let mut out = Array3::<T>::zeros(out_shape(&src, axis, len));

    let kernel = |mut dst: ndarray::ArrayViewMut1<T>, s: ndarray::ArrayView1<T>| {
        for (d, tap) in dst.iter_mut().zip(taps.iter()) {
            *d = match tap {
                None => T::zero(),
                Some(Tap { lo, hi, frac }) if *frac == 0.0 || lo == hi => s[*lo],
                Some(Tap { lo, hi, frac }) => {
                    // `frac` 在 [0, 1) 内, 转换不会失败.
                    let w = <T as num::NumCast>::from(*frac).unwrap_or_else(T::zero);
                    s[*lo] * (T::one() - w) + s[*hi] * w
                }
            };
        }
    };

    let zip = Zip::from(out.lanes_mut(axis)).and(src.lanes(axis));
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            zip.par_for_each(kernel);
        } else {
            zip.for_each(kernel);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    fn f32_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    fn line(v: &[f32]) -> Array3<f32> {
        Array3::from_shape_vec((1, 1, v.len()), v.to_vec()).unwrap()
    }

    #[test]
    fn test_same_length_is_identity() {
        let src = Array3::from_shape_fn((3, 4, 5), |(z, y, x)| (z * 20 + y * 5 + x) as f32);
        for axis in 0..3 {
            let n = src.len_of(Axis(axis));
            for interp in [Interp::Linear, Interp::Nearest] {
                let out = resize_axis(src.view(), Axis(axis), n, interp, GridAlign::Origin);
                assert_eq!(out, src);
            }
            let out = resize_axis(src.view(), Axis(axis), n, Interp::Linear, GridAlign::HalfPixel);
            assert_eq!(out, src);
        }
    }

    #[test]
    fn test_origin_linear_downsample() {
        // n_in = 4, n_out = 2: 采样位置 0, 2.
        let out = resize_axis(
            line(&[0.0, 1.0, 2.0, 3.0]).view(),
            Axis(2),
            2,
            Interp::Linear,
            GridAlign::Origin,
        );
        assert_eq!(out.into_raw_vec(), vec![0.0, 2.0]);
    }

    #[test]
    fn test_origin_linear_upsample_out_of_buffer() {
        // n_in = 2, n_out = 5: 采样位置 0, 0.4, 0.8, 1.2, 1.6.
        // 1.6 >= 1.5 越界, 取默认值 0.
        let out = resize_axis(
            line(&[10.0, 20.0]).view(),
            Axis(2),
            5,
            Interp::Linear,
            GridAlign::Origin,
        );
        let v = out.into_raw_vec();
        assert!(f32_eq(v[0], 10.0));
        assert!(f32_eq(v[1], 14.0));
        assert!(f32_eq(v[2], 18.0));
        // 1.2: 上邻居被夹到最后一个体素.
        assert!(f32_eq(v[3], 20.0));
        assert!(f32_eq(v[4], 0.0));
    }

    #[test]
    fn test_origin_nearest_round_half_up() {
        // n_in = 3, n_out = 2: 采样位置 0, 1.5 -> 2.
        let out = resize_axis(
            line(&[1.0, 2.0, 3.0]).view(),
            Axis(2),
            2,
            Interp::Nearest,
            GridAlign::Origin,
        );
        assert_eq!(out.into_raw_vec(), vec![1.0, 3.0]);
    }

    #[test]
    fn test_half_pixel_linear_upsample() {
        // n_in = 2, n_out = 4: 采样位置 0 (夹到 0), 0.25, 0.75, 1.25 -> 上邻居夹到 1.
        let out = resize_axis(
            line(&[0.0, 4.0]).view(),
            Axis(2),
            4,
            Interp::Linear,
            GridAlign::HalfPixel,
        );
        let v = out.into_raw_vec();
        assert!(f32_eq(v[0], 0.0));
        assert!(f32_eq(v[1], 1.0));
        assert!(f32_eq(v[2], 3.0));
        assert!(f32_eq(v[3], 4.0));
    }

    #[test]
    fn test_half_pixel_nearest() {
        // n_in = 3, n_out = 5: floor(j * 0.6) = 0, 0, 1, 1, 2.
        let out = resize_axis(
            array![[[1.0f32, 2.0, 3.0]]].view(),
            Axis(2),
            5,
            Interp::Nearest,
            GridAlign::HalfPixel,
        );
        assert_eq!(out.into_raw_vec(), vec![1.0, 1.0, 2.0, 2.0, 3.0]);
    }

    #[test]
    fn test_resize_other_axes_untouched() {
        let src = Array3::from_shape_fn((2, 3, 4), |(z, y, x)| (z * 100 + y * 10 + x) as f32);
        let out = resize_axis(src.view(), Axis(0), 4, Interp::Nearest, GridAlign::HalfPixel);
        assert_eq!(out.dim(), (4, 3, 4));
        for ((z, y, x), v) in out.indexed_iter() {
            assert_eq!(*v, src[(z / 2, y, x)]);
        }
    }
}
