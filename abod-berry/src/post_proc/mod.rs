//! 后处理: 概率体积 -> 原始几何下的器官标签图.

use log::debug;
use ndarray::{Array3, ArrayView4, ArrayViewMut3, Axis};

use crate::config::{LateralRemap, SegConfig};
use crate::data::{CtLabel, CtScan, NiftiHeaderAttr};
use crate::error::SegResult;
use crate::resample::{resample_to_reference, to_native_geometry};
use crate::tensor::{ProbElem, ProbVolume};

/// 沿通道轴求最大值下标. `prob` 按 `[通道, z, y, x]` 组织.
///
/// 多个通道并列最大时取下标最小者. NaN 不会胜出.
///
/// 通道数超过 256 时 panic.
pub fn argmax_channels<T: ProbElem>(prob: ArrayView4<T>) -> Array3<u8> {
    assert!(prob.len_of(Axis(0)) <= u8::MAX as usize + 1, "通道过多");
    prob.map_axis(Axis(0), |lane| {
        let mut best = 0usize;
        let mut best_v = f32::NEG_INFINITY;
        for (c, v) in lane.iter().map(|v| v.to_f32()).enumerate() {
            if v > best_v {
                best = c;
                best_v = v;
            }
        }
        best as u8
    })
}

/// 左右对称器官重标记.
///
/// 在最后一个轴的中点 `w / 2` 处将标签图一分为二, 前半部分 `[0, w / 2)` 应用
/// `remap.first`, 后半部分应用 `remap.second`. 返回被修改的体素个数.
pub fn remap_lateral(labels: ArrayViewMut3<u8>, remap: &LateralRemap) -> usize {
    let mid = labels.len_of(Axis(2)) / 2;
    let (first, second) = labels.split_at(Axis(2), mid);
    replace_in(first, remap.first) + replace_in(second, remap.second)
}

fn replace_in(mut part: ArrayViewMut3<u8>, (old, new): (u8, u8)) -> usize {
    if old == new {
        return 0;
    }
    let mut cnt = 0;
    part.iter_mut().filter(|p| **p == old).for_each(|p| {
        *p = new;
        cnt += 1;
    });
    cnt
}

/// 将网络分辨率下的概率体积转换为 `reference` 几何下的标签图.
///
/// 1. 逐通道缩放到原始扫描形状 (`separate_z` 须与正向重采样一致).
/// 2. 沿通道取 argmax.
/// 3. 左右对称器官重标记.
/// 4. 复制参考扫描的几何信息, 并最近邻重采样到参考网格.
pub fn finalize<T: ProbElem>(
    prob: ProbVolume<T>,
    reference: &CtScan,
    separate_z: bool,
    config: &SegConfig,
) -> SegResult<CtLabel> {
    let geometry = reference.geometry();
    let native = to_native_geometry(prob, geometry.shape(), separate_z, config.precision)?;
    let mut labels = argmax_channels(native.view());
    drop(native);

    let changed = remap_lateral(labels.view_mut(), &config.lateral);
    debug!("lateral remap changed {changed} voxels");

    let label = CtLabel::with_header(reference.header(), labels);
    let data = resample_to_reference(label.data(), &label.geometry(), &geometry)?;
    Ok(CtLabel::with_header(reference.header(), data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Precision;
    use crate::consts::label::{LATERAL_A, LATERAL_B};
    use half::f16;
    use ndarray::{array, s, Array3, Array4, ArrayView3};

    fn x_range(labels: &Array3<u8>, start: usize, end: usize) -> ArrayView3<'_, u8> {
        labels.slice(s![.., .., start..end])
    }

    #[test]
    fn test_argmax_tie_breaks_to_lowest() {
        // 3 个通道, 形状 (1, 1, 2).
        let prob = Array4::from_shape_vec((3, 1, 1, 2), vec![0.2f32, 0.5, 0.7, 0.5, 0.7, 0.1])
            .unwrap();
        let labels = argmax_channels(prob.view());
        assert_eq!(labels, array![[[1u8, 0]]]);
        assert_eq!(argmax_channels(prob.mapv(f16::from_f32).view()), labels);

        let zeros = Array4::<f32>::zeros((17, 2, 2, 2));
        assert!(argmax_channels(zeros.view()).iter().all(|v| *v == 0));

        let mut nan = Array4::<f32>::zeros((2, 1, 1, 1));
        nan[(0, 0, 0, 0)] = f32::NAN;
        assert_eq!(argmax_channels(nan.view())[(0, 0, 0)], 1);
    }

    #[test]
    fn test_remap_lateral_sides() {
        for w in [1usize, 4, 7] {
            let mut labels =
                Array3::from_shape_fn((2, 3, w), |(z, y, x)| [LATERAL_A, LATERAL_B, 3][(z + y + x) % 3]);
            let before = labels.clone();
            remap_lateral(labels.view_mut(), &LateralRemap::default());

            let mid = w / 2;
            assert!(x_range(&labels, 0, mid).iter().all(|v| *v != LATERAL_A));
            assert!(x_range(&labels, mid, w).iter().all(|v| *v != LATERAL_B));
            // 其他标签不受影响.
            for (a, b) in before.iter().zip(labels.iter()) {
                if *a == 3 {
                    assert_eq!(*b, 3);
                }
            }
        }
    }

    #[test]
    fn test_remap_count() {
        let mut labels = array![[[15u8, 16, 15, 16]]];
        let n = remap_lateral(labels.view_mut(), &LateralRemap::default());
        assert_eq!(n, 2);
        assert_eq!(labels, array![[[16u8, 16, 15, 15]]]);
    }

    #[test]
    fn test_finalize_to_native_grid() {
        let reference = CtScan::from_array(Array3::zeros((4, 6, 6)), [0.8, 0.8, 5.0]);
        let config = SegConfig {
            precision: Precision::Half,
            ..SegConfig::default()
        };

        let mut prob = Array4::<f32>::zeros((17, 2, 3, 3));
        prob.index_axis_mut(Axis(0), 2).fill(0.9);
        prob.index_axis_mut(Axis(0), LATERAL_A as usize).fill(0.5);
        // 仅 x = 0 的网络体素更像对称器官. 缩放后只有原始 x = 0 仍然胜出.
        prob.slice_mut(s![LATERAL_A as usize, .., .., ..1]).fill(1.0);

        let label = finalize(prob, &reference, true, &config).unwrap();
        assert_eq!(label.shape(), (4, 6, 6));
        assert_eq!(label.geometry(), reference.geometry());

        let data = label.data();
        for ((_, _, x), v) in data.indexed_iter() {
            if x == 0 {
                // 位于前半部分, 15 -> 16.
                assert_eq!(*v, LATERAL_B);
            } else {
                assert_eq!(*v, 2);
            }
        }
    }

    #[test]
    fn test_finalize_half_storage() {
        let reference = CtScan::from_array(Array3::zeros((4, 6, 6)), [0.8, 0.8, 5.0]);
        let config = SegConfig {
            precision: Precision::Half,
            ..SegConfig::default()
        };

        let mut prob = Array4::<f32>::zeros((17, 2, 3, 3));
        prob.index_axis_mut(Axis(0), 2).fill(0.9);
        prob.index_axis_mut(Axis(0), LATERAL_A as usize).fill(0.5);
        prob.slice_mut(s![LATERAL_A as usize, .., .., ..1]).fill(1.0);

        // f16 存储与 f32 存储得到相同标签.
        let wide = finalize(prob.clone(), &reference, true, &config).unwrap();
        let narrow = finalize(prob.mapv(f16::from_f32), &reference, true, &config).unwrap();
        assert_eq!(narrow.data(), wide.data());
    }

    #[test]
    fn test_finalize_background_only() {
        let reference = CtScan::from_array(Array3::zeros((3, 5, 7)), [1.0, 1.0, 1.0]);
        let prob = Array4::<f32>::zeros((17, 3, 5, 7));
        let label = finalize(prob, &reference, false, &SegConfig::default()).unwrap();
        assert_eq!(label.count(0), 3 * 5 * 7);
    }
}
