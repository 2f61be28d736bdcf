//! 滑窗推理.
//!
//! 按 [`compute_steps`] 给出的起点依次截取 patch, 交给网络推理,
//! 乘以 [`BlendMask`] 后累加到整幅概率体积中. 重叠区域是各 patch 加权分数之和,
//! 不做平均.

use itertools::iproduct;
use log::{debug, info};
use ndarray::{s, Array3, ArrayView3, ArrayViewMut3, Axis, Zip};

use crate::config::SegConfig;
use crate::error::{SegError, SegResult};
use crate::tensor::{try_zeros4, ProbElem, ProbVolume};

pub mod gaussian;
pub mod model;
pub mod steps;

pub use gaussian::{blend_mask, BlendMask};
pub use model::{PointwiseNet, SegNet};
pub use steps::compute_steps;

/// 对网络分辨率下的 HU 体积 `volume` (`[z, y, x]`) 做滑窗推理.
///
/// 返回 `[通道, z, y, x]` 的概率体积, 通道数为 `config.num_channels()`.
/// 输入先按 `config.window` 截断并标准化. 所有中间结果舍入到 `config.precision`.
/// 累加在 `f32` 下计算, 结果以 `T` 存储; `T` 的精度应与 `config.precision` 一致.
///
/// 无论成功与否, 扫描结束后都会调用一次 [`SegNet::release_cache`].
///
/// # 错误
///
/// 1. patch 在任意轴上大于 `volume`: [`SegError::InvalidGeometry`].
/// 2. 网络推理失败或输出形状不对: [`SegError::Predict`].
/// 3. 概率体积分配失败: [`SegError::ResourceExhaustion`].
///
/// `mask` 形状与 patch 不一致时 panic.
pub fn run_sliding_inference<T: ProbElem, N: SegNet + ?Sized>(
    net: &mut N,
    volume: ArrayView3<f32>,
    config: &SegConfig,
    mask: &BlendMask,
) -> SegResult<ProbVolume<T>> {
    assert_eq!(mask.shape(), config.patch_size, "融合权重与 patch 形状不一致");
    let swept = sweep(net, volume, config, mask);
    net.release_cache();
    swept
}

fn sweep<T: ProbElem, N: SegNet + ?Sized>(
    net: &mut N,
    volume: ArrayView3<f32>,
    config: &SegConfig,
    mask: &BlendMask,
) -> SegResult<ProbVolume<T>> {
    let (z, y, x) = volume.dim();
    let [pz, py, px] = config.patch_size;
    let steps = compute_steps(config.patch_size, [z, y, x], config.overlap)?;
    let channels = config.num_channels();
    let precision = config.precision;

    let input = normalized_input(volume, config);
    let mut prob = try_zeros4([channels, z, y, x], "probability volume")?;
    let weights = mask.view();

    let total: usize = steps.iter().map(Vec::len).product();
    info!("sliding window over {:?}: {total} patches", [z, y, x]);

    for (i, (&sz, &sy, &sx)) in iproduct!(&steps[0], &steps[1], &steps[2]).enumerate() {
        assert!(
            sz + pz <= z && sy + py <= y && sx + px <= x,
            "patch ({sz}, {sy}, {sx}) 越界"
        );
        let patch = input.slice(s![sz..sz + pz, sy..sy + py, sx..sx + px]);
        let scores = net.predict(patch)?;
        if scores.dim() != (channels, pz, py, px) {
            return Err(SegError::Predict(format!(
                "expected output {:?}, got {:?}",
                [channels, pz, py, px],
                scores.shape()
            )));
        }

        let mut region = prob.slice_mut(s![.., sz..sz + pz, sy..sy + py, sx..sx + px]);
        let accumulate = |mut dst: ArrayViewMut3<T>, src: ArrayView3<f32>| {
            Zip::from(&mut dst)
                .and(&src)
                .and(&weights)
                .for_each(|d, &s, &w| {
                    let sum = d.to_f32() + precision.round(precision.round(s) * w);
                    *d = T::from_f32(precision.round(sum));
                });
        };
        let zip = Zip::from(region.axis_iter_mut(Axis(0))).and(scores.axis_iter(Axis(0)));
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                zip.par_for_each(accumulate);
            } else {
                zip.for_each(accumulate);
            }
        }
        debug!("patch {}/{total} at ({sz}, {sy}, {sx})", i + 1);
    }
    Ok(prob)
}

/// 截断, 标准化并舍入到工作精度后的网络输入.
fn normalized_input(volume: ArrayView3<f32>, config: &SegConfig) -> Array3<f32> {
    let precision = config.precision;
    let mut input = config.window.normalize(volume);
    input.mapv_inplace(|v| precision.round(v));
    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Precision;
    use half::f16;
    use ndarray::{Array3, Array4};

    /// 输出常数分数, 并记录调用情况.
    struct CountingNet {
        channels: usize,
        calls: usize,
        released: usize,
        first_patch: Option<Array3<f32>>,
    }

    impl CountingNet {
        fn new(channels: usize) -> Self {
            Self {
                channels,
                calls: 0,
                released: 0,
                first_patch: None,
            }
        }
    }

    impl SegNet for CountingNet {
        fn predict(&mut self, patch: ArrayView3<f32>) -> SegResult<Array4<f32>> {
            self.calls += 1;
            if self.first_patch.is_none() {
                self.first_patch = Some(patch.to_owned());
            }
            let (z, y, x) = patch.dim();
            Ok(Array4::from_shape_fn((self.channels, z, y, x), |(c, ..)| {
                c as f32 + 1.0
            }))
        }

        fn release_cache(&mut self) {
            self.released += 1;
        }
    }

    fn small_config() -> SegConfig {
        SegConfig {
            patch_size: [2, 2, 6],
            num_classes: 2,
            overlap: 0.5,
            precision: Precision::Full,
            ..SegConfig::default()
        }
    }

    #[test]
    fn test_exact_fit_runs_one_patch() {
        let cfg = small_config();
        let mask = BlendMask::build(cfg.patch_size, cfg.sigma_scale, cfg.precision, cfg.mask_floor);
        let mut net = CountingNet::new(3);
        let volume = Array3::<f32>::zeros((2, 2, 6));

        let prob: ProbVolume = run_sliding_inference(&mut net, volume.view(), &cfg, &mask).unwrap();
        assert_eq!(net.calls, 1);
        assert_eq!(net.released, 1);
        assert_eq!(prob.dim(), (3, 2, 2, 6));
        for (c, ch) in prob.axis_iter(Axis(0)).enumerate() {
            Zip::from(&ch).and(&mask.view()).for_each(|p, m| {
                assert_eq!(*p, (c as f32 + 1.0) * m);
            });
        }
    }

    #[test]
    fn test_overlapping_patches_accumulate() {
        let cfg = small_config();
        let mask = BlendMask::build(cfg.patch_size, cfg.sigma_scale, cfg.precision, cfg.mask_floor);
        let mut net = CountingNet::new(3);
        // x 方向: 目标步长 3, 起点 0, 2, 4.
        let volume = Array3::<f32>::zeros((2, 2, 10));

        let prob: ProbVolume = run_sliding_inference(&mut net, volume.view(), &cfg, &mask).unwrap();
        assert_eq!(net.calls, 3);
        assert_eq!(net.released, 1);

        let m = mask.view();
        for x in 0..10 {
            let expected: f32 = [0usize, 2, 4]
                .iter()
                .filter(|&&s| s <= x && x < s + 6)
                .map(|&s| m[(1, 0, x - s)])
                .sum();
            let got = prob[(0, 1, 0, x)];
            assert!((got - expected).abs() < 1e-6, "x = {x}: {got} != {expected}");
            assert!((prob[(2, 1, 0, x)] - 3.0 * expected).abs() < 1e-5);
        }
        // 重叠区域不做平均.
        assert!(prob[(0, 1, 0, 4)] > prob[(0, 1, 0, 0)]);
    }

    #[test]
    fn test_input_is_normalized() {
        let cfg = small_config();
        let mask = BlendMask::build(cfg.patch_size, cfg.sigma_scale, cfg.precision, cfg.mask_floor);
        let mut net = CountingNet::new(3);
        let volume = Array3::from_shape_fn((2, 2, 6), |(_, _, x)| -2000.0 + 600.0 * x as f32);

        run_sliding_inference::<f32, _>(&mut net, volume.view(), &cfg, &mask).unwrap();
        let seen = net.first_patch.unwrap();
        Zip::from(&seen).and(&volume).for_each(|s, &hu| {
            assert_eq!(*s, cfg.window.eval(hu));
        });
        assert_eq!(seen[(0, 0, 0)], cfg.window.eval(-985.0));
        assert_eq!(seen[(0, 0, 5)], cfg.window.eval(621.0));
    }

    #[test]
    fn test_wrong_channel_count_is_predict_error() {
        let cfg = small_config();
        let mask = BlendMask::build(cfg.patch_size, cfg.sigma_scale, cfg.precision, cfg.mask_floor);
        let mut net = CountingNet::new(2);
        let volume = Array3::<f32>::zeros((2, 2, 6));

        let err = run_sliding_inference::<f32, _>(&mut net, volume.view(), &cfg, &mask).unwrap_err();
        assert!(matches!(err, SegError::Predict(_)));
        assert_eq!(net.released, 1);
    }

    #[test]
    fn test_volume_smaller_than_patch() {
        let cfg = small_config();
        let mask = BlendMask::build(cfg.patch_size, cfg.sigma_scale, cfg.precision, cfg.mask_floor);
        let mut net = CountingNet::new(3);
        let volume = Array3::<f32>::zeros((2, 2, 5));

        let err = run_sliding_inference::<f32, _>(&mut net, volume.view(), &cfg, &mask).unwrap_err();
        assert!(matches!(err, SegError::InvalidGeometry { .. }));
        assert_eq!(net.calls, 0);
    }

    #[test]
    fn test_half_precision_accumulation() {
        let cfg = SegConfig {
            precision: Precision::Half,
            ..small_config()
        };
        let mask = BlendMask::build(cfg.patch_size, cfg.sigma_scale, cfg.precision, cfg.mask_floor);
        let mut net = CountingNet::new(3);
        let volume = Array3::<f32>::zeros((2, 2, 10));

        let prob: ProbVolume = run_sliding_inference(&mut net, volume.view(), &cfg, &mask).unwrap();
        assert!(prob.iter().all(|v| Precision::Half.round(*v) == *v));
    }

    #[test]
    fn test_half_storage_matches_full_storage() {
        let cfg = SegConfig {
            precision: Precision::Half,
            ..small_config()
        };
        let mask = BlendMask::build(cfg.patch_size, cfg.sigma_scale, cfg.precision, cfg.mask_floor);
        let volume = Array3::<f32>::zeros((2, 2, 10));

        let wide: ProbVolume =
            run_sliding_inference(&mut CountingNet::new(3), volume.view(), &cfg, &mask).unwrap();
        let narrow: ProbVolume<f16> =
            run_sliding_inference(&mut CountingNet::new(3), volume.view(), &cfg, &mask).unwrap();

        // f16 存储与舍入到半精度的 f32 存储逐元素相同.
        assert_eq!(narrow.dim(), wide.dim());
        Zip::from(&narrow).and(&wide).for_each(|n, w| assert_eq!(n.to_f32(), *w));
    }
}
