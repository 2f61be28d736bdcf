//! 高斯融合权重.
//!
//! 权重只依赖 patch 形状和配置, 与输入图像无关. 同一组参数在进程内只构建一次.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use ndarray::{Array1, Array3, ArrayView3};
use once_cell::sync::Lazy;
use ordered_float::OrderedFloat;

use crate::config::{Precision, SegConfig};

/// 高斯核截断半径与 sigma 之比.
const TRUNCATE: f64 = 4.0;

/// patch 形状的融合权重, 中心为 1, 处处为正.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendMask {
    weights: Array3<f32>,
}

impl BlendMask {
    /// 构建融合权重.
    ///
    /// 在 patch 中心 (`patch / 2`) 放置单位脉冲, 沿各轴以 `sigma = patch * sigma_scale`
    /// 做截断高斯卷积 (截断半径 `int(4 * sigma + 0.5)`, 外部补零), 再除以最大值.
    /// 结果中的零值替换为最小的非零值, 然后舍入到 `precision` 并下截断到 `floor`.
    pub fn build(patch: [usize; 3], sigma_scale: f64, precision: Precision, floor: f32) -> Self {
        let [kz, ky, kx] = patch.map(|n| axis_kernel(n, n as f64 * sigma_scale));
        let mut weights = Array3::from_shape_fn((patch[0], patch[1], patch[2]), |(z, y, x)| {
            (kz[z] * ky[y] * kx[x]) as f32
        });

        let max = weights
            .iter()
            .copied()
            .map(OrderedFloat)
            .max()
            .map_or(1.0, |m| m.0);
        if max > 0.0 {
            weights.mapv_inplace(|v| v / max);
        }
        if let Some(min) = weights
            .iter()
            .copied()
            .filter(|v| *v != 0.0)
            .map(OrderedFloat)
            .min()
        {
            weights.mapv_inplace(|v| if v == 0.0 { min.0 } else { v });
        }
        let floor = precision.round(floor);
        weights.mapv_inplace(|v| precision.round(v).max(floor));
        Self { weights }
    }

    /// 权重视图, 按 `[z, y, x]` 组织.
    #[inline]
    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.weights.view()
    }

    /// 权重形状.
    #[inline]
    pub fn shape(&self) -> [usize; 3] {
        let (z, y, x) = self.weights.dim();
        [z, y, x]
    }
}

/// 单位脉冲沿长度为 `n` 的轴做截断高斯卷积的结果 (未归一化).
fn axis_kernel(n: usize, sigma: f64) -> Array1<f64> {
    let center = (n / 2) as f64;
    let radius = (TRUNCATE * sigma + 0.5).floor();
    Array1::from_shape_fn(n, |i| {
        let d = i as f64 - center;
        if d.abs() > radius {
            0.0
        } else if sigma > 0.0 {
            (-0.5 * d * d / (sigma * sigma)).exp()
        } else {
            1.0
        }
    })
}

/// 缓存键: patch 形状, sigma 比例, 精度, 下限.
type MaskKey = ([usize; 3], u64, Precision, u32);

static MASK_CACHE: Lazy<Mutex<HashMap<MaskKey, Arc<BlendMask>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// 获取 `config` 对应的融合权重. 首次调用时构建, 之后在进程内复用.
pub fn blend_mask(config: &SegConfig) -> Arc<BlendMask> {
    let key = (
        config.patch_size,
        config.sigma_scale.to_bits(),
        config.precision,
        config.mask_floor.to_bits(),
    );
    let mut cache = MASK_CACHE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(mask) = cache.get(&key) {
        debug!("blend mask {:?} cache hit", config.patch_size);
        return Arc::clone(mask);
    }
    debug!("building blend mask {:?}", config.patch_size);
    let mask = Arc::new(BlendMask::build(
        config.patch_size,
        config.sigma_scale,
        config.precision,
        config.mask_floor,
    ));
    cache.insert(key, Arc::clone(&mask));
    mask
}
