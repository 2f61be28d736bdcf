use ndarray::{Array3, ArrayView3};

use crate::consts::{CLIP_MAX, CLIP_MIN, INTENSITY_MEAN, INTENSITY_STD};

/// CT 强度窗口, 包含 HU 截断上下限和截断后的均值/标准差.
///
/// 网络输入为 `(clip(hu, lower, upper) - mean) / std`.
///
/// 该窗口是只读的. 若要修改窗口参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IntensityWindow {
    lower: f32,
    upper: f32,
    mean: f32,
    std: f32,
}

impl IntensityWindow {
    /// 构建强度窗口.
    ///
    /// 要求 `lower < upper`, `std > 0`, 且所有值有限, 否则返回 `None`.
    pub fn new(lower: f32, upper: f32, mean: f32, std: f32) -> Option<IntensityWindow> {
        let finite = [lower, upper, mean, std].iter().all(|v| v.is_finite());
        (finite && lower < upper && std > 0.0).then_some(Self {
            lower,
            upper,
            mean,
            std,
        })
    }

    /// 腹部多器官网络训练时使用的窗口. 截断范围 `[-985, 621]`.
    #[inline]
    pub const fn from_abdomen() -> IntensityWindow {
        Self {
            lower: CLIP_MIN,
            upper: CLIP_MAX,
            mean: INTENSITY_MEAN,
            std: INTENSITY_STD,
        }
    }

    /// 截断下限.
    #[inline]
    pub fn lower_bound(&self) -> f32 {
        self.lower
    }

    /// 截断上限.
    #[inline]
    pub fn upper_bound(&self) -> f32 {
        self.upper
    }

    /// 均值.
    #[inline]
    pub fn mean(&self) -> f32 {
        self.mean
    }

    /// 标准差.
    #[inline]
    pub fn std(&self) -> f32 {
        self.std
    }

    /// 求 `hu` 截断并标准化后的值.
    ///
    /// NaN 会原样传播.
    #[inline]
    pub fn eval(&self, hu: f32) -> f32 {
        (hu.clamp(self.lower, self.upper) - self.mean) / self.std
    }

    /// 对整个体积逐体素调用 [`Self::eval`].
    pub fn normalize(&self, volume: ArrayView3<f32>) -> Array3<f32> {
        volume.mapv(|hu| self.eval(hu))
    }
}

impl Default for IntensityWindow {
    #[inline]
    fn default() -> Self {
        Self::from_abdomen()
    }
}
