//! 推理配置.
//!
//! [`SegConfig`] 在进程启动时构造一次, 之后以引用形式传给各个组件.
//! 各组件不会修改它.

use half::f16;

use crate::consts::{self, label};
use crate::data::IntensityWindow;
use crate::error::{SegError, SegResult};

/// 张量的工作数值精度.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Precision {
    /// IEEE 754 binary16. 所有累加结果都会舍入到半精度可表示的值.
    Half,

    /// `f32`.
    Full,
}

impl Precision {
    /// 将 `v` 舍入到当前精度可表示的最近值.
    #[inline]
    pub fn round(self, v: f32) -> f32 {
        match self {
            Precision::Half => f16::from_f32(v).to_f32(),
            Precision::Full => v,
        }
    }
}

/// 左右对称器官对的重标记规则.
///
/// 沿最后一个空间轴 (数组 `x` 轴) 在中点处将体积一分为二:
/// 前半部分 `first.0 -> first.1`, 后半部分 `second.0 -> second.1`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LateralRemap {
    /// 前半部分的 `(旧标签, 新标签)`.
    pub first: (u8, u8),

    /// 后半部分的 `(旧标签, 新标签)`.
    pub second: (u8, u8),
}

impl Default for LateralRemap {
    #[inline]
    fn default() -> Self {
        Self {
            first: (label::LATERAL_A, label::LATERAL_B),
            second: (label::LATERAL_B, label::LATERAL_A),
        }
    }
}

/// 分割推理的全部固定参数.
///
/// 所有三元组均按 `[z, y, x]` (数组索引序) 存储.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegConfig {
    /// 网络训练时的体素分辨率 (毫米).
    pub canonical_spacing: [f64; 3],

    /// 网络固定输入形状.
    pub patch_size: [usize; 3],

    /// 器官类别数, 不含背景.
    pub num_classes: usize,

    /// 输入强度窗口.
    pub window: IntensityWindow,

    /// 滑窗步长占 patch 边长的比例, `(0, 1]`.
    pub overlap: f64,

    /// 分离 z 方向重采样的层间距阈值 (毫米).
    pub anisotropy_threshold: f64,

    /// 高斯权重的 sigma 与 patch 边长之比.
    pub sigma_scale: f64,

    /// 高斯权重下限.
    pub mask_floor: f32,

    /// 工作精度.
    pub precision: Precision,

    /// 左右对称器官重标记规则.
    pub lateral: LateralRemap,
}

impl Default for SegConfig {
    fn default() -> Self {
        Self {
            canonical_spacing: consts::CANONICAL_SPACING,
            patch_size: consts::PATCH_SIZE,
            num_classes: consts::NUM_CLASSES,
            window: IntensityWindow::from_abdomen(),
            overlap: consts::OVERLAP,
            anisotropy_threshold: consts::ANISOTROPY_THRESHOLD,
            sigma_scale: consts::SIGMA_SCALE,
            mask_floor: consts::MASK_FLOOR,
            precision: Precision::Half,
            lateral: LateralRemap::default(),
        }
    }
}

impl SegConfig {
    /// 网络输出通道数 (器官 + 背景).
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.num_classes + 1
    }

    /// 按物理轴序 `[x, y, z]` 返回网络分辨率.
    #[inline]
    pub fn canonical_spacing_xyz(&self) -> [f64; 3] {
        let [z, y, x] = self.canonical_spacing;
        [x, y, z]
    }

    /// 检查配置是否有意义.
    pub fn validate(&self) -> SegResult<()> {
        if self.patch_size.iter().any(|&p| p == 0) {
            return Err(SegError::InvalidConfig("patch size must be positive"));
        }
        if !self.canonical_spacing.iter().all(|s| s.is_finite() && *s > 0.0) {
            return Err(SegError::InvalidConfig("canonical spacing must be positive"));
        }
        if !(self.overlap > 0.0 && self.overlap <= 1.0) {
            return Err(SegError::InvalidOverlap(self.overlap));
        }
        if self.num_classes == 0 || self.num_channels() > u8::MAX as usize + 1 {
            return Err(SegError::InvalidConfig("class count must fit into u8 labels"));
        }
        let w = &self.window;
        if IntensityWindow::new(w.lower_bound(), w.upper_bound(), w.mean(), w.std()).is_none() {
            return Err(SegError::InvalidConfig("intensity window must satisfy lower < upper, std > 0"));
        }
        if !(self.sigma_scale.is_finite() && self.sigma_scale > 0.0) {
            return Err(SegError::InvalidConfig("sigma scale must be positive"));
        }
        if !(self.mask_floor > 0.0 && self.mask_floor <= 1.0) {
            return Err(SegError::InvalidConfig("mask floor must be in (0, 1]"));
        }
        let max_label = self.num_classes as u8;
        let (a, b) = self.lateral.first;
        let (c, d) = self.lateral.second;
        if [a, b, c, d].iter().any(|&l| l > max_label) {
            return Err(SegError::InvalidConfig("lateral remap uses unknown labels"));
        }
        Ok(())
    }
}
