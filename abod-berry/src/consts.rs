//! 通用常量.
//!
//! 这些常量与预训练网络绑定, 属于对外契约的一部分, 不应按调用调整.
//! 若确实需要不同取值 (如测试), 请构造自定义的 [`crate::SegConfig`].

/// 器官标签值.
pub mod label {
    /// 背景.
    pub const BACKGROUND: u8 = 0;

    /// 器官标签最大值. 标签集合为 `0..=ORGAN_MAX`.
    pub const ORGAN_MAX: u8 = 16;

    /// 左右对称器官对中的第一个标签. 最终出现在体积后半部分 (最后一个空间轴).
    pub const LATERAL_A: u8 = 15;

    /// 左右对称器官对中的第二个标签. 最终出现在体积前半部分 (最后一个空间轴).
    pub const LATERAL_B: u8 = 16;
}

/// 网络训练时的体素分辨率, 以毫米为单位, 按 `[z, y, x]` (数组索引序) 存储.
pub const CANONICAL_SPACING: [f64; 3] = [3.0, 0.9765625, 0.9765625];

/// 网络固定输入形状, 按 `[z, y, x]` 存储.
pub const PATCH_SIZE: [usize; 3] = [64, 192, 192];

/// 器官类别数 (不含背景). 网络输出通道数为 `NUM_CLASSES + 1`.
pub const NUM_CLASSES: usize = label::ORGAN_MAX as usize;

/// HU 截断下限.
pub const CLIP_MIN: f32 = -985.0;

/// HU 截断上限.
pub const CLIP_MAX: f32 = 621.0;

/// 截断后 HU 值的均值.
pub const INTENSITY_MEAN: f32 = 22.925867;

/// 截断后 HU 值的标准差.
pub const INTENSITY_STD: f32 = 208.98425;

/// 滑窗步长占 patch 边长的比例.
pub const OVERLAP: f64 = 0.7;

/// 层间距 (最后一个物理轴) 超过该值 (毫米) 时, 分离 z 方向重采样.
pub const ANISOTROPY_THRESHOLD: f64 = 2.0;

/// 高斯权重的 sigma 与 patch 边长之比.
pub const SIGMA_SCALE: f64 = 1.0 / 8.0;

/// 高斯权重在工作精度下的最小值.
pub const MASK_FLOOR: f32 = 1e-4;
