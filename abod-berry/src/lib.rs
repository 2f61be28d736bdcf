#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 提供腹部 CT 多器官 (16 类) 分割推理流程: 分辨率变换, 滑窗推理,
//! 高斯融合, 后处理与 nii.gz 读写.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 网络本身被视为黑盒, 只通过 [`infer::SegNet`] 交互. crate 内置的
//!   [`infer::PointwiseNet`] 仅用于端到端验证.
//! 2. 所有数组按 `[z, y, x]` 索引, 所有物理量 (nifti header, [`Geometry`]) 按 `[x, y, z]`
//!   排列. 两者之间只通过 [`data::reverse3`] 转换.
//! 3. 在非期望情况下 (程序缺陷), 程序会直接 panic, 而不会导致内存错误.
//!   可预期的失败 (文件缺失, 形状不合法, 内存不足) 均以 [`SegError`] 返回.
//!
//! # 开发计划
//!
//! ### 滑窗起点规划 ✅
//!
//! 实现位于 `abod-berry/src/infer/steps.rs`.
//!
//! ### 高斯融合权重及进程内缓存 ✅
//!
//! 实现位于 `abod-berry/src/infer/gaussian.rs`.
//!
//! ### 滑窗推理引擎 ✅
//!
//! 逐 patch 推理, 乘以融合权重后累加. 重叠区域不做平均.
//!
//! 实现位于 `abod-berry/src/infer`.
//!
//! ### 分辨率变换 ✅
//!
//! 1. 正向: 图像库约定, 厚层扫描分离 z 方向 (平面内线性, z 方向最近邻). ✅
//! 2. 反向: 张量库约定, 逐通道缩放以限制峰值内存. ✅
//! 3. 标签图最近邻重采样到参考网格. ✅
//!
//! 实现位于 `abod-berry/src/resample`.
//!
//! ### 后处理 ✅
//!
//! argmax, 左右对称器官 (15/16) 重标记.
//!
//! 实现位于 `abod-berry/src/post_proc`.
//!
//! ### 端到端流程与输出路径约定 ✅
//!
//! 实现位于 `abod-berry/src/pipeline.rs`.
//!
//! ### 真实网络后端 ⌛️
//!
//! 目前只有逐体素线性分类器. 3D U-Net 需要接入外部推理运行时, 实现 [`infer::SegNet`] 即可.

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

pub mod config;
pub mod consts;

/// 3D CT nii 文件基础数据结构.
pub mod data;

mod error;
pub mod infer;
pub mod pipeline;
pub mod post_proc;
pub mod prelude;
pub mod resample;
pub mod tensor;

pub use config::{LateralRemap, Precision, SegConfig};
pub use data::{CtLabel, CtScan, Geometry, IntensityWindow, NiftiHeaderAttr};
pub use error::{SegError, SegResult};
pub use pipeline::{inference_3d, output_path, Padding, Segmenter};
