//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;

pub use crate::config::{LateralRemap, Precision, SegConfig};
pub use crate::data::{CtLabel, CtScan, Geometry, IntensityWindow, NiftiHeaderAttr};
pub use crate::error::{SegError, SegResult};

pub use crate::consts::label::{BACKGROUND, LATERAL_A, LATERAL_B, ORGAN_MAX};
pub use crate::consts::{CANONICAL_SPACING, NUM_CLASSES, PATCH_SIZE};

pub use crate::infer::{PointwiseNet, SegNet};
pub use crate::pipeline::{inference_3d, Segmenter};
pub use crate::tensor::{ProbElem, ProbVolume};
