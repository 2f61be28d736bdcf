//! 运行时错误.
//!
//! 任何错误都会终止当前体积的处理. 不存在部分结果, 也不会自动重试.

use std::fmt::{self, Display, Formatter};

/// 分割推理的运行时错误.
#[derive(Debug)]
pub enum SegError {
    /// patch 在某个轴上大于图像.
    ///
    /// 两个参数均以 `[z, y, x]` 存储.
    InvalidGeometry {
        /// patch 形状.
        patch: [usize; 3],
        /// 图像形状.
        image: [usize; 3],
    },

    /// 滑窗重叠比例不在 `(0, 1]` 内.
    InvalidOverlap(f64),

    /// 配置项取值无意义.
    InvalidConfig(&'static str),

    /// 网络权重文件缺失或损坏. 进程启动阶段的致命错误.
    ModelLoadFailure(String),

    /// 网络推理失败, 或输出形状与预期不符.
    Predict(String),

    /// 大张量分配失败.
    ResourceExhaustion {
        /// 张量用途.
        what: &'static str,
        /// 请求的元素个数.
        elements: usize,
    },

    /// 底层 I/O 错误.
    Io(std::io::Error),

    /// nifti 文件读写错误.
    Nifti(nifti::NiftiError),
}

/// 分割推理运行时结果.
pub type SegResult<T> = Result<T, SegError>;

impl Display for SegError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SegError::InvalidGeometry { patch, image } => {
                write!(f, "patch {patch:?} does not fit into image {image:?}")
            }
            SegError::InvalidOverlap(v) => write!(f, "overlap {v} is not in (0, 1]"),
            SegError::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            SegError::ModelLoadFailure(msg) => write!(f, "failed to load model: {msg}"),
            SegError::Predict(msg) => write!(f, "prediction failed: {msg}"),
            SegError::ResourceExhaustion { what, elements } => {
                write!(f, "cannot allocate {elements} elements for {what}")
            }
            SegError::Io(e) => write!(f, "I/O error: {e}"),
            SegError::Nifti(e) => write!(f, "nifti error: {e}"),
        }
    }
}

impl std::error::Error for SegError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SegError::Io(e) => Some(e),
            SegError::Nifti(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SegError {
    #[inline]
    fn from(e: std::io::Error) -> Self {
        SegError::Io(e)
    }
}

impl From<nifti::NiftiError> for SegError {
    #[inline]
    fn from(e: nifti::NiftiError) -> Self {
        SegError::Nifti(e)
    }
}

impl SegError {
    /// 是否属于 I/O 类错误 (读源文件或写结果失败).
    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(self, SegError::Io(_) | SegError::Nifti(_))
    }
}
