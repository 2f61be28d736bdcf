//! 概率张量.

use std::fmt::Debug;

use half::f16;
use ndarray::{Array4, Ix4};

use crate::config::Precision;
use crate::error::{SegError, SegResult};

/// 概率体积的存储元素. 计算总在 `f32` 下进行, 只有存储使用该类型.
pub trait ProbElem: Copy + Debug + PartialEq + Send + Sync + 'static {
    /// 该存储类型对应的工作精度.
    const PRECISION: Precision;

    /// 从 `f32` 舍入到最近的可表示值.
    fn from_f32(v: f32) -> Self;

    /// 无损转换为 `f32`.
    fn to_f32(self) -> f32;
}

impl ProbElem for f32 {
    const PRECISION: Precision = Precision::Full;

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }
}

impl ProbElem for f16 {
    const PRECISION: Precision = Precision::Half;

    #[inline]
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }

    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }
}

/// 概率体积, 按 `[通道, z, y, x]` 组织. 通道数为器官数 + 1.
///
/// 各通道值是加权累加的非负分数, 并未归一化. 只有通道间的相对大小有意义.
/// 半精度下以 [`f16`] 存储, 峰值内存减半.
pub type ProbVolume<T = f32> = Array4<T>;

/// 可失败地分配全零的 4D 张量.
///
/// 分配失败时返回 [`SegError::ResourceExhaustion`] 而不是终止进程.
pub fn try_zeros4<T: ProbElem>(shape: [usize; 4], what: &'static str) -> SegResult<ProbVolume<T>> {
    let elements = shape
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or(SegError::ResourceExhaustion {
            what,
            elements: usize::MAX,
        })?;

    let mut buf = Vec::<T>::new();
    buf.try_reserve_exact(elements)
        .map_err(|_| SegError::ResourceExhaustion { what, elements })?;
    buf.resize(elements, T::from_f32(0.0));

    // 长度与形状一致, 不会出错.
    Array4::from_shape_vec(Ix4(shape[0], shape[1], shape[2], shape[3]), buf)
        .map_err(|_| SegError::ResourceExhaustion { what, elements })
}
