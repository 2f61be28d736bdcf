//! 分割网络抽象.
//!
//! 推理引擎只依赖 [`SegNet`]. 网络结构, 权重格式和运行设备都是实现者的细节.

use std::fs::File;
use std::path::Path;

use ndarray::{Array1, Array4, ArrayView3, Axis, Ix1, OwnedRepr, Zip};
use ndarray_npy::NpzReader;

use crate::error::{SegError, SegResult};

/// 固定输入形状的 3D 分割网络.
pub trait SegNet {
    /// 对单个 `[z, y, x]` patch 推理, 返回 `[通道, z, y, x]` 的逐类分数.
    ///
    /// 分数应非负. 推理引擎会检查输出形状.
    fn predict(&mut self, patch: ArrayView3<f32>) -> SegResult<Array4<f32>>;

    /// 释放推理过程中缓存的临时资源. 每次整幅滑窗推理结束后调用一次.
    #[inline]
    fn release_cache(&mut self) {}
}

impl<N: SegNet + ?Sized> SegNet for Box<N> {
    #[inline]
    fn predict(&mut self, patch: ArrayView3<f32>) -> SegResult<Array4<f32>> {
        (**self).predict(patch)
    }

    #[inline]
    fn release_cache(&mut self) {
        (**self).release_cache()
    }
}

/// 逐体素的线性 softmax 分类器.
///
/// 每个体素独立计算 `softmax(weight * x + bias)`, 无空间感受野.
/// 主要用于流水线的端到端验证和基准测试.
#[derive(Debug, Clone, PartialEq)]
pub struct PointwiseNet {
    weight: Array1<f32>,
    bias: Array1<f32>,
}

impl PointwiseNet {
    /// 由逐通道的权重和偏置构建. 两者长度必须相同且非零, 否则返回
    /// [`SegError::ModelLoadFailure`].
    pub fn new(weight: Array1<f32>, bias: Array1<f32>) -> SegResult<Self> {
        if weight.is_empty() || weight.len() != bias.len() {
            return Err(SegError::ModelLoadFailure(format!(
                "weight ({}) and bias ({}) must have the same non-zero length",
                weight.len(),
                bias.len()
            )));
        }
        if !weight.iter().chain(bias.iter()).all(|v| v.is_finite()) {
            return Err(SegError::ModelLoadFailure("non-finite parameter".into()));
        }
        Ok(Self { weight, bias })
    }

    /// 从 npz 检查点加载. 检查点需包含一维数组 `weight` 和 `bias`.
    pub fn load<P: AsRef<Path>>(path: P) -> SegResult<Self> {
        let path = path.as_ref();
        let fail = |e: &dyn std::fmt::Display| {
            SegError::ModelLoadFailure(format!("{}: {e}", path.display()))
        };
        let file = File::open(path).map_err(|e| fail(&e))?;
        let mut npz = NpzReader::new(file).map_err(|e| fail(&e))?;

        let mut read = |name: &str| -> SegResult<Array1<f32>> {
            // `np.savez` 会给数组名加上 `.npy` 后缀.
            match npz.by_name::<OwnedRepr<f32>, Ix1>(name) {
                Ok(a) => Ok(a),
                Err(_) => npz
                    .by_name::<OwnedRepr<f32>, Ix1>(&format!("{name}.npy"))
                    .map_err(|e| fail(&e)),
            }
        };
        let weight = read("weight")?;
        let bias = read("bias")?;
        Self::new(weight, bias)
    }

    /// 输出通道数.
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.weight.len()
    }
}

impl SegNet for PointwiseNet {
    fn predict(&mut self, patch: ArrayView3<f32>) -> SegResult<Array4<f32>> {
        let (z, y, x) = patch.dim();
        let c = self.num_channels();
        let mut out = Array4::<f32>::zeros((c, z, y, x));

        for ((mut ch, w), b) in out
            .axis_iter_mut(Axis(0))
            .zip(self.weight.iter())
            .zip(self.bias.iter())
        {
            Zip::from(&mut ch)
                .and(&patch)
                .for_each(|o, &v| *o = w * v + b);
        }

        // 沿通道做数值稳定的 softmax.
        for mut lane in out.lanes_mut(Axis(0)) {
            let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            lane.mapv_inplace(|v| (v - max).exp());
            let sum = lane.sum();
            lane.mapv_inplace(|v| v / sum);
        }
        Ok(out)
    }
}
