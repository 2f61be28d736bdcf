//! 单个体积的端到端分割流程.
//!
//! 读取扫描 -> 正向重采样 -> (必要时) 补零 -> 滑窗推理 -> 去除补零 -> 后处理 -> 写出标签图.
//! 任何一步出错都会中止当前体积, 不会写出部分结果.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use itertools::izip;
use half::f16;
use log::{debug, info, warn};
use ndarray::{s, Array3};

use crate::config::{Precision, SegConfig};
use crate::consts::label::BACKGROUND;
use crate::data::{CtLabel, CtScan, NiftiHeaderAttr};
use crate::error::{SegError, SegResult};
use crate::infer::{blend_mask, run_sliding_inference, BlendMask, PointwiseNet, SegNet};
use crate::post_proc::finalize;
use crate::resample::{to_canonical_spacing, Resampled};
use crate::tensor::{ProbElem, ProbVolume};

/// 输入文件名的约定后缀.
const NIFTI_GZ: &str = ".nii.gz";

/// 网络分辨率下的体积在某个轴上小于 patch 时的对称补零量, 按 `[z, y, x]` 存储.
///
/// 补零总量为 `max(0, patch - image)`, 左侧取一半 (向下取整), 右侧取余下部分.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Padding {
    /// 各轴起始侧的补零个数.
    pub left: [usize; 3],

    /// 各轴末尾侧的补零个数.
    pub right: [usize; 3],
}

impl Padding {
    /// 计算形状为 `shape` 的体积补到至少 `patch` 大小所需的补零量.
    pub fn compute(patch: [usize; 3], shape: [usize; 3]) -> Self {
        let mut ans = Self::default();
        for (l, r, &p, &n) in izip!(&mut ans.left, &mut ans.right, &patch, &shape) {
            let pad = p.saturating_sub(n);
            *l = pad / 2;
            *r = pad - pad / 2;
        }
        ans
    }

    /// 是否无需补零.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.left.iter().chain(self.right.iter()).all(|v| *v == 0)
    }

    /// 补零后的形状.
    pub fn padded_shape(&self, shape: [usize; 3]) -> [usize; 3] {
        let mut ans = shape;
        for (a, l, r) in izip!(&mut ans, &self.left, &self.right) {
            *a += l + r;
        }
        ans
    }

    /// 以 0 (原始 HU) 补齐体积.
    pub fn apply(&self, volume: Array3<f32>) -> Array3<f32> {
        if self.is_empty() {
            return volume;
        }
        let (z, y, x) = volume.dim();
        let [pz, py, px] = self.padded_shape([z, y, x]);
        let [lz, ly, lx] = self.left;
        let mut out = Array3::<f32>::zeros((pz, py, px));
        out.slice_mut(s![lz..lz + z, ly..ly + y, lx..lx + x])
            .assign(&volume);
        out
    }

    /// 从 `[通道, z, y, x]` 的概率体积中去除补零部分.
    pub fn unpad<T: ProbElem>(&self, prob: ProbVolume<T>) -> ProbVolume<T> {
        if self.is_empty() {
            return prob;
        }
        let (_, z, y, x) = prob.dim();
        let [lz, ly, lx] = self.left;
        let [rz, ry, rx] = self.right;
        prob.slice_move(s![.., lz..z - rz, ly..y - ry, lx..x - rx])
    }
}

/// 标签图的输出路径.
///
/// 1. `save_dir` 为 `None`: 与输入同目录, `<名称>.nii.gz -> <名称>_pred.nii.gz`.
/// 2. 指定 `save_dir`: `<save_dir>/<名称>pred.nii.gz`.
///
/// 输入文件名不以 `.nii.gz` 结尾时, 后缀直接追加在完整文件名之后, 不会覆盖输入.
pub fn output_path(input: &Path, save_dir: Option<&Path>) -> PathBuf {
    let name = input
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(NIFTI_GZ).unwrap_or(&name);
    match save_dir {
        None => input.with_file_name(format!("{stem}_pred{NIFTI_GZ}")),
        Some(dir) => dir.join(format!("{stem}pred{NIFTI_GZ}")),
    }
}

/// 腹部多器官分割器. 持有配置, 网络和融合权重, 可以对多个体积依次复用.
pub struct Segmenter<N> {
    config: SegConfig,
    net: N,
    mask: Arc<BlendMask>,
}

impl<N: SegNet> Segmenter<N> {
    /// 以给定配置和网络构建分割器. 配置无效时返回错误.
    pub fn new(config: SegConfig, net: N) -> SegResult<Self> {
        config.validate()?;
        let mask = blend_mask(&config);
        Ok(Self { config, net, mask })
    }

    /// 当前配置.
    #[inline]
    pub fn config(&self) -> &SegConfig {
        &self.config
    }

    /// 底层网络.
    #[inline]
    pub fn net(&self) -> &N {
        &self.net
    }

    /// 分割一个 CT 扫描, 返回与之几何信息完全一致的标签图.
    ///
    /// 概率体积的存储类型随 `config.precision` 而定: 半精度下为 [`f16`].
    pub fn segment(&mut self, scan: &CtScan) -> SegResult<CtLabel> {
        match self.config.precision {
            Precision::Half => self.segment_as::<f16>(scan),
            Precision::Full => self.segment_as::<f32>(scan),
        }
    }

    fn segment_as<T: ProbElem>(&mut self, scan: &CtScan) -> SegResult<CtLabel> {
        debug_assert_eq!(T::PRECISION, self.config.precision);
        let geometry = scan.geometry();
        if geometry.is_empty() {
            return Err(SegError::InvalidGeometry {
                patch: self.config.patch_size,
                image: geometry.shape(),
            });
        }
        info!(
            "segmenting volume {:?} (zyx, {} voxels), spacing {:?} (zyx)",
            scan.shape(),
            scan.size(),
            scan.pix_dim()
        );

        let Resampled {
            data,
            geometry: canonical,
            separate_z,
        } = to_canonical_spacing(scan.data(), &geometry, &self.config);
        debug!(
            "canonical shape {:?}, separate z: {separate_z}",
            canonical.shape()
        );

        let padding = Padding::compute(self.config.patch_size, canonical.shape());
        if !padding.is_empty() {
            warn!(
                "volume {:?} smaller than patch {:?}, padding {:?} / {:?}",
                canonical.shape(),
                self.config.patch_size,
                padding.left,
                padding.right
            );
        }
        let input = padding.apply(data);

        let prob: ProbVolume<T> =
            run_sliding_inference(&mut self.net, input.view(), &self.config, &self.mask)?;
        drop(input);
        let prob = padding.unpad(prob);
        debug_assert_eq!(&prob.shape()[1..], &canonical.shape()[..]);

        finalize(prob, scan, separate_z, &self.config)
    }
}

impl Segmenter<PointwiseNet> {
    /// 从 npz 检查点加载 [`PointwiseNet`] 并构建分割器.
    ///
    /// 检查点的通道数必须等于 `config.num_channels()`, 否则返回
    /// [`SegError::ModelLoadFailure`].
    pub fn from_checkpoint<P: AsRef<Path>>(config: SegConfig, checkpoint: P) -> SegResult<Self> {
        let net = PointwiseNet::load(checkpoint.as_ref())?;
        if net.num_channels() != config.num_channels() {
            return Err(SegError::ModelLoadFailure(format!(
                "{}: checkpoint has {} channels, expected {}",
                checkpoint.as_ref().display(),
                net.num_channels(),
                config.num_channels()
            )));
        }
        info!("loaded checkpoint {}", checkpoint.as_ref().display());
        Self::new(config, net)
    }
}

/// 分割 `input` 处的 nii.gz 扫描, 并将标签图写到 [`output_path`] 给出的位置.
///
/// 返回输出路径. 写入失败时不会留下残缺文件.
pub fn inference_3d<N: SegNet, P: AsRef<Path>>(
    segmenter: &mut Segmenter<N>,
    input: P,
    save_dir: Option<&Path>,
) -> SegResult<PathBuf> {
    let input = input.as_ref();
    info!("reading {}", input.display());
    let scan = CtScan::open(input)?;
    let label = segmenter.segment(&scan)?;

    let out = output_path(input, save_dir);
    label.save(&out)?;
    info!(
        "saved {}, foreground {} / {} voxels",
        out.display(),
        label.size() - label.count(BACKGROUND),
        label.size()
    );
    Ok(out)
}
