use std::io;
use std::path::Path;

use ndarray::{Array3, ArrayD, ArrayView, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, NiftiType, ReaderOptions};

use crate::error::{SegError, SegResult};
use crate::Idx3d;

pub mod geometry;
/// CT 强度窗口.
pub mod window;

pub use geometry::{reverse3, Geometry};
pub use window::IntensityWindow;

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// 将 `into_ndarray` 得到的 `[W, H, z, (1, ..)]` 数组转换为行优先的 `[z, H, W]` 数组.
fn volume_to_zyx<T: Clone>(mut data: ArrayD<T>) -> SegResult<Array3<T>> {
    // 4D 扫描的尾部单例维度直接丢弃.
    while data.ndim() > 3 && data.len_of(Axis(data.ndim() - 1)) == 1 {
        let last = data.ndim() - 1;
        data = data.index_axis_move(Axis(last), 0);
    }
    let data = data.into_dimensionality::<Ix3>().map_err(|e| {
        SegError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("expected a 3D volume: {e}"),
        ))
    })?;
    // hint: 原第一维向下增长, 原第二维向右增长.
    let data = data.permuted_axes([2, 1, 0]);
    Ok(if data.is_standard_layout() {
        data
    } else {
        data.as_standard_layout().into_owned()
    })
}

/// 3D CT nii 文件 header 的共用属性和部分通用操作.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取数据形状大小, 按 `(z, H, W)` 排列.
    #[inline]
    fn shape(&self) -> Idx3d {
        get_shape_from_header(self.header())
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 获取单个体素分辨率. 该分辨率以毫米为单位, 分别代表空间 (相邻切片方向),
    /// 高 (自然图像的垂直方向), 宽 (自然图像的水平方向).
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, w, h, z, ..] = self.header().pixdim;
        [z.abs() as f64, h.abs() as f64, w.abs() as f64]
    }

    /// 获取完整几何信息 (物理轴序).
    #[inline]
    fn geometry(&self) -> Geometry {
        Geometry::from_header(self.header())
    }
}

/// nii 格式 3D CT 扫描, 包括 header 和 CT 扫描 (HU). HU 值以 `f32` 保存.
#[derive(Debug, Clone)]
pub struct CtScan {
    header: BoxedHeader,
    data: Array3<f32>,
}

impl NiftiHeaderAttr for CtScan {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl CtScan {
    /// 打开 nii (或 nii.gz) 文件格式的 3D CT 扫描. `path` 为文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> SegResult<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());
        let data = volume_to_zyx(obj.into_volume().into_ndarray::<f32>()?)?;
        debug_assert_eq!(data.dim(), get_shape_from_header(&header));
        Ok(Self { header, data })
    }

    /// 根据 `[z, H, W]` 组织的 HU 数据和 `[x, y, z]` 分辨率直接创建扫描.
    /// 原点为零, 方向为单位矩阵.
    ///
    /// 主要用于合成数据实验.
    pub fn from_array(data: Array3<f32>, spacing_xyz: [f64; 3]) -> Self {
        let (z, h, w) = data.dim();
        let mut header = Box::<NiftiHeader>::default();
        header.dim = [3, w as u16, h as u16, z as u16, 1, 1, 1, 1];
        let [sx, sy, sz] = spacing_xyz;
        header.pixdim = [1.0, sx as f32, sy as f32, sz as f32, 0.0, 0.0, 0.0, 0.0];
        header.datatype = NiftiType::Float32 as i16;
        header.bitpix = 32;
        Self { header, data }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }

    /// 按 nifti 惯例 (`[W, H, z]`) 保存到 `path`. 后缀为 `.gz` 时自动压缩.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> SegResult<()> {
        let header = intensity_free_header(&self.header);
        WriterOptions::new(path.as_ref())
            .reference_header(&header)
            .write_nifti(&self.data.view().permuted_axes([2, 1, 0]))?;
        Ok(())
    }
}

/// 复制 `h`, 但去除强度缩放相关字段. 几何信息保持不变.
fn intensity_free_header(h: &NiftiHeader) -> NiftiHeader {
    let mut header = h.clone();
    header.scl_slope = 1.0;
    header.scl_inter = 0.0;
    header.cal_min = 0.0;
    header.cal_max = 0.0;
    header
}

/// nii 格式 3D 器官标签图, 包括 header 和标签. 标签值以 `u8` 保存.
///
/// `0` 为背景, `1..=16` 为器官.
#[derive(Debug, Clone)]
pub struct CtLabel {
    header: BoxedHeader,
    data: Array3<u8>,
}

impl NiftiHeaderAttr for CtLabel {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl CtLabel {
    /// 打开 nii (或 nii.gz) 文件格式的 3D 标签图. 如果打开成功,
    /// 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> SegResult<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());
        let data = volume_to_zyx(obj.into_volume().into_ndarray::<u8>()?)?;
        Ok(Self { header, data })
    }

    /// 以参考 header 和 `[z, H, W]` 组织的标签数据创建标签图.
    /// 参考 header 的全部几何信息会被完整复制.
    ///
    /// 如果 `data` 形状与 header 不一致, 则程序 panic.
    pub fn with_header(header: &NiftiHeader, data: Array3<u8>) -> Self {
        assert_eq!(
            data.dim(),
            get_shape_from_header(header),
            "标签形状与参考 header 不一致"
        );
        let mut header = Box::new(intensity_free_header(header));
        header.datatype = NiftiType::Uint8 as i16;
        header.bitpix = 8;
        Self { header, data }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 获取 3D 标签中值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: u8) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 按 nifti 惯例 (`[W, H, z]`) 保存到 `path`. 后缀为 `.gz` 时自动压缩.
    ///
    /// 写入失败时会尽量删除残留文件, 不留下部分结果.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> SegResult<()> {
        let path = path.as_ref();
        let written = WriterOptions::new(path)
            .reference_header(&self.header)
            .write_nifti(&self.data.view().permuted_axes([2, 1, 0]));
        if let Err(e) = written {
            let _ = std::fs::remove_file(path);
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, ArrayD, IxDyn};

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("abod-berry-{}-{name}", std::process::id()));
        p
    }

    #[test]
    fn test_scan_from_array_shape() {
        let data = Array3::<f32>::zeros((3, 4, 5));
        let scan = CtScan::from_array(data, [0.5, 0.6, 2.5]);
        assert_eq!(scan.shape(), (3, 4, 5));
        assert_eq!(scan.pix_dim(), [2.5, 0.6000000238418579, 0.5]);
        let g = scan.geometry();
        assert_eq!(g.size, [5, 4, 3]);
        assert_eq!(g.shape(), [3, 4, 5]);
    }

    #[test]
    fn test_scan_nifti_roundtrip_keeps_axis_order() {
        let data = Array3::from_shape_fn((3, 4, 5), |(z, h, w)| (z * 100 + h * 10 + w) as f32);
        let scan = CtScan::from_array(data.clone(), [0.8, 0.8, 3.0]);
        let path = tmp_path("scan.nii.gz");
        scan.save(&path).unwrap();

        let back = CtScan::open(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(back.shape(), (3, 4, 5));
        assert_eq!(back.data(), data.view());
        assert_eq!(back.geometry().spacing, [0.800000011920929, 0.800000011920929, 3.0]);
    }

    #[test]
    fn test_label_with_header_and_save() {
        let scan = CtScan::from_array(Array3::zeros((2, 3, 4)), [1.0, 1.0, 2.0]);
        let mut data = Array3::<u8>::zeros((2, 3, 4));
        data[(1, 2, 3)] = 15;
        data[(0, 0, 0)] = 16;
        let label = CtLabel::with_header(scan.header(), data);
        assert_eq!(label.count(15), 1);
        assert_eq!(label.count(0), 22);
        assert_eq!(label.size(), 24);

        let path = tmp_path("label.nii.gz");
        label.save(&path).unwrap();
        let back = CtLabel::open(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(back.data(), label.data());
        assert_eq!(back.geometry().spacing, scan.geometry().spacing);
    }

    #[test]
    fn test_volume_to_zyx_drops_trailing_singletons() {
        // [W, H, z, t = 1]
        let raw = ArrayD::from_shape_fn(IxDyn(&[5, 4, 3, 1]), |i| (i[0] + 10 * i[1] + 100 * i[2]) as u8);
        let v = volume_to_zyx(raw).unwrap();
        assert_eq!(v.dim(), (3, 4, 5));
        assert!(v.is_standard_layout());
        assert_eq!(v[(2, 1, 4)], 4 + 10 + 200);

        let raw = ArrayD::<u8>::zeros(IxDyn(&[5, 4, 3, 2]));
        assert!(matches!(volume_to_zyx(raw), Err(SegError::Io(_))));
    }

    #[test]
    #[should_panic]
    fn test_label_shape_mismatch() {
        let scan = CtScan::from_array(Array3::zeros((2, 3, 4)), [1.0, 1.0, 2.0]);
        let _ = CtLabel::with_header(scan.header(), Array3::zeros((4, 3, 2)));
    }
}
