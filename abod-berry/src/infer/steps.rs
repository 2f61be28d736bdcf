//! 滑窗起点规划.

use crate::error::{SegError, SegResult};

/// 单个轴上的滑窗起点.
///
/// 目标步长为 `patch * overlap`, 步数为 `ceil((image - patch) / 目标步长) + 1`.
/// 实际步长在 `[0, image - patch]` 上均分, 起点四舍六入五成双.
/// 只有一步时起点为 `[0]`. 间隔数不超过 `image - patch`, 即实际步长至少为 1.
fn axis_steps(patch: usize, image: usize, overlap: f64) -> Vec<usize> {
    let span = image - patch;
    let target = patch as f64 * overlap;
    // 浮点转整数会饱和, 极小的 overlap 不会溢出.
    let gaps = ((span as f64 / target).ceil() as usize).min(span);
    if gaps == 0 {
        return vec![0];
    }
    let actual = span as f64 / gaps as f64;
    (0..=gaps)
        .map(|i| (actual * i as f64).round_ties_even() as usize)
        .collect()
}

/// 计算 patch 在 `image` 上沿 `[z, y, x]` 三个轴的滑窗起点.
///
/// 每个轴的第一个起点为 0, 最后一个起点为 `image - patch`, 相邻起点间距不超过
/// `patch * overlap`. 因此整幅图像都会被覆盖.
///
/// `overlap` 不在 `(0, 1]` 内时返回 [`SegError::InvalidOverlap`],
/// patch 在任意轴上大于图像时返回 [`SegError::InvalidGeometry`].
pub fn compute_steps(
    patch: [usize; 3],
    image: [usize; 3],
    overlap: f64,
) -> SegResult<[Vec<usize>; 3]> {
    if !(overlap > 0.0 && overlap <= 1.0) {
        return Err(SegError::InvalidOverlap(overlap));
    }
    if patch.iter().zip(image.iter()).any(|(p, i)| p > i || *p == 0) {
        return Err(SegError::InvalidGeometry { patch, image });
    }
    Ok([
        axis_steps(patch[0], image[0], overlap),
        axis_steps(patch[1], image[1], overlap),
        axis_steps(patch[2], image[2], overlap),
    ])
}
