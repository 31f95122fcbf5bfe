// 该文件是 Zhaoying （照影） 项目的一部分。
// src/detect/nms.rs - 非极大值抑制
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::cmp::Ordering;

use tracing::debug;

use crate::detect::BBox;

/// 计算两个边界框的 IoU
pub fn iou(a: &BBox, b: &BBox) -> f32 {
  let x1 = (a.left as i64).max(b.left as i64);
  let y1 = (a.top as i64).max(b.top as i64);
  let x2 = a.right().min(b.right());
  let y2 = a.bottom().min(b.bottom());

  let intersection = (x2 - x1).max(0) as f64 * (y2 - y1).max(0) as f64;
  let union = a.area() + b.area() - intersection;

  if union > 0.0 {
    (intersection / union) as f32
  } else {
    0.0
  }
}

/// 贪心非极大值抑制，所有类别共用一个候选池
///
/// 置信度低于 `score_threshold` 的候选先被丢弃；其余按置信度降序
/// （相同置信度时下标小者优先）依次检查，与所有已保留框的 IoU
/// 都小于 `iou_threshold` 时保留。返回值按保留顺序排列。
pub fn suppress(
  boxes: &[BBox],
  confidences: &[f32],
  score_threshold: f32,
  iou_threshold: f32,
) -> Vec<usize> {
  let count = boxes.len().min(confidences.len());

  let mut candidates: Vec<usize> = (0..count)
    .filter(|&i| confidences[i] >= score_threshold)
    .collect();
  // sort_by 是稳定排序，并列时保持原下标顺序
  candidates.sort_by(|&a, &b| {
    confidences[b]
      .partial_cmp(&confidences[a])
      .unwrap_or(Ordering::Equal)
  });

  let mut kept: Vec<usize> = Vec::with_capacity(candidates.len());
  for index in candidates {
    let overlaps = kept
      .iter()
      .any(|&k| iou(&boxes[k], &boxes[index]) >= iou_threshold);
    if !overlaps {
      kept.push(index);
    }
  }

  debug!("NMS: {} 个候选框, 保留 {} 个", count, kept.len());
  kept
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = BBox::new(0, 0, 10, 10);
    assert_eq!(iou(&a, &a), 1.0);
    assert_eq!(iou(&a, &BBox::new(20, 20, 5, 5)), 0.0);
    assert_eq!(iou(&a, &BBox::new(10, 0, 10, 10)), 0.0);
    assert_eq!(iou(&BBox::new(0, 0, 0, 0), &BBox::new(0, 0, 0, 0)), 0.0);
  }

  #[test]
  fn keeps_higher_confidence_of_overlapping_pair() {
    // 同类两框, 交并比 0.7
    let a = BBox::new(0, 0, 100, 100);
    let b = BBox::new(0, 0, 100, 70);
    assert!((iou(&a, &b) - 0.7).abs() < 1e-6);

    let kept = suppress(&[b, a], &[0.6, 0.9], 0.25, 0.45);
    assert_eq!(kept, vec![1]);
  }

  #[test]
  fn ignores_class_when_suppressing() {
    // 类别不参与抑制，只看几何重叠
    let boxes = [BBox::new(0, 0, 50, 50), BBox::new(2, 2, 50, 50)];
    let kept = suppress(&boxes, &[0.8, 0.7], 0.25, 0.45);
    assert_eq!(kept, vec![0]);
  }

  #[test]
  fn drops_scores_below_threshold() {
    let boxes = [BBox::new(0, 0, 10, 10), BBox::new(100, 100, 10, 10)];
    assert_eq!(suppress(&boxes, &[0.24, 0.25], 0.25, 0.45), vec![1]);
  }

  #[test]
  fn ties_prefer_lower_index() {
    let boxes = [
      BBox::new(200, 200, 10, 10),
      BBox::new(0, 0, 10, 10),
      BBox::new(1, 1, 10, 10),
    ];
    assert_eq!(suppress(&boxes, &[0.5, 0.5, 0.5], 0.25, 0.45), vec![0, 1]);
  }

  #[test]
  fn empty_input_is_empty_output() {
    assert!(suppress(&[], &[], 0.25, 0.45).is_empty());
  }

  #[test]
  fn iou_exactly_at_threshold_is_suppressed() {
    let a = BBox::new(0, 0, 100, 100);
    let b = BBox::new(0, 0, 100, 50);
    assert_eq!(iou(&a, &b), 0.5);
    assert_eq!(suppress(&[a, b], &[0.9, 0.8], 0.25, 0.5), vec![0]);
  }
}
