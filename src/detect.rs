// 该文件是 Zhaoying （照影） 项目的一部分。
// src/detect.rs - 检测框与后处理
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

mod decode;
mod nms;

pub use self::decode::Decoder;
pub use self::nms::{iou, suppress};

/// 像素坐标下的检测框，左上角 + 宽高
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BBox {
  pub left: i32,
  pub top: i32,
  pub width: i32,
  pub height: i32,
}

impl BBox {
  pub fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
    Self {
      left,
      top,
      width,
      height,
    }
  }

  pub fn right(&self) -> i64 {
    self.left as i64 + self.width as i64
  }

  pub fn bottom(&self) -> i64 {
    self.top as i64 + self.height as i64
  }

  pub fn area(&self) -> f64 {
    self.width.max(0) as f64 * self.height.max(0) as f64
  }

  pub fn is_degenerate(&self) -> bool {
    self.width < 0 || self.height < 0
  }
}

/// 单行解码结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub confidence: f32,
  pub class_score: f32,
  pub class_id: usize,
  pub bbox: BBox,
}

/// 三个并列序列：检测框、置信度、类别
///
/// 只能通过 [`BoxSet::push`] 增长，三者长度始终一致，
/// 下标在解码与抑制之间保持同一含义。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoxSet {
  boxes: Vec<BBox>,
  confidences: Vec<f32>,
  class_ids: Vec<usize>,
}

impl BoxSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, detection: Detection) {
    self.boxes.push(detection.bbox);
    self.confidences.push(detection.confidence);
    self.class_ids.push(detection.class_id);
  }

  pub fn len(&self) -> usize {
    self.boxes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }

  pub fn boxes(&self) -> &[BBox] {
    &self.boxes
  }

  pub fn confidences(&self) -> &[f32] {
    &self.confidences
  }

  pub fn class_ids(&self) -> &[usize] {
    &self.class_ids
  }

  pub fn get(&self, index: usize) -> Option<(BBox, f32, usize)> {
    Some((
      *self.boxes.get(index)?,
      *self.confidences.get(index)?,
      *self.class_ids.get(index)?,
    ))
  }

  /// 按给定下标顺序取出子集
  pub fn select(&self, indices: &[usize]) -> BoxSet {
    let mut subset = BoxSet::new();
    for &index in indices {
      if let Some((bbox, confidence, class_id)) = self.get(index) {
        subset.boxes.push(bbox);
        subset.confidences.push(confidence);
        subset.class_ids.push(class_id);
      }
    }
    subset
  }

  /// 以给定阈值做非极大值抑制，返回保留的下标
  pub fn suppress(&self, score_threshold: f32, iou_threshold: f32) -> Vec<usize> {
    suppress(
      &self.boxes,
      &self.confidences,
      score_threshold,
      iou_threshold,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detection(confidence: f32, class_id: usize) -> Detection {
    Detection {
      confidence,
      class_score: 0.9,
      class_id,
      bbox: BBox::new(class_id as i32, 0, 10, 10),
    }
  }

  #[test]
  fn push_keeps_sequences_aligned() {
    let mut set = BoxSet::new();
    set.push(detection(0.5, 1));
    set.push(detection(0.7, 2));
    assert_eq!(set.len(), 2);
    assert_eq!(set.confidences(), &[0.5, 0.7]);
    assert_eq!(set.class_ids(), &[1, 2]);
    assert_eq!(set.boxes()[1].left, 2);
  }

  #[test]
  fn select_follows_index_order_and_skips_missing() {
    let mut set = BoxSet::new();
    for id in 0..3 {
      set.push(detection(0.1 * id as f32, id));
    }
    let subset = set.select(&[2, 0, 7]);
    assert_eq!(subset.class_ids(), &[2, 0]);
    assert_eq!(subset.boxes().len(), subset.confidences().len());
  }

  #[test]
  fn degenerate_box_detection() {
    assert!(BBox::new(0, 0, -1, 5).is_degenerate());
    assert!(!BBox::new(-5, -5, 0, 0).is_degenerate());
    assert_eq!(BBox::new(0, 0, -4, 5).area(), 0.0);
  }
}
