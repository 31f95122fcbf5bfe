// 该文件是 Zhaoying （照影） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;

use crate::{
  detect::{BBox, BoxSet},
  labels::LabelSet,
  palette::Palette,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_HEIGHT: i32 = 30;
const LABEL_TEXT_OFFSET: i32 = 8;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

#[derive(Error, Debug, PartialEq)]
pub enum AnnotateError {
  #[error("下标 {index} 超出检测框数量 {len}")]
  IndexOutOfRange { index: usize, len: usize },
  #[error("检测框 {index} 尺寸非法: {bbox:?}")]
  DegenerateBox { index: usize, bbox: BBox },
  #[error("检测框 {index} 的类别 {class_id} 不在调色板中")]
  UnknownClass { index: usize, class_id: usize },
}

/// 标签文本，置信度以向下取整的百分比表示
pub fn label_text(label: &str, confidence: f32) -> String {
  format!("{}: {}%", label, (confidence * 100.0).floor() as i32)
}

/// 标签背景的纵坐标
///
/// 背景画在框上方；框贴近图像顶部时下移到 0，与框顶部重叠。
pub fn label_top(box_top: i32) -> i32 {
  box_top.saturating_sub(LABEL_HEIGHT).max(0)
}

/// 把检测框裁剪到图像范围内，返回 (x, y, w, h)；无重叠时返回 None
fn clip_to_image(bbox: &BBox, width: u32, height: u32) -> Option<(i32, i32, u32, u32)> {
  let x_min = (bbox.left as i64).max(0);
  let y_min = (bbox.top as i64).max(0);
  let x_max = bbox.right().min(width as i64);
  let y_max = bbox.bottom().min(height as i64);

  if x_min >= x_max || y_min >= y_max {
    return None;
  }

  Some((
    x_min as i32,
    y_min as i32,
    (x_max - x_min) as u32,
    (y_max - y_min) as u32,
  ))
}

pub struct Annotator {
  font: FontArc,
  font_scale: PxScale,
}

impl Default for Annotator {
  fn default() -> Self {
    Self::new()
  }
}

impl Annotator {
  pub fn new() -> Self {
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontArc::try_from_slice(font_data).expect("无法加载字体");
    Self::with_font(font)
  }

  pub fn with_font(font: FontArc) -> Self {
    Self {
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }

  /// 在图像上绘制保留下来的检测框
  ///
  /// 先检查所有下标，任何一个非法时不修改图像直接返回错误。
  /// 超出图像边界的部分会被裁剪。
  pub fn annotate(
    &self,
    image: &mut RgbImage,
    boxes: &BoxSet,
    keep: &[usize],
    palette: &Palette,
    labels: &LabelSet,
  ) -> Result<usize, AnnotateError> {
    let mut items = Vec::with_capacity(keep.len());
    for &index in keep {
      let (bbox, confidence, class_id) = boxes.get(index).ok_or(AnnotateError::IndexOutOfRange {
        index,
        len: boxes.len(),
      })?;
      if bbox.is_degenerate() {
        return Err(AnnotateError::DegenerateBox { index, bbox });
      }
      let color = palette
        .color(class_id)
        .ok_or(AnnotateError::UnknownClass { index, class_id })?;
      items.push((bbox, color, label_text(labels.name(class_id), confidence)));
    }

    for (bbox, color, text) in items.iter() {
      self.draw_bbox_with_label(image, bbox, *color, text);
    }

    Ok(items.len())
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, bbox: &BBox, color: Rgb<u8>, text: &str) {
    let Some((x, y, width, height)) = clip_to_image(bbox, image.width(), image.height()) else {
      return;
    };

    // 绘制边框（加粗为2像素）
    draw_hollow_rect_mut(image, Rect::at(x, y).of_size(width, height), color);
    if width > 2 && height > 2 {
      let inner = Rect::at(x + 1, y + 1).of_size(width - 2, height - 2);
      draw_hollow_rect_mut(image, inner, color);
    }

    // 标签背景与框同宽
    let label_y = label_top(y);
    let rect = Rect::at(x, label_y).of_size(width, LABEL_HEIGHT as u32);
    draw_filled_rect_mut(image, rect, color);

    draw_text_mut(
      image,
      LABEL_TEXT_COLOR,
      x,
      label_y + LABEL_TEXT_OFFSET,
      self.font_scale,
      &self.font,
      text,
    );
  }
}
