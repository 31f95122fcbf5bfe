// 该文件是 Zhaoying （照影） 项目的一部分。
// src/detect/decode.rs - 检测张量解码
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

use tracing::debug;

use crate::{
  config::PipelineConfig,
  detect::{BBox, BoxSet, Detection},
  model::DetectionTensor,
};

/// 张量解码器
///
/// 先用 objectness 过滤，再取最大类别分数并用类别阈值过滤，
/// 最后把归一化的中心坐标换算为原图像素坐标。
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
  confidence_threshold: f32,
  class_threshold: f32,
}

impl From<&PipelineConfig> for Decoder {
  fn from(config: &PipelineConfig) -> Self {
    Self::new(config.confidence_threshold(), config.class_threshold())
  }
}

impl Decoder {
  pub fn new(confidence_threshold: f32, class_threshold: f32) -> Self {
    Self {
      confidence_threshold,
      class_threshold,
    }
  }

  /// 解码一帧的检测张量
  ///
  /// 原图被放在边长 `max(w, h)` 的方形左上角后缩放到 `square_size`，
  /// 因此两个方向的缩放系数相同。输出保持张量的行顺序。
  pub fn decode(
    &self,
    tensor: &DetectionTensor,
    original_width: u32,
    original_height: u32,
    square_size: u32,
  ) -> BoxSet {
    let padded = original_width.max(original_height) as f32;
    let x_factor = padded / square_size as f32;
    let y_factor = padded / square_size as f32;

    let mut set = BoxSet::new();
    for row in tensor.rows() {
      if let Some(detection) = self.decode_row(row, x_factor, y_factor) {
        set.push(detection);
      }
    }

    debug!("解码 {} 行, 保留 {} 个候选框", tensor.num_rows(), set.len());
    set
  }

  fn decode_row(&self, row: &[f32], x_factor: f32, y_factor: f32) -> Option<Detection> {
    let confidence = row[4];
    // NaN 不通过
    if !(confidence > self.confidence_threshold) {
      return None;
    }

    // 并列最大值取第一个
    let (class_id, class_score) = row[5..]
      .iter()
      .copied()
      .enumerate()
      .fold((0usize, f32::NEG_INFINITY), |best, (id, score)| {
        if score > best.1 { (id, score) } else { best }
      });
    if !(class_score > self.class_threshold) {
      return None;
    }

    let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
    let bbox = BBox {
      left: ((cx - 0.5 * w) * x_factor) as i32,
      top: ((cy - 0.5 * h) * y_factor) as i32,
      width: (w * x_factor) as i32,
      height: (h * y_factor) as i32,
    };

    Some(Detection {
      confidence,
      class_score,
      class_id,
      bbox,
    })
  }
}
