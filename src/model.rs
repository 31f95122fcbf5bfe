// 该文件是 Zhaoying （照影） 项目的一部分。
// src/model.rs - 检测模型
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

use image::RgbImage;
use thiserror::Error;

/// 每行至少包含 cx, cy, w, h, objectness 和一个类别分数
pub const MIN_ROW_LEN: usize = 6;
const CLASS_SCORE_OFFSET: usize = 5;

/// 检测器：把边长为 S 的方形图像映射为原始候选行
pub trait Detector {
  type Error: std::error::Error + Send + Sync + 'static;

  fn forward(&self, square: &RgbImage) -> Result<DetectionTensor, Self::Error>;
}

#[derive(Error, Debug, PartialEq)]
pub enum TensorError {
  #[error("行长度过短: {0} (至少 6)")]
  RowTooShort(usize),
  #[error("数据长度 {len} 不是行长度 {row_len} 的整数倍")]
  Misaligned { len: usize, row_len: usize },
  #[error("第 {row} 行长度为 {actual}, 期望 {expected}")]
  RaggedRow {
    row: usize,
    expected: usize,
    actual: usize,
  },
}

/// 原始检测张量，按行存储
///
/// 行布局: `[cx, cy, w, h, objectness, class_score_0 .. class_score_{nc-1}]`，
/// 坐标相对于网络输入方形。
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionTensor {
  data: Box<[f32]>,
  row_len: usize,
}

impl DetectionTensor {
  pub fn new(data: Vec<f32>, row_len: usize) -> Result<Self, TensorError> {
    if row_len < MIN_ROW_LEN {
      return Err(TensorError::RowTooShort(row_len));
    }
    if data.len() % row_len != 0 {
      return Err(TensorError::Misaligned {
        len: data.len(),
        row_len,
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
      row_len,
    })
  }

  /// 空张量，行长度取 `5 + nc`
  pub fn empty(nc: usize) -> Self {
    Self {
      data: Vec::new().into_boxed_slice(),
      row_len: (CLASS_SCORE_OFFSET + nc).max(MIN_ROW_LEN),
    }
  }

  pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, TensorError> {
    let Some(expected) = rows.first().map(Vec::len) else {
      return Ok(Self::empty(1));
    };

    let mut data = Vec::with_capacity(expected * rows.len());
    for (row, values) in rows.into_iter().enumerate() {
      if values.len() != expected {
        return Err(TensorError::RaggedRow {
          row,
          expected,
          actual: values.len(),
        });
      }
      data.extend(values);
    }

    Self::new(data, expected)
  }

  pub fn row_len(&self) -> usize {
    self.row_len
  }

  pub fn num_classes(&self) -> usize {
    self.row_len - CLASS_SCORE_OFFSET
  }

  pub fn num_rows(&self) -> usize {
    self.data.len() / self.row_len
  }

  pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
    self.data.chunks_exact(self.row_len)
  }
}

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxDetector, OnnxDetectorBuilder, OnnxDetectorError, model_url};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rows_are_split_by_row_len() {
    let tensor = DetectionTensor::new((0..14).map(|v| v as f32).collect(), 7).unwrap();
    assert_eq!(tensor.num_rows(), 2);
    assert_eq!(tensor.num_classes(), 2);
    let rows: Vec<&[f32]> = tensor.rows().collect();
    assert_eq!(rows[1][0], 7.0);
  }

  #[test]
  fn rejects_malformed_shapes() {
    assert_eq!(
      DetectionTensor::new(vec![0.0; 5], 5),
      Err(TensorError::RowTooShort(5))
    );
    assert_eq!(
      DetectionTensor::new(vec![0.0; 13], 6),
      Err(TensorError::Misaligned { len: 13, row_len: 6 })
    );
    assert_eq!(
      DetectionTensor::from_rows(vec![vec![0.0; 6], vec![0.0; 7]]),
      Err(TensorError::RaggedRow {
        row: 1,
        expected: 6,
        actual: 7
      })
    );
  }

  #[test]
  fn empty_tensor_has_no_rows() {
    let tensor = DetectionTensor::empty(3);
    assert_eq!(tensor.num_rows(), 0);
    assert_eq!(tensor.num_classes(), 3);
    assert_eq!(DetectionTensor::from_rows(Vec::new()).unwrap().num_rows(), 0);
  }
}
