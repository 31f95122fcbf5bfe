// 该文件是 Zhaoying （照影） 项目的一部分。
// src/config.rs - 流水线阈值配置
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

use thiserror::Error;
use tracing::info;

/// 网络输入方形边长
pub const INPUT_SQUARE_SIZE: u32 = 640;
/// NMS 分数阈值
pub const NMS_SCORE_THRESHOLD: f32 = 0.25;
/// NMS IoU 阈值
pub const NMS_IOU_THRESHOLD: f32 = 0.45;

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.4;
const DEFAULT_CLASS_THRESHOLD: f32 = 0.25;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("{name} 超出范围 [0, 1]: {value}")]
  OutOfRange { name: &'static str, value: f32 },
}

/// 检测后处理配置
///
/// 置信度与类别阈值可在运行时通过 [`PipelineConfig::update`] 修改，
/// 其余参数固定。
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
  confidence_threshold: f32,
  class_threshold: f32,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      class_threshold: DEFAULT_CLASS_THRESHOLD,
    }
  }
}

/// 阈值更新请求，`None` 表示保持原值
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdUpdate {
  pub confidence_threshold: Option<f32>,
  pub class_threshold: Option<f32>,
}

impl ThresholdUpdate {
  pub fn confidence(mut self, value: f32) -> Self {
    self.confidence_threshold = Some(value);
    self
  }

  pub fn class(mut self, value: f32) -> Self {
    self.class_threshold = Some(value);
    self
  }
}

fn check_unit(name: &'static str, value: f32) -> Result<f32, ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(value)
  } else {
    Err(ConfigError::OutOfRange { name, value })
  }
}

impl PipelineConfig {
  pub fn new(confidence_threshold: f32, class_threshold: f32) -> Result<Self, ConfigError> {
    Ok(Self {
      confidence_threshold: check_unit("confidence_threshold", confidence_threshold)?,
      class_threshold: check_unit("class_threshold", class_threshold)?,
    })
  }

  pub fn confidence_threshold(&self) -> f32 {
    self.confidence_threshold
  }

  pub fn class_threshold(&self) -> f32 {
    self.class_threshold
  }

  pub fn input_square_size(&self) -> u32 {
    INPUT_SQUARE_SIZE
  }

  pub fn nms_score_threshold(&self) -> f32 {
    NMS_SCORE_THRESHOLD
  }

  pub fn nms_iou_threshold(&self) -> f32 {
    NMS_IOU_THRESHOLD
  }

  /// 应用阈值更新；任一值越界时整体拒绝，配置保持不变
  pub fn update(&mut self, update: ThresholdUpdate) -> Result<(), ConfigError> {
    let confidence = match update.confidence_threshold {
      Some(v) => check_unit("confidence_threshold", v)?,
      None => self.confidence_threshold,
    };
    let class = match update.class_threshold {
      Some(v) => check_unit("class_threshold", v)?,
      None => self.class_threshold,
    };

    self.confidence_threshold = confidence;
    self.class_threshold = class;
    info!(
      "阈值已更新: confidence={}, class={}",
      self.confidence_threshold, self.class_threshold
    );
    Ok(())
  }
}
