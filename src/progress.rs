// 该文件是 Zhaoying （照影） 项目的一部分。
// src/progress.rs - 进度上报
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

use std::io::{self, Write};

use serde::Serialize;
use tracing::warn;

/// 两次上报之间进度至少前进的百分点
pub const PROGRESS_STEP: u32 = 10;

/// 标准输出上的一条进度记录
///
/// 序列化为 `{"progress":30,"message":"..."}` 或 `{"output_video":"..."}`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProgressEvent {
  Progress { progress: u32, message: String },
  Completed { output_video: String },
}

impl ProgressEvent {
  /// 终止性失败记录，进度固定为 100
  pub fn failure(message: impl Into<String>) -> Self {
    ProgressEvent::Progress {
      progress: 100,
      message: message.into(),
    }
  }

  pub fn completed(output_video: impl Into<String>) -> Self {
    ProgressEvent::Completed {
      output_video: output_video.into(),
    }
  }

  pub fn to_json(&self) -> String {
    // 两个变体都只含整数与字符串字段，序列化不会失败
    serde_json::to_string(self).unwrap_or_default()
  }
}

/// 进度事件的去处
pub trait ProgressReporter {
  fn report(&mut self, event: &ProgressEvent);
}

/// 测试与嵌入场景下直接收集事件
impl ProgressReporter for Vec<ProgressEvent> {
  fn report(&mut self, event: &ProgressEvent) {
    self.push(event.clone());
  }
}

impl<R: ProgressReporter + ?Sized> ProgressReporter for &mut R {
  fn report(&mut self, event: &ProgressEvent) {
    (**self).report(event)
  }
}

/// 每个事件一行 JSON，写完立即刷新
pub struct JsonLinesReporter<W: Write> {
  writer: W,
}

impl JsonLinesReporter<io::Stdout> {
  pub fn stdout() -> Self {
    Self::new(io::stdout())
  }
}

impl<W: Write> JsonLinesReporter<W> {
  pub fn new(writer: W) -> Self {
    Self { writer }
  }

  pub fn into_inner(self) -> W {
    self.writer
  }
}

impl<W: Write> ProgressReporter for JsonLinesReporter<W> {
  fn report(&mut self, event: &ProgressEvent) {
    let line = event.to_json();
    if let Err(e) = writeln!(self.writer, "{}", line).and_then(|_| self.writer.flush()) {
      warn!("无法写出进度记录: {}", e);
    }
  }
}

/// 文件模式的粗粒度进度统计
///
/// 进度比上次上报前进至少 10 个百分点才产生事件；100 不在这里上报，
/// 由随后的 `output_video` 记录隐含。
#[derive(Debug, Clone)]
pub struct ProgressTracker {
  total: u64,
  processed: u64,
  last_reported: u32,
}

impl ProgressTracker {
  /// `total` 不大于 0 时不产生任何进度事件
  pub fn new(total: i64) -> Self {
    Self {
      total: total.max(0) as u64,
      processed: 0,
      last_reported: 0,
    }
  }

  pub fn processed(&self) -> u64 {
    self.processed
  }

  pub fn last_reported(&self) -> u32 {
    self.last_reported
  }

  /// 记录一帧已处理，需要上报时返回事件
  pub fn advance(&mut self) -> Option<ProgressEvent> {
    self.processed += 1;
    if self.total == 0 {
      return None;
    }

    let progress = (self.processed.saturating_mul(100) / self.total).min(100) as u32;
    if progress >= 100 || progress < self.last_reported + PROGRESS_STEP {
      return None;
    }

    self.last_reported = progress;
    Some(ProgressEvent::Progress {
      progress,
      message: format!("Processing frame {}/{}", self.processed, self.total),
    })
  }
}
