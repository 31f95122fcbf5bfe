// 该文件是 Zhaoying （照影） 项目的一部分。
// src/output.rs - 输出定义
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::{FromUrl, input::StreamInfo};

pub mod draw;

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video_output::{GStreamerVideoOutput, GStreamerVideoOutputError};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

/// 实时流的固定输出文件名
pub const LIVE_OUTPUT_FILE: &str = "live_output.mp4";
const OUTPUT_SUFFIX: &str = "-output";

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("写入帧失败: {0}")]
  WriteFailed(String),
  #[error("不支持的输出: {0}")]
  Unsupported(String),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 帧输出
///
/// 帧按写入顺序落盘；`finish` 负责把容器收尾，可重复调用。
pub trait FrameSink {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OutputError>;

  fn finish(&mut self) -> Result<(), OutputError>;
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OutputError> {
    (**self).write_frame(frame)
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    (**self).finish()
  }
}

pub enum OutputWrapper {
  #[cfg(feature = "gstreamer_output")]
  GStreamerVideoOutput(GStreamerVideoOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_output")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerVideoOutput::SCHEME {
        let output = GStreamerVideoOutput::from_url(url)?;
        return Ok(OutputWrapper::GStreamerVideoOutput(output));
      }
    }
    #[cfg(feature = "directory_record")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == DirectoryRecordOutput::SCHEME {
        let output = DirectoryRecordOutput::from_url(url)?;
        return Ok(OutputWrapper::DirectoryRecordOutput(output));
      }
    }
    Err(OutputError::SchemeMismatch)
  }
}

impl FrameSink for OutputWrapper {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OutputError> {
    match self {
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerVideoOutput(output) => output.write_frame(frame),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output.write_frame(frame),
    }
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    match self {
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerVideoOutput(output) => output.finish(),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output.finish(),
    }
  }
}

/// 文件输入对应的输出路径: `<dir>/<stem>-output<.ext>`
pub fn output_path_for(output_dir: &Path, input: &Path) -> PathBuf {
  let stem = input
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_default();
  let name = match input.extension() {
    Some(ext) => format!("{}{}.{}", stem, OUTPUT_SUFFIX, ext.to_string_lossy()),
    None => format!("{}{}", stem, OUTPUT_SUFFIX),
  };
  output_dir.join(name)
}

/// 实时流的输出路径
pub fn live_output_path(output_dir: &Path) -> PathBuf {
  output_dir.join(LIVE_OUTPUT_FILE)
}

/// 输出路径对应的 URL，尺寸与帧率放在查询参数中
///
/// 启用 GStreamer 输出时写视频文件，否则把帧写成同名目录下的 PNG 序列。
pub fn sink_url(path: &Path, info: &StreamInfo) -> Result<Url, OutputError> {
  let absolute =
    std::path::absolute(path).map_err(|e| OutputError::Unsupported(format!("{}: {}", path.display(), e)))?;
  let mut url = Url::parse(&format!("{}:///", sink_scheme()?))
    .map_err(|e| OutputError::Unsupported(e.to_string()))?;
  url.set_path(&absolute.to_string_lossy());
  url
    .query_pairs_mut()
    .append_pair("width", &info.width.to_string())
    .append_pair("height", &info.height.to_string())
    .append_pair("fps", &info.fps.to_string());
  Ok(url)
}

#[cfg(feature = "gstreamer_output")]
fn sink_scheme() -> Result<&'static str, OutputError> {
  use crate::FromUrlWithScheme;
  Ok(GStreamerVideoOutput::SCHEME)
}

#[cfg(all(not(feature = "gstreamer_output"), feature = "directory_record"))]
fn sink_scheme() -> Result<&'static str, OutputError> {
  use crate::FromUrlWithScheme;
  Ok(DirectoryRecordOutput::SCHEME)
}

#[cfg(not(any(feature = "gstreamer_output", feature = "directory_record")))]
fn sink_scheme() -> Result<&'static str, OutputError> {
  Err(OutputError::Unsupported("未启用任何输出".to_string()))
}
