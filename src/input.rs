// 该文件是 Zhaoying （照影） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use std::path::Path;

use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::FromUrl;

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageSequenceInput, ImageSequenceInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputBuilder, GStreamerInputError};

/// 实时流固定使用的帧率
pub const LIVE_FPS: f64 = 30.0;

/// 打开输入后探测得到的流参数
///
/// `frame_count` 为 -1 表示长度未知。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
  pub width: u32,
  pub height: u32,
  pub fps: f64,
  pub frame_count: i64,
}

impl StreamInfo {
  /// 实时流: 帧率固定为 30，长度未知
  pub fn live(self) -> Self {
    Self {
      fps: LIVE_FPS,
      frame_count: -1,
      ..self
    }
  }

  pub fn has_known_length(&self) -> bool {
    self.frame_count > 0
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像序列输入错误: {0}")]
  ImageSequenceInputError(#[from] ImageSequenceInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("输入已读完")]
  Exhausted,
  #[error("读取帧失败: {0}")]
  ReadFailed(String),
  #[error("不支持的输入: {0}")]
  Unsupported(String),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

impl InputError {
  pub fn is_exhausted(&self) -> bool {
    matches!(self, InputError::Exhausted)
  }
}

/// 帧来源
///
/// `read_frame` 失败对文件输入意味着结束，对实时输入只是暂时没有数据。
pub trait FrameSource {
  fn info(&self) -> StreamInfo;

  fn read_frame(&mut self) -> Result<RgbImage, InputError>;

  /// 释放底层资源，可重复调用
  fn release(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn info(&self) -> StreamInfo {
    (**self).info()
  }

  fn read_frame(&mut self) -> Result<RgbImage, InputError> {
    (**self).read_frame()
  }

  fn release(&mut self) {
    (**self).release()
  }
}

pub enum InputWrapper {
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
  #[cfg(feature = "read_image_file")]
  ImageSequence(ImageSequenceInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerInputBuilder::SCHEME {
        let input = GStreamerInputBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::GStreamerInput(input));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageSequenceInput::SCHEME {
        let input = ImageSequenceInput::from_url(url)?;
        return Ok(InputWrapper::ImageSequence(input));
      }
    }
    Err(InputError::SchemeMismatch)
  }
}

impl FrameSource for InputWrapper {
  fn info(&self) -> StreamInfo {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.info(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageSequence(input) => input.info(),
    }
  }

  fn read_frame(&mut self) -> Result<RgbImage, InputError> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.read_frame(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageSequence(input) => input.read_frame(),
    }
  }

  fn release(&mut self) {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.release(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageSequence(input) => input.release(),
    }
  }
}

/// 本地文件对应的输入 URL
///
/// 目录作为图像序列读取，其他文件交给 GStreamer 解码。
pub fn file_source_url(path: &Path) -> Result<Url, InputError> {
  let absolute = std::path::absolute(path)
    .map_err(|e| InputError::Unsupported(format!("{}: {}", path.display(), e)))?;

  if absolute.is_dir() {
    return directory_url(&absolute);
  }
  video_file_url(&absolute)
}

/// 摄像头设备对应的输入 URL
pub fn camera_source_url(device: &str) -> Result<Url, InputError> {
  url_with_path("gst://camera", device)
}

fn url_with_path(base: &str, path: &str) -> Result<Url, InputError> {
  let mut url = Url::parse(base).map_err(|e| InputError::Unsupported(e.to_string()))?;
  url.set_path(path);
  Ok(url)
}

#[cfg(feature = "read_image_file")]
fn directory_url(path: &Path) -> Result<Url, InputError> {
  url_with_path("folder:///", &path.to_string_lossy())
}

#[cfg(not(feature = "read_image_file"))]
fn directory_url(path: &Path) -> Result<Url, InputError> {
  Err(InputError::Unsupported(path.display().to_string()))
}

#[cfg(feature = "gstreamer_input")]
fn video_file_url(path: &Path) -> Result<Url, InputError> {
  url_with_path("gst://file", &path.to_string_lossy())
}

#[cfg(not(feature = "gstreamer_input"))]
fn video_file_url(path: &Path) -> Result<Url, InputError> {
  Err(InputError::Unsupported(path.display().to_string()))
}
