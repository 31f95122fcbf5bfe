// 该文件是 Zhaoying （照影） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 支持两类来源：
//! - 视频文件: `gst://file/path/to/video.mp4`
//! - 摄像头（V4L2）: `gst://camera/dev/video0?width=1280&height=720&fps=30`
//!
//! 打开时会先拉取第一帧，用其 caps 探测宽高与帧率；文件长度
//! 通过时长查询换算为帧数，查询失败时为 -1。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{FrameSource, InputError, StreamInfo},
};

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 布尔操作错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsink 元素")]
  AppSinkNotFound,
  #[error("无法转换元素为 appsink")]
  AppSinkConversionFailed,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式")]
  UnsupportedFormat,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("路径解码错误: {0}")]
  PathDecodeError(#[from] std::string::FromUtf8Error),
}

enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
  },
  TargetFormat {
    format: String,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!(
          "filesrc location=\"{}\" ! decodebin",
          path.replace('"', "\\\"")
        )
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        width,
        height,
        fps,
      } => {
        let mut caps = Vec::new();
        if let Some(width) = width {
          caps.push(format!("width={}", width));
        }
        if let Some(height) = height {
          caps.push(format!("height={}", height));
        }
        if let Some(fps) = fps {
          caps.push(format!("framerate={}/1", fps));
        }
        if caps.is_empty() {
          format!("v4l2src device={}", camera)
        } else {
          format!("v4l2src device={} ! video/x-raw,{}", camera, caps.join(","))
        }
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  live: bool,
}

impl GStreamerInputBuilder {
  pub fn file(path: &str) -> Self {
    Self {
      items: vec![GStreamerInputBuilderItem::FileSource(path.to_string())],
      live: false,
    }
  }

  pub fn camera(device: &str) -> Self {
    Self {
      items: vec![GStreamerInputBuilderItem::CameraSource {
        camera: device.to_string(),
        width: None,
        height: None,
        fps: None,
      }],
      live: true,
    }
  }

  fn camera_with_query(device: &str, query: &HashMap<String, String>) -> Self {
    let parse = |key: &str| query.get(key).and_then(|v| v.parse::<u32>().ok());
    Self {
      items: vec![GStreamerInputBuilderItem::CameraSource {
        camera: device.to_string(),
        width: parse("width"),
        height: parse("height"),
        fps: parse("fps"),
      }],
      live: true,
    }
  }

  fn description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .chain(std::iter::once(
        GStreamerInputBuilderItem::TargetFormat {
          format: "RGB".to_string(),
        }
        .to_pipeline(),
      ))
      .collect::<Vec<String>>()
      .join(" ! ");

    // 文件输入不能丢帧，摄像头只保留最新的帧
    if self.live {
      format!(
        "{} ! appsink max-buffers=2 drop=true name=sink",
        basic_pipeline
      )
    } else {
      format!(
        "{} ! appsink max-buffers=2 drop=false sync=false name=sink",
        basic_pipeline
      )
    }
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let description = self.description();
    info!("GStreamer 输入管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    let mut input = GStreamerInput {
      pipeline,
      appsink,
      pending: None,
      info: StreamInfo {
        width: 0,
        height: 0,
        fps: 0.0,
        frame_count: -1,
      },
      released: false,
    };
    input.probe()?;

    Ok(input)
  }
}

impl FromUrlWithScheme for GStreamerInputBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let path = urlencoding::decode(url.path())?;

    match url.host_str() {
      Some("camera") => Ok(Self::camera_with_query(&path, &query)),
      Some("file") => Ok(Self::file(&path)),
      _ => Err(GStreamerInputError::SchemeMismatch),
    }
  }
}

/// GStreamer 视频输入
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  pending: Option<RgbImage>,
  info: StreamInfo,
  released: bool,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    self.release();
  }
}

impl GStreamerInput {
  /// 拉取第一帧，探测宽高、帧率与总帧数
  fn probe(&mut self) -> Result<(), GStreamerInputError> {
    let sample = self
      .appsink
      .pull_sample()
      .map_err(|e| GStreamerInputError::PipelineError(format!("无法读取第一帧: {}", e)))?;
    let caps = sample
      .caps()
      .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;
    let video_info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

    let fraction = video_info.fps();
    let fps = if fraction.denom() > 0 && fraction.numer() > 0 {
      fraction.numer() as f64 / fraction.denom() as f64
    } else {
      0.0
    };
    let frame_count = self
      .pipeline
      .query_duration::<gst::ClockTime>()
      .filter(|_| fps > 0.0)
      .map(|duration| (duration.nseconds() as f64 / 1e9 * fps).round() as i64)
      .unwrap_or(-1);

    self.info = StreamInfo {
      width: video_info.width(),
      height: video_info.height(),
      fps,
      frame_count,
    };
    info!(
      "GStreamer 输入: {}x{} @ {:.2} fps, {} 帧",
      self.info.width, self.info.height, self.info.fps, self.info.frame_count
    );

    self.pending = Some(convert_sample_to_rgb(&sample)?);
    Ok(())
  }
}

impl FrameSource for GStreamerInput {
  fn info(&self) -> StreamInfo {
    self.info
  }

  fn read_frame(&mut self) -> Result<RgbImage, InputError> {
    if let Some(frame) = self.pending.take() {
      return Ok(frame);
    }
    if self.released {
      return Err(InputError::Exhausted);
    }

    match self.appsink.pull_sample() {
      Ok(sample) => Ok(convert_sample_to_rgb(&sample)?),
      Err(_) if self.appsink.is_eos() => Err(InputError::Exhausted),
      Err(e) => {
        debug!("拉取样本失败: {}", e);
        Err(InputError::ReadFailed(e.to_string()))
      }
    }
  }

  fn release(&mut self) {
    if self.released {
      return;
    }
    self.released = true;
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 输入管道: {}", e);
    }
  }
}

/// 按行跨度拷贝像素，BGR 会被转换为 RGB
fn convert_sample_to_rgb(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;
  let row_bytes = width * 3;

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let expected_size = stride * height.saturating_sub(1) + row_bytes;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row_bytes * height);
  match video_info.format() {
    gst_video::VideoFormat::Rgb => {
      for row in 0..height {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + row_bytes]);
      }
    }
    gst_video::VideoFormat::Bgr => {
      for row in 0..height {
        let start = row * stride;
        for bgr in data[start..start + row_bytes].chunks_exact(3) {
          pixels.extend_from_slice(&[bgr[2], bgr[1], bgr[0]]);
        }
      }
    }
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  }

  RgbImage::from_raw(width as u32, height as u32, pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: row_bytes * height,
      actual: 0,
    },
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn file_pipeline_does_not_drop_frames() {
    let url = Url::parse("gst://file/tmp/my%20clip.mp4").unwrap();
    let description = GStreamerInputBuilder::from_url(&url).unwrap().description();
    assert!(description.starts_with("filesrc location=\"/tmp/my clip.mp4\" ! decodebin"));
    assert!(description.contains("video/x-raw,format=RGB"));
    assert!(description.ends_with("drop=false sync=false name=sink"));
  }

  #[test]
  fn camera_pipeline_uses_requested_caps() {
    let url = Url::parse("gst://camera/dev/video2?width=1280&fps=30").unwrap();
    let description = GStreamerInputBuilder::from_url(&url).unwrap().description();
    assert!(
      description.starts_with("v4l2src device=/dev/video2 ! video/x-raw,width=1280,framerate=30/1")
    );
    assert!(description.ends_with("drop=true name=sink"));
  }

  #[test]
  fn unknown_host_is_rejected() {
    let url = Url::parse("gst://rtsp/stream").unwrap();
    assert!(matches!(
      GStreamerInputBuilder::from_url(&url),
      Err(GStreamerInputError::SchemeMismatch)
    ));
  }
}
