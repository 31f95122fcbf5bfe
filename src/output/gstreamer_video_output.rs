// 该文件是 Zhaoying （照影） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出模块
//!
//! URL 形如 `gst:///videos/clip-output.mp4?width=1280&height=720&fps=30`，
//! 按扩展名选择封装格式：
//!
//! - **MP4** (H.264)，未知扩展名也按 MP4 处理
//! - **MKV** (Matroska)
//! - **AVI**
//! - **WebM** (VP8)
//!
//! `finish` 会发送 EOS 并等待其到达总线，保证容器尾部写完。

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{FrameSink, OutputError},
};

const EOS_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_FPS: f64 = 30.0;

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("缺少参数: {0}")]
  MissingParameter(&'static str),
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 布尔操作错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsrc 元素")]
  AppSrcNotFound,
  #[error("无法转换元素为 appsrc")]
  AppSrcConversionFailed,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("缓冲区创建错误")]
  BufferCreationError,
  #[error("帧尺寸 {actual:?} 与输出尺寸 {expected:?} 不一致")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("路径解码错误: {0}")]
  PathDecodeError(#[from] std::string::FromUtf8Error),
}

/// GStreamer 视频文件输出
pub struct GStreamerVideoOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  video_info: gst_video::VideoInfo,
  fps: f64,
  frame_count: u64,
  finished: bool,
}

impl FromUrlWithScheme for GStreamerVideoOutput {
  const SCHEME: &'static str = "gst";
}

fn pipeline_description(file_path: &str) -> String {
  let location = format!("\"{}\"", file_path.replace('"', "\\\""));
  let lower = file_path.to_lowercase();

  if lower.ends_with(".mkv") {
    format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! matroskamux ! filesink location={}",
      location
    )
  } else if lower.ends_with(".avi") {
    format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc ! avimux ! filesink location={}",
      location
    )
  } else if lower.ends_with(".webm") {
    format!(
      "appsrc name=src ! videoconvert ! vp8enc ! webmmux ! filesink location={}",
      location
    )
  } else {
    format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! mp4mux ! filesink location={}",
      location
    )
  }
}

impl FromUrl for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerVideoOutputError::SchemeMismatch);
    }

    let query: HashMap<_, _> = url.query_pairs().collect();
    let width: u32 = query
      .get("width")
      .and_then(|v| v.parse().ok())
      .ok_or(GStreamerVideoOutputError::MissingParameter("width"))?;
    let height: u32 = query
      .get("height")
      .and_then(|v| v.parse().ok())
      .ok_or(GStreamerVideoOutputError::MissingParameter("height"))?;
    let fps: f64 = query
      .get("fps")
      .and_then(|v| v.parse().ok())
      .filter(|fps: &f64| *fps > 0.0)
      .unwrap_or(DEFAULT_FPS);

    gst::init()?;

    let file_path = urlencoding::decode(url.path())?;
    let description = pipeline_description(&file_path);
    info!("创建视频输出管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerVideoOutputError::PipelineError("无法创建管道".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;

    let video_info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, width, height)
      .fps(gst::Fraction::new((fps * 1000.0).round() as i32, 1000))
      .build()?;
    let caps = video_info.to_caps()?;

    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    info!(
      "视频输出初始化: {}x{} @ {} fps -> {}",
      width, height, fps, file_path
    );

    Ok(GStreamerVideoOutput {
      pipeline,
      appsrc,
      video_info,
      fps,
      frame_count: 0,
      finished: false,
    })
  }
}

impl GStreamerVideoOutput {
  fn push_frame(&mut self, frame: &RgbImage) -> Result<(), GStreamerVideoOutputError> {
    let expected = (self.video_info.width(), self.video_info.height());
    if frame.dimensions() != expected {
      return Err(GStreamerVideoOutputError::FrameSizeMismatch {
        expected,
        actual: frame.dimensions(),
      });
    }

    // 按 GStreamer 的行跨度重新排列
    let stride = self.video_info.stride()[0] as usize;
    let row_bytes = frame.width() as usize * 3;
    let mut data = vec![0u8; self.video_info.size()];
    for (row, src) in frame.as_raw().chunks_exact(row_bytes).enumerate() {
      let start = row * stride;
      data[start..start + row_bytes].copy_from_slice(src);
    }

    let mut buffer = gst::Buffer::from_mut_slice(data);
    let timestamp = (self.frame_count as f64 * 1e9 / self.fps) as u64;
    let duration = (1e9 / self.fps) as u64;
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerVideoOutputError::BufferCreationError)?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(timestamp));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(duration));
    }

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("推送缓冲区失败: {:?}", e))
    })?;
    self.frame_count += 1;

    Ok(())
  }

  fn close(&mut self) -> Result<(), GStreamerVideoOutputError> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;

    let result = self.drain();
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 视频输出管道: {}", e);
    }
    info!("视频输出关闭, 共写入 {} 帧", self.frame_count);
    result
  }

  /// 发送 EOS 并等待封装器写完文件尾
  fn drain(&self) -> Result<(), GStreamerVideoOutputError> {
    self.appsrc.end_of_stream().map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("发送 EOS 失败: {:?}", e))
    })?;

    let Some(bus) = self.pipeline.bus() else {
      return Ok(());
    };
    let message = bus.timed_pop_filtered(
      gst::ClockTime::from_seconds(EOS_TIMEOUT_SECONDS),
      &[gst::MessageType::Eos, gst::MessageType::Error],
    );

    match message.as_ref().map(|m| m.view()) {
      Some(gst::MessageView::Eos(..)) => Ok(()),
      Some(gst::MessageView::Error(err)) => Err(GStreamerVideoOutputError::PipelineError(
        format!("{} ({:?})", err.error(), err.debug()),
      )),
      _ => {
        warn!("等待 EOS 超时");
        Ok(())
      }
    }
  }
}

impl FrameSink for GStreamerVideoOutput {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OutputError> {
    Ok(self.push_frame(frame)?)
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    Ok(self.close()?)
  }
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      warn!("关闭视频输出失败: {}", e);
    }
  }
}
