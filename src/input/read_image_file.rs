// 该文件是 Zhaoying （照影） 项目的一部分。
// src/input/read_image_file.rs - 图像序列输入
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

use std::{
  collections::VecDeque,
  path::{Path, PathBuf},
};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{FrameSource, InputError, StreamInfo},
};

const DEFAULT_FPS: f64 = 30.0;
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Error, Debug)]
pub enum ImageSequenceInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("目录中没有图像: {0}")]
  EmptyDirectory(PathBuf),
  #[error("路径解码错误: {0}")]
  PathDecodeError(#[from] std::string::FromUtf8Error),
}

/// 把目录中的图像按文件名顺序当作视频帧读取
///
/// URL 形如 `folder:///path/to/frames?fps=25`，帧尺寸取第一张图像。
pub struct ImageSequenceInput {
  pending: VecDeque<PathBuf>,
  info: StreamInfo,
}

impl FromUrlWithScheme for ImageSequenceInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageSequenceInput {
  type Error = ImageSequenceInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageSequenceInputError::SchemeMismatch);
    }

    let directory = PathBuf::from(urlencoding::decode(url.path())?.into_owned());
    let fps = url
      .query_pairs()
      .find(|(k, _)| k == "fps")
      .and_then(|(_, v)| v.parse::<f64>().ok())
      .filter(|fps| *fps > 0.0)
      .unwrap_or(DEFAULT_FPS);

    Self::open(directory, fps)
  }
}

impl ImageSequenceInput {
  pub fn open(directory: PathBuf, fps: f64) -> Result<Self, ImageSequenceInputError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(&directory)? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
      if path.is_file() && is_image {
        files.push(path);
      }
    }
    files.sort();

    let first = files
      .first()
      .ok_or_else(|| ImageSequenceInputError::EmptyDirectory(directory.clone()))?;
    let (width, height) = ImageReader::open(first)?
      .with_guessed_format()?
      .into_dimensions()?;

    info!(
      "图像序列 {}: {} 帧, {}x{}",
      directory.display(),
      files.len(),
      width,
      height
    );

    Ok(Self {
      info: StreamInfo {
        width,
        height,
        fps,
        frame_count: files.len() as i64,
      },
      pending: files.into(),
    })
  }

  fn load(path: &Path) -> Result<RgbImage, ImageSequenceInputError> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(image.into_rgb8())
  }
}

impl FrameSource for ImageSequenceInput {
  fn info(&self) -> StreamInfo {
    self.info
  }

  fn read_frame(&mut self) -> Result<RgbImage, InputError> {
    let path = self.pending.pop_front().ok_or(InputError::Exhausted)?;
    Ok(Self::load(&path)?)
  }

  fn release(&mut self) {
    self.pending.clear();
  }
}
