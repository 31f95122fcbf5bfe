// 该文件是 Zhaoying （照影） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{FrameSink, OutputError},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("路径解码错误: {0}")]
  PathDecodeError(#[from] std::string::FromUtf8Error),
}

/// 把每一帧保存为目录中的 `frame-000001.png`
///
/// 目录在第一次写入前创建。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_count: u64,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let directory = PathBuf::from(urlencoding::decode(uri.path())?.into_owned());
    Ok(Self::new(directory))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: PathBuf) -> Self {
    DirectoryRecordOutput {
      directory,
      frame_count: 0,
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_path(&mut self) -> Result<PathBuf, DirectoryRecordOutputError> {
    if !self.directory.exists() {
      std::fs::create_dir_all(&self.directory)?;
    }
    self.frame_count += 1;
    Ok(
      self
        .directory
        .join(format!("frame-{:06}.png", self.frame_count)),
    )
  }
}

impl FrameSink for DirectoryRecordOutput {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OutputError> {
    let path = self.frame_path()?;
    frame
      .save(&path)
      .map_err(DirectoryRecordOutputError::from)?;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    info!(
      "目录输出 {} 完成, 共 {} 帧",
      self.directory.display(),
      self.frame_count
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn frames_are_numbered_in_write_order() {
    let root = tempfile::tempdir().unwrap();
    let directory = root.path().join("clip-output.mp4");
    let mut output = DirectoryRecordOutput::new(directory.clone());

    output
      .write_frame(&RgbImage::from_pixel(4, 4, Rgb([1, 2, 3])))
      .unwrap();
    output
      .write_frame(&RgbImage::from_pixel(4, 4, Rgb([4, 5, 6])))
      .unwrap();
    output.finish().unwrap();

    let second = image::open(directory.join("frame-000002.png"))
      .unwrap()
      .into_rgb8();
    assert_eq!(second.get_pixel(0, 0), &Rgb([4, 5, 6]));
    assert!(directory.join("frame-000001.png").exists());
  }

  #[test]
  fn directory_comes_from_decoded_url_path() {
    let url = url::Url::parse("folder:///tmp/out%20dir/clip-output.mp4?width=4&height=4").unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    assert_eq!(output.directory(), Path::new("/tmp/out dir/clip-output.mp4"));
  }

  #[test]
  fn rejects_other_schemes() {
    let url = url::Url::parse("gst:///tmp/out.mp4").unwrap();
    assert!(matches!(
      DirectoryRecordOutput::from_url(&url),
      Err(DirectoryRecordOutputError::SchemeMismatch)
    ));
  }
}
