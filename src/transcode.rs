// 该文件是 Zhaoying （照影） 项目的一部分。
// src/transcode.rs - 输入预转码
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
  ffi::OsString,
  path::{Path, PathBuf},
  process::Command,
};

use thiserror::Error;
use tracing::info;

const TRANSCODED_DIR: &str = "transcoded";
const TRANSCODED_EXTENSION: &str = "mp4";

#[derive(Error, Debug)]
pub enum TranscodeError {
  #[error("无法启动 {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },
  #[error("转码失败 ({status}): {stderr}")]
  Failed { status: String, stderr: String },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("输入没有文件名: {0}")]
  NoFileName(PathBuf),
}

/// 调用外部 ffmpeg 把非原生容器转为 H.264 MP4
#[derive(Debug, Clone)]
pub struct Transcoder {
  program: OsString,
  extensions: Vec<String>,
}

impl Default for Transcoder {
  fn default() -> Self {
    Self::new("ffmpeg", ["mov"])
  }
}

impl Transcoder {
  pub fn new<I, S>(program: impl Into<OsString>, extensions: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    Self {
      program: program.into(),
      extensions: extensions
        .into_iter()
        .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
        .collect(),
    }
  }

  /// 扩展名（不区分大小写）在列表中时需要转码
  pub fn needs_transcode(&self, input: &Path) -> bool {
    input
      .extension()
      .and_then(|ext| ext.to_str())
      .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
  }

  /// 转码结果的位置: `<output_dir>/transcoded/<stem>.mp4`
  pub fn target_path(&self, input: &Path, output_dir: &Path) -> Result<PathBuf, TranscodeError> {
    let stem = input
      .file_stem()
      .ok_or_else(|| TranscodeError::NoFileName(input.to_path_buf()))?;
    let mut name = stem.to_os_string();
    name.push(".");
    name.push(TRANSCODED_EXTENSION);
    Ok(output_dir.join(TRANSCODED_DIR).join(name))
  }

  fn command(&self, input: &Path, target: &Path) -> Command {
    let mut cmd = Command::new(&self.program);
    cmd
      .arg("-hide_banner")
      .arg("-loglevel")
      .arg("error")
      .arg("-y")
      .arg("-i")
      .arg(input)
      .arg("-c:v")
      .arg("libx264")
      .arg("-pix_fmt")
      .arg("yuv420p")
      .arg("-an")
      .arg(target);
    cmd
  }

  /// 需要时转码并返回实际要打开的路径，否则原样返回输入路径
  pub fn prepare(&self, input: &Path, output_dir: &Path) -> Result<PathBuf, TranscodeError> {
    if !self.needs_transcode(input) {
      return Ok(input.to_path_buf());
    }

    let target = self.target_path(input, output_dir)?;
    if let Some(parent) = target.parent() {
      std::fs::create_dir_all(parent)?;
    }

    info!("转码 {} -> {}", input.display(), target.display());
    let output = self
      .command(input, &target)
      .output()
      .map_err(|source| TranscodeError::Spawn {
        program: self.program.to_string_lossy().into_owned(),
        source,
      })?;

    if !output.status.success() {
      return Err(TranscodeError::Failed {
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }

    Ok(target)
  }
}
