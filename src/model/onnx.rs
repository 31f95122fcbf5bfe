// 该文件是 Zhaoying （照影） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 检测器
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
use ndarray::Array;
use ort::{CPUExecutionProvider, CUDAExecutionProvider, GraphOptimizationLevel, Session, inputs};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::to_nchw_blob,
  model::{DetectionTensor, Detector, TensorError},
};

#[derive(Error, Debug)]
pub enum OnnxDetectorError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("输入形状错误: {0}")]
  ShapeError(#[from] ndarray::ShapeError),
  #[error("检测张量错误: {0}")]
  TensorError(#[from] TensorError),
  #[error("模型没有输入")]
  NoInput,
  #[error("模型没有输出")]
  NoOutput,
  #[error("不支持的输出形状: {0:?}")]
  UnexpectedShape(Vec<usize>),
  #[error("输入图像不是方形: {0}x{1}")]
  NotSquare(u32, u32),
  #[error("无效的模型路径 {0}: {1}")]
  InvalidPath(PathBuf, String),
}

/// YOLO 风格的 ONNX 模型，输出 `[1, N, 5 + nc]` 或 `[N, 5 + nc]`
pub struct OnnxDetector {
  session: Session,
  input_name: String,
}

/// ONNX 检测器构建器
///
/// 也可以从 `onnx:///models/best.onnx?gpu=true` 构建。
pub struct OnnxDetectorBuilder {
  path: PathBuf,
  use_gpu: bool,
}

impl OnnxDetectorBuilder {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      use_gpu: false,
    }
  }

  /// 使用 CUDA 执行，不可用时 ONNX Runtime 会回退到 CPU
  pub fn use_gpu(mut self, use_gpu: bool) -> Self {
    self.use_gpu = use_gpu;
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn build(self) -> Result<OnnxDetector, OnnxDetectorError> {
    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    let builder = if self.use_gpu {
      builder.with_execution_providers([
        CUDAExecutionProvider::default().build(),
        CPUExecutionProvider::default().build(),
      ])?
    } else {
      builder.with_execution_providers([CPUExecutionProvider::default().build()])?
    };
    let session = builder.commit_from_file(&self.path)?;

    let input_name = session
      .inputs
      .first()
      .map(|input| input.name.clone())
      .ok_or(OnnxDetectorError::NoInput)?;
    if session.outputs.is_empty() {
      return Err(OnnxDetectorError::NoOutput);
    }

    info!(
      "加载 ONNX 模型: {} (输入 {}, GPU: {})",
      self.path.display(),
      input_name,
      self.use_gpu
    );

    Ok(OnnxDetector {
      session,
      input_name,
    })
  }
}

/// 模型文件对应的 `onnx:///<path>[?gpu=true]`
pub fn model_url(path: &Path, use_gpu: bool) -> Result<Url, OnnxDetectorError> {
  let invalid = |e: String| OnnxDetectorError::InvalidPath(path.to_path_buf(), e);
  let absolute = std::path::absolute(path).map_err(|e| invalid(e.to_string()))?;
  let mut url = Url::parse(&format!("{}:///", OnnxDetectorBuilder::SCHEME))
    .map_err(|e| invalid(e.to_string()))?;
  url.set_path(&absolute.to_string_lossy());
  if use_gpu {
    url.query_pairs_mut().append_pair("gpu", "true");
  }
  Ok(url)
}

impl FromUrlWithScheme for OnnxDetectorBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxDetectorBuilder {
  type Error = OnnxDetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxDetectorError::SchemeMismatch);
    }

    let path = urlencoding::decode(url.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| url.path().to_string());
    let use_gpu = url
      .query_pairs()
      .any(|(k, v)| k == "gpu" && (v.is_empty() || v == "true" || v == "1"));

    Ok(Self::new(path).use_gpu(use_gpu))
  }
}

impl Detector for OnnxDetector {
  type Error = OnnxDetectorError;

  fn forward(&self, square: &RgbImage) -> Result<DetectionTensor, Self::Error> {
    let (width, height) = square.dimensions();
    if width != height {
      return Err(OnnxDetectorError::NotSquare(width, height));
    }

    let side = width as usize;
    let input = Array::from_shape_vec((1, 3, side, side), to_nchw_blob(square))?;
    let outputs = self
      .session
      .run(inputs![self.input_name.as_str() => input.view()]?)?;

    let tensor = outputs[0].try_extract_tensor::<f32>()?;
    let shape = tensor.shape().to_vec();

    let row_len = match shape.as_slice() {
      [1, _, row_len] | [_, row_len] => *row_len,
      _ => return Err(OnnxDetectorError::UnexpectedShape(shape.clone())),
    };
    debug!("模型输出形状: {:?}", shape);

    let data: Vec<f32> = tensor.iter().copied().collect();
    Ok(DetectionTensor::new(data, row_len)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_follows_model_url() {
    let url = model_url(Path::new("/srv/models/best model.onnx"), true).unwrap();
    assert_eq!(url.scheme(), "onnx");
    let builder = OnnxDetectorBuilder::from_url(&url).unwrap();
    assert_eq!(builder.path(), Path::new("/srv/models/best model.onnx"));
    assert!(builder.use_gpu);

    let url = model_url(Path::new("/srv/models/best.onnx"), false).unwrap();
    assert!(!OnnxDetectorBuilder::from_url(&url).unwrap().use_gpu);
  }

  #[test]
  fn other_schemes_are_rejected() {
    let url = Url::parse("file:///srv/models/best.onnx").unwrap();
    assert!(matches!(
      OnnxDetectorBuilder::from_url(&url),
      Err(OnnxDetectorError::SchemeMismatch)
    ));
  }
}
