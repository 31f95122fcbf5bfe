// 该文件是 Zhaoying （照影） 项目的一部分。
// src/job.rs - 一次处理任务的准备、运行与收尾
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
  convert::Infallible,
  panic::{self, AssertUnwindSafe},
  path::{Path, PathBuf},
  str::FromStr,
  sync::{Arc, atomic::AtomicBool},
};

use thiserror::Error;
use tracing::{error, info};

use crate::{
  FromUrl,
  input::{FrameSource, InputError, InputWrapper, StreamInfo, camera_source_url, file_source_url},
  model::Detector,
  output::{
    FrameSink, OutputError, OutputWrapper, live_output_path, output_path_for, sink_url,
  },
  pipeline::{FramePipeline, PipelineError, RunSummary, Session, StreamMode, panic_message},
  progress::{ProgressEvent, ProgressReporter},
  transcode::{TranscodeError, Transcoder},
};

const LIVE_INPUT: &str = "live";
const DEFAULT_OUTPUT_DIR: &str = "videos";
const DEFAULT_CAMERA: &str = "/dev/video0";

/// 命令行给出的输入：文件路径或字面量 `live`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSpec {
  Live,
  File(PathBuf),
}

impl FromStr for InputSpec {
  type Err = Infallible;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s.eq_ignore_ascii_case(LIVE_INPUT) {
      Ok(InputSpec::Live)
    } else {
      Ok(InputSpec::File(PathBuf::from(s)))
    }
  }
}

impl InputSpec {
  pub fn mode(&self) -> StreamMode {
    match self {
      InputSpec::Live => StreamMode::Live,
      InputSpec::File(_) => StreamMode::File,
    }
  }
}

/// 准备阶段的致命错误
#[derive(Error, Debug)]
pub enum SetupError {
  #[error("模型加载失败: {0}")]
  Model(String),
  #[error("无法打开输入: {0}")]
  Source(#[source] InputError),
  #[error("预转码失败: {0}")]
  Transcode(#[from] TranscodeError),
  #[error("无法创建输出目录 {path}: {source}")]
  OutputDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("无法创建输出: {0}")]
  Sink(#[source] OutputError),
}

#[derive(Error, Debug)]
pub enum JobError {
  #[error(transparent)]
  Setup(#[from] SetupError),
  #[error("处理过程中出错: {0}")]
  Run(#[from] PipelineError),
  #[error("处理过程中发生 panic: {0}")]
  Panicked(String),
}

impl JobError {
  /// 终止失败记录中的消息文本
  pub fn progress_message(&self) -> String {
    match self {
      JobError::Setup(SetupError::Model(e)) => format!("Error initializing YOLO model: {}", e),
      JobError::Setup(SetupError::Source(_)) => {
        "Error: Unable to open video source. Please check the input.".to_string()
      }
      JobError::Setup(SetupError::Transcode(e)) => {
        format!("Error: Unable to transcode the input video: {}", e)
      }
      JobError::Setup(SetupError::OutputDir { path, source }) => format!(
        "Error: Unable to create output directory {}: {}",
        path.display(),
        source
      ),
      JobError::Setup(SetupError::Sink(e)) => {
        format!("Error: Unable to create output video: {}", e)
      }
      JobError::Run(e) => format!("An error occurred during processing: {}", e),
      JobError::Panicked(message) => format!("An error occurred during processing: {}", message),
    }
  }
}

/// 上报终止失败记录
pub fn report_failure<R: ProgressReporter + ?Sized>(reporter: &mut R, err: &JobError) {
  error!("任务失败: {}", err);
  reporter.report(&ProgressEvent::failure(err.progress_message()));
}

#[derive(Debug, Clone)]
pub struct JobConfig {
  pub output_dir: PathBuf,
  pub camera: String,
  pub transcoder: Transcoder,
  /// 0 表示不限制
  pub max_frames: u64,
}

impl Default for JobConfig {
  fn default() -> Self {
    Self {
      output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
      camera: DEFAULT_CAMERA.to_string(),
      transcoder: Transcoder::default(),
      max_frames: 0,
    }
  }
}

/// 任务成功结束后的结果
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
  pub output_video: PathBuf,
  pub summary: RunSummary,
}

/// 默认的输入打开方式：目录或视频文件，`live` 时打开摄像头
pub fn open_source(input: &InputSpec, camera: &str) -> Result<InputWrapper, InputError> {
  let url = match input {
    InputSpec::Live => camera_source_url(camera)?,
    InputSpec::File(path) => file_source_url(path)?,
  };
  info!("打开输入: {}", url);
  InputWrapper::from_url(&url)
}

/// 默认的输出打开方式
pub fn open_sink(path: &Path, info: &StreamInfo) -> Result<OutputWrapper, OutputError> {
  let url = sink_url(path, info)?;
  info!("打开输出: {}", url);
  OutputWrapper::from_url(&url)
}

pub struct Job {
  input: InputSpec,
  config: JobConfig,
  interrupt: Option<Arc<AtomicBool>>,
}

impl Job {
  pub fn new(input: InputSpec, config: JobConfig) -> Self {
    Self {
      input,
      config,
      interrupt: None,
    }
  }

  pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
    self.interrupt = Some(interrupt);
    self
  }

  pub fn input(&self) -> &InputSpec {
    &self.input
  }

  pub fn config(&self) -> &JobConfig {
    &self.config
  }

  /// 使用默认的输入输出运行
  pub fn run<D, R>(&self, session: &Session<D>, reporter: &mut R) -> Result<JobOutcome, JobError>
  where
    D: Detector,
    R: ProgressReporter + ?Sized,
  {
    let camera = self.config.camera.clone();
    self.run_with(
      session,
      |input| open_source(input, &camera),
      open_sink,
      reporter,
    )
  }

  /// 运行任务并上报终止记录
  ///
  /// 成功时上报 `output_video`，失败时上报进度为 100 的失败记录。
  pub fn run_with<D, S, K, OS, OK, R>(
    &self,
    session: &Session<D>,
    open_source: OS,
    open_sink: OK,
    reporter: &mut R,
  ) -> Result<JobOutcome, JobError>
  where
    D: Detector,
    S: FrameSource,
    K: FrameSink,
    OS: FnOnce(&InputSpec) -> Result<S, InputError>,
    OK: FnOnce(&Path, &StreamInfo) -> Result<K, OutputError>,
    R: ProgressReporter + ?Sized,
  {
    // 输入输出在 unwind 时由各自的 Drop 释放
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
      self.execute(session, open_source, open_sink, &mut *reporter)
    }))
    .unwrap_or_else(|payload| Err(JobError::Panicked(panic_message(payload.as_ref()))));

    match result {
      Ok(outcome) => {
        info!("输出视频: {}", outcome.output_video.display());
        reporter.report(&ProgressEvent::completed(
          outcome.output_video.display().to_string(),
        ));
        Ok(outcome)
      }
      Err(e) => {
        report_failure(reporter, &e);
        Err(e)
      }
    }
  }

  fn execute<D, S, K, OS, OK, R>(
    &self,
    session: &Session<D>,
    open_source: OS,
    open_sink: OK,
    reporter: &mut R,
  ) -> Result<JobOutcome, JobError>
  where
    D: Detector,
    S: FrameSource,
    K: FrameSink,
    OS: FnOnce(&InputSpec) -> Result<S, InputError>,
    OK: FnOnce(&Path, &StreamInfo) -> Result<K, OutputError>,
    R: ProgressReporter + ?Sized,
  {
    let output_dir = &self.config.output_dir;
    std::fs::create_dir_all(output_dir).map_err(|source| SetupError::OutputDir {
      path: output_dir.clone(),
      source,
    })?;

    let input = match &self.input {
      InputSpec::Live => InputSpec::Live,
      InputSpec::File(path) => InputSpec::File(
        self
          .config
          .transcoder
          .prepare(path, output_dir)
          .map_err(SetupError::from)?,
      ),
    };

    let mut source = open_source(&input).map_err(SetupError::Source)?;
    let mode = input.mode();
    let info = mode.apply(source.info());

    let output_video = match &input {
      InputSpec::Live => live_output_path(output_dir),
      InputSpec::File(path) => output_path_for(output_dir, path),
    };

    let mut sink = match open_sink(&output_video, &info) {
      Ok(sink) => sink,
      Err(e) => {
        source.release();
        return Err(SetupError::Sink(e).into());
      }
    };

    let mut pipeline = FramePipeline::new(session, mode).with_max_frames(self.config.max_frames);
    if let Some(interrupt) = &self.interrupt {
      pipeline = pipeline.with_interrupt(interrupt.clone());
    }

    let summary = pipeline.run(&mut source, &mut sink, reporter)?;
    Ok(JobOutcome {
      output_video,
      summary,
    })
  }
}
