// 该文件是 Zhaoying （照影） 项目的一部分。
// src/bin/process.rs - 处理一个视频文件、图片目录或实时摄像头
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
  path::PathBuf,
  process::ExitCode,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use zhaoying::{
  FromUrl,
  config::PipelineConfig,
  job::{InputSpec, Job, JobConfig, JobError, SetupError, report_failure},
  labels::LabelSet,
  model::{OnnxDetector, OnnxDetectorBuilder, model_url},
  pipeline::Session,
  progress::JsonLinesReporter,
  transcode::Transcoder,
};

/// 照影：在视频上叠加目标检测结果
///
/// 进度以 JSON 行写到标准输出，日志写到标准错误。
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入视频文件、图片目录，或 `live` 表示摄像头
  #[arg(value_name = "INPUT")]
  pub input: String,

  /// ONNX 模型文件路径
  #[arg(long, value_name = "FILE", default_value = "models/best.onnx")]
  pub model: PathBuf,

  /// 类别描述文件 (YAML, 含 `names`)
  #[arg(long, value_name = "FILE", default_value = "models/data.yaml")]
  pub data: PathBuf,

  /// 输出目录
  #[arg(long, value_name = "DIR", default_value = "videos")]
  pub output_dir: PathBuf,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD", default_value_t = 0.4)]
  pub confidence: f32,

  /// 类别分数阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD", default_value_t = 0.25)]
  pub class_threshold: f32,

  /// 使用 CUDA 推理
  #[arg(long)]
  pub gpu: bool,

  /// `live` 输入使用的摄像头设备
  #[arg(long, value_name = "DEVICE", default_value = "/dev/video0")]
  pub camera: String,

  /// 需要先用 ffmpeg 转码的扩展名
  #[arg(long = "transcode-ext", value_name = "EXT", default_value = "mov")]
  pub transcode_ext: Vec<String>,

  /// ffmpeg 可执行文件
  #[arg(long, value_name = "PROGRAM", default_value = "ffmpeg")]
  pub ffmpeg: String,

  /// 最多处理的帧数，0 表示不限制
  #[arg(long, value_name = "COUNT", default_value_t = 0)]
  pub max_frames: u64,
}

fn load_session(args: &Args) -> Result<Session<OnnxDetector>> {
  let labels = LabelSet::from_yaml_file(&args.data)
    .with_context(|| format!("无法读取类别描述 {}", args.data.display()))?;
  let config = PipelineConfig::new(args.confidence, args.class_threshold)?;
  let builder = OnnxDetectorBuilder::from_url(&model_url(&args.model, args.gpu)?)?;
  info!("模型 URL 解析为 {}", builder.path().display());
  let detector = builder
    .build()
    .with_context(|| format!("无法加载模型 {}", args.model.display()))?;
  Ok(Session::new(detector, labels, config))
}

/// SIGINT、SIGTERM 与 SIGHUP 都只置位停止标志，由流水线完成收尾
fn install_interrupt_handler() -> Result<Arc<AtomicBool>> {
  let interrupt = Arc::new(AtomicBool::new(false));
  let flag = interrupt.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    flag.store(true, Ordering::SeqCst);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置中断信号处理函数")?;
  Ok(interrupt)
}

fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let mut reporter = JsonLinesReporter::stdout();

  info!("模型文件路径: {}", args.model.display());
  info!("输入来源: {}", args.input);
  info!("输出目录: {}", args.output_dir.display());

  let session = match load_session(&args) {
    Ok(session) => session,
    Err(e) => {
      let err = JobError::from(SetupError::Model(format!("{:#}", e)));
      report_failure(&mut reporter, &err);
      return ExitCode::FAILURE;
    }
  };

  let input: InputSpec = match args.input.parse() {
    Ok(input) => input,
    Err(never) => match never {},
  };

  let config = JobConfig {
    output_dir: args.output_dir.clone(),
    camera: args.camera.clone(),
    transcoder: Transcoder::new(args.ffmpeg.clone(), &args.transcode_ext),
    max_frames: args.max_frames,
  };

  let mut job = Job::new(input, config);
  match install_interrupt_handler() {
    Ok(interrupt) => job = job.with_interrupt(interrupt),
    Err(e) => warn!("{:#}", e),
  }

  match job.run(&session, &mut reporter) {
    Ok(outcome) => {
      info!(
        "完成: {} 帧写入 {}",
        outcome.summary.frames_written,
        outcome.output_video.display()
      );
      ExitCode::SUCCESS
    }
    Err(_) => ExitCode::FAILURE,
  }
}
