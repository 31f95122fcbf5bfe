// 该文件是 Zhaoying （照影） 项目的一部分。
// src/pipeline.rs - 逐帧检测与标注流水线
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
  any::Any,
  panic::{self, AssertUnwindSafe},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  config::{ConfigError, PipelineConfig, ThresholdUpdate},
  detect::{BoxSet, Decoder},
  frame::letterbox_resized,
  input::{FrameSource, StreamInfo},
  labels::LabelSet,
  model::Detector,
  output::{
    FrameSink, OutputError,
    draw::{AnnotateError, Annotator},
  },
  palette::Palette,
  progress::{ProgressReporter, ProgressTracker},
};

/// 单帧处理失败的原因；流水线会改为输出原始帧
#[derive(Error, Debug)]
pub enum FrameError {
  #[error("检测器错误: {0}")]
  Detector(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("标注错误: {0}")]
  Annotate(#[from] AnnotateError),
  #[error("处理过程中发生 panic: {0}")]
  Panicked(String),
}

/// 实时流读失败后等待一帧的时间再重试
pub const LIVE_RETRY_INTERVAL: Duration = Duration::from_millis(33);

/// 取出 panic 负载中的消息文本
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "未知 panic".to_string()
  }
}

/// 整个运行过程中无法恢复的错误
#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("写入第 {frame} 帧失败: {source}")]
  Write {
    frame: u64,
    #[source]
    source: OutputError,
  },
  #[error("关闭输出失败: {0}")]
  Finish(#[source] OutputError),
}

/// 标注完成的一帧
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
  pub image: RgbImage,
  /// 抑制后保留的检测结果，按保留顺序排列
  pub detections: BoxSet,
}

/// 一次模型加载对应的会话
///
/// 持有检测器、类别名、调色板与阈值配置。配置只能通过
/// [`Session::update_thresholds`] 修改，`&mut self` 保证只有一个写者。
pub struct Session<D: Detector> {
  detector: D,
  labels: LabelSet,
  palette: Palette,
  config: PipelineConfig,
  annotator: Annotator,
}

impl<D: Detector> Session<D> {
  pub fn new(detector: D, labels: LabelSet, config: PipelineConfig) -> Self {
    let palette = Palette::new(labels.len());
    info!(
      "会话已创建: {} 个类别, confidence={}, class={}",
      labels.len(),
      config.confidence_threshold(),
      config.class_threshold()
    );
    Self {
      detector,
      labels,
      palette,
      config,
      annotator: Annotator::new(),
    }
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn labels(&self) -> &LabelSet {
    &self.labels
  }

  pub fn palette(&self) -> &Palette {
    &self.palette
  }

  pub fn update_thresholds(&mut self, update: ThresholdUpdate) -> Result<(), ConfigError> {
    self.config.update(update)
  }

  /// 推理并返回解码后的全部候选框与抑制后保留的下标
  pub fn detect(&self, frame: &RgbImage) -> Result<(BoxSet, Vec<usize>), FrameError> {
    let square_size = self.config.input_square_size();
    let square = letterbox_resized(frame, square_size);
    let tensor = self
      .detector
      .forward(&square)
      .map_err(|e| FrameError::Detector(Box::new(e)))?;

    let boxes = Decoder::from(&self.config).decode(&tensor, frame.width(), frame.height(), square_size);
    let kept = boxes.suppress(
      self.config.nms_score_threshold(),
      self.config.nms_iou_threshold(),
    );
    Ok((boxes, kept))
  }

  /// 检测并在原帧的副本上绘制结果
  pub fn process_frame(&self, frame: &RgbImage) -> Result<AnnotatedFrame, FrameError> {
    let (boxes, kept) = self.detect(frame)?;

    let mut image = frame.clone();
    self
      .annotator
      .annotate(&mut image, &boxes, &kept, &self.palette, &self.labels)?;

    Ok(AnnotatedFrame {
      image,
      detections: boxes.select(&kept),
    })
  }
}

/// 输入流的两种运行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
  /// 有限文件：读失败即结束，按帧数上报进度
  File,
  /// 实时流：读失败后立即重试，只能由外部中断结束
  Live,
}

impl StreamMode {
  /// 实时流的帧率固定为 30，长度未知
  pub fn apply(&self, info: StreamInfo) -> StreamInfo {
    match self {
      StreamMode::File => info,
      StreamMode::Live => info.live(),
    }
  }
}

/// 一次运行的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
  pub frames_read: u64,
  pub frames_written: u64,
  /// 处理失败、以原始帧输出的帧数
  pub frames_recovered: u64,
  pub interrupted: bool,
}

pub struct FramePipeline<'a, D: Detector> {
  session: &'a Session<D>,
  mode: StreamMode,
  interrupt: Option<Arc<AtomicBool>>,
  max_frames: Option<u64>,
}

impl<'a, D: Detector> FramePipeline<'a, D> {
  pub fn new(session: &'a Session<D>, mode: StreamMode) -> Self {
    Self {
      session,
      mode,
      interrupt: None,
      max_frames: None,
    }
  }

  /// 每次迭代开始时检查该标志，置位后进入正常收尾
  pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
    self.interrupt = Some(interrupt);
    self
  }

  /// 读到指定帧数后停止，0 表示不限制
  pub fn with_max_frames(mut self, max_frames: u64) -> Self {
    self.max_frames = (max_frames > 0).then_some(max_frames);
    self
  }

  /// 运行到输入结束或被中断
  ///
  /// 无论以何种方式退出，都会释放输入并关闭输出。
  pub fn run<S, K, R>(
    &self,
    source: &mut S,
    sink: &mut K,
    reporter: &mut R,
  ) -> Result<RunSummary, PipelineError>
  where
    S: FrameSource + ?Sized,
    K: FrameSink + ?Sized,
    R: ProgressReporter + ?Sized,
  {
    let info = self.mode.apply(source.info());
    info!(
      "开始处理: {:?}, {}x{} @ {} fps, {} 帧",
      self.mode, info.width, info.height, info.fps, info.frame_count
    );

    let mut summary = RunSummary::default();
    let started = Instant::now();
    let result = self.run_loop(source, sink, reporter, info, &mut summary);

    source.release();
    let finished = sink.finish();

    info!(
      "处理结束: 读取 {} 帧, 写入 {} 帧, 恢复 {} 帧, 耗时 {:.2?}",
      summary.frames_read,
      summary.frames_written,
      summary.frames_recovered,
      started.elapsed()
    );

    result?;
    finished.map_err(PipelineError::Finish)?;
    Ok(summary)
  }

  fn interrupted(&self) -> bool {
    self
      .interrupt
      .as_ref()
      .is_some_and(|flag| flag.load(Ordering::SeqCst))
  }

  fn run_loop<S, K, R>(
    &self,
    source: &mut S,
    sink: &mut K,
    reporter: &mut R,
    info: StreamInfo,
    summary: &mut RunSummary,
  ) -> Result<(), PipelineError>
  where
    S: FrameSource + ?Sized,
    K: FrameSink + ?Sized,
    R: ProgressReporter + ?Sized,
  {
    let mut tracker = match self.mode {
      StreamMode::File => ProgressTracker::new(info.frame_count),
      StreamMode::Live => ProgressTracker::new(-1),
    };

    loop {
      if self.interrupted() {
        warn!("中断信号接收，退出处理循环");
        summary.interrupted = true;
        break;
      }
      if self.max_frames.is_some_and(|n| summary.frames_read >= n) {
        info!("达到指定帧数 {}, 退出处理循环", summary.frames_read);
        break;
      }

      let frame = match source.read_frame() {
        Ok(frame) => frame,
        Err(e) => match self.mode {
          StreamMode::File => {
            if e.is_exhausted() {
              info!("输入读取完毕");
            } else {
              warn!("读取帧失败，按输入结束处理: {}", e);
            }
            break;
          }
          StreamMode::Live => {
            debug!("实时输入暂时没有帧: {}", e);
            thread::sleep(LIVE_RETRY_INTERVAL);
            continue;
          }
        },
      };
      summary.frames_read += 1;

      let processed = panic::catch_unwind(AssertUnwindSafe(|| self.session.process_frame(&frame)))
        .unwrap_or_else(|payload| Err(FrameError::Panicked(panic_message(payload.as_ref()))));
      let output = match processed {
        Ok(annotated) => annotated.image,
        Err(e) => {
          warn!("第 {} 帧处理失败，输出原始帧: {}", summary.frames_read, e);
          summary.frames_recovered += 1;
          frame
        }
      };

      sink
        .write_frame(&output)
        .map_err(|source| PipelineError::Write {
          frame: summary.frames_read,
          source,
        })?;
      summary.frames_written += 1;

      if let Some(event) = tracker.advance() {
        reporter.report(&event);
      }
    }

    Ok(())
  }
}
