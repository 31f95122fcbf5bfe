// 该文件是 Zhaoying （照影） 项目的一部分。
// tests/pipeline.rs - 处理流水线与任务的端到端测试
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
  cell::{Cell, RefCell},
  path::{Path, PathBuf},
  rc::Rc,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Instant,
};

use image::{Rgb, RgbImage};
use zhaoying::{
  config::PipelineConfig,
  input::{FrameSource, InputError, StreamInfo},
  job::{InputSpec, Job, JobConfig, JobError},
  labels::LabelSet,
  model::{DetectionTensor, Detector},
  output::{FrameSink, OutputError},
  pipeline::{FramePipeline, LIVE_RETRY_INTERVAL, PipelineError, Session, StreamMode},
  progress::ProgressEvent,
};

/// 每帧返回同一组行的检测器
struct RowsDetector(Vec<Vec<f32>>);

impl Detector for RowsDetector {
  type Error = std::io::Error;

  fn forward(&self, _square: &RgbImage) -> Result<DetectionTensor, Self::Error> {
    if self.0.is_empty() {
      return Ok(DetectionTensor::empty(2));
    }
    DetectionTensor::from_rows(self.0.clone())
      .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
  }
}

fn session(rows: Vec<Vec<f32>>) -> Session<RowsDetector> {
  Session::new(
    RowsDetector(rows),
    LabelSet::new(["person", "chair"]),
    PipelineConfig::default(),
  )
}

fn frame(index: u64) -> RgbImage {
  RgbImage::from_pixel(64, 48, Rgb([index as u8, 40, 80]))
}

#[derive(Default)]
struct SourceLog {
  released: bool,
}

/// 产生固定数量帧的输入，开头可以先失败若干次
struct SyntheticSource {
  info: StreamInfo,
  remaining: u64,
  produced: u64,
  failures_first: u32,
  fail_after: Option<u64>,
  log: Rc<RefCell<SourceLog>>,
}

impl SyntheticSource {
  fn new(frames: u64, frame_count: i64) -> Self {
    Self {
      info: StreamInfo {
        width: 64,
        height: 48,
        fps: 25.0,
        frame_count,
      },
      remaining: frames,
      produced: 0,
      failures_first: 0,
      fail_after: None,
      log: Rc::default(),
    }
  }
}

impl FrameSource for SyntheticSource {
  fn info(&self) -> StreamInfo {
    self.info
  }

  fn read_frame(&mut self) -> Result<RgbImage, InputError> {
    if self.failures_first > 0 {
      self.failures_first -= 1;
      return Err(InputError::ReadFailed("设备忙".to_string()));
    }
    if self.fail_after == Some(self.produced) {
      return Err(InputError::ReadFailed("损坏的数据包".to_string()));
    }
    if self.remaining == 0 {
      return Err(InputError::Exhausted);
    }
    self.remaining -= 1;
    self.produced += 1;
    Ok(frame(self.produced))
  }

  fn release(&mut self) {
    self.log.borrow_mut().released = true;
  }
}

#[derive(Default)]
struct SinkLog {
  frames: Vec<RgbImage>,
  finished: bool,
}

struct RecordingSink {
  log: Rc<RefCell<SinkLog>>,
  fail_on: Option<usize>,
}

impl RecordingSink {
  fn new(log: Rc<RefCell<SinkLog>>) -> Self {
    Self { log, fail_on: None }
  }
}

impl FrameSink for RecordingSink {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OutputError> {
    let mut log = self.log.borrow_mut();
    if self.fail_on == Some(log.frames.len() + 1) {
      return Err(OutputError::WriteFailed("磁盘已满".to_string()));
    }
    log.frames.push(frame.clone());
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    self.log.borrow_mut().finished = true;
    Ok(())
  }
}

fn progress_values(events: &[ProgressEvent]) -> Vec<u32> {
  events
    .iter()
    .filter_map(|event| match event {
      ProgressEvent::Progress { progress, .. } => Some(*progress),
      ProgressEvent::Completed { .. } => None,
    })
    .collect()
}

fn job_in(dir: &Path, input: &str) -> Job {
  Job::new(
    input.parse().unwrap(),
    JobConfig {
      output_dir: dir.to_path_buf(),
      ..JobConfig::default()
    },
  )
}

#[test]
fn hundred_frame_file_reports_every_ten_percent() {
  let dir = tempfile::tempdir().unwrap();
  let session = session(Vec::new());
  let sink_log = Rc::new(RefCell::new(SinkLog::default()));
  let source = SyntheticSource::new(100, 100);
  let source_log = source.log.clone();
  let sink_path = RefCell::new(PathBuf::new());

  let mut events: Vec<ProgressEvent> = Vec::new();
  let outcome = job_in(dir.path(), "uploads/clip.mp4")
    .run_with(
      &session,
      |input| {
        assert_eq!(input, &InputSpec::File(PathBuf::from("uploads/clip.mp4")));
        Ok(source)
      },
      |path, info| {
        *sink_path.borrow_mut() = path.to_path_buf();
        assert_eq!(info.frame_count, 100);
        Ok(RecordingSink::new(sink_log.clone()))
      },
      &mut events,
    )
    .unwrap();

  let expected = dir.path().join("clip-output.mp4");
  assert_eq!(*sink_path.borrow(), expected);
  assert_eq!(outcome.output_video, expected);
  assert_eq!(outcome.summary.frames_written, 100);

  assert_eq!(
    progress_values(&events),
    vec![10, 20, 30, 40, 50, 60, 70, 80, 90]
  );
  assert_eq!(
    events.last(),
    Some(&ProgressEvent::completed(expected.display().to_string()))
  );

  // 没有检测结果时输出与输入逐帧一致
  let sink = sink_log.borrow();
  assert!(sink.finished);
  assert_eq!(sink.frames.len(), 100);
  assert_eq!(sink.frames[0], frame(1));
  assert_eq!(sink.frames[99], frame(100));
  assert!(source_log.borrow().released);
}

#[test]
fn live_stream_retries_failed_reads() {
  let session = session(Vec::new());
  let mut source = SyntheticSource::new(10, 500);
  source.failures_first = 3;
  let sink_log = Rc::new(RefCell::new(SinkLog::default()));
  let mut sink = RecordingSink::new(sink_log.clone());

  let mut events: Vec<ProgressEvent> = Vec::new();
  let started = Instant::now();
  let summary = FramePipeline::new(&session, StreamMode::Live)
    .with_max_frames(2)
    .run(&mut source, &mut sink, &mut events)
    .unwrap();

  // 每次读失败后等待一帧的时间
  assert!(started.elapsed() >= LIVE_RETRY_INTERVAL * 3);
  assert_eq!(summary.frames_read, 2);
  assert_eq!(summary.frames_written, 2);
  assert!(!summary.interrupted);
  // 实时流不报告进度，也不报告读失败
  assert!(events.is_empty());
  assert!(sink_log.borrow().finished);
  assert!(source.log.borrow().released);
}

#[test]
fn live_job_writes_fixed_output_name() {
  let dir = tempfile::tempdir().unwrap();
  let session = session(Vec::new());
  let sink_log = Rc::new(RefCell::new(SinkLog::default()));
  let mut job_config = JobConfig {
    output_dir: dir.path().to_path_buf(),
    ..JobConfig::default()
  };
  job_config.max_frames = 3;

  let mut events: Vec<ProgressEvent> = Vec::new();
  let outcome = Job::new(InputSpec::Live, job_config)
    .run_with(
      &session,
      |_| Ok(SyntheticSource::new(10, 10)),
      |_, info| {
        assert_eq!((info.fps, info.frame_count), (30.0, -1));
        Ok(RecordingSink::new(sink_log.clone()))
      },
      &mut events,
    )
    .unwrap();

  assert_eq!(outcome.output_video, dir.path().join("live_output.mp4"));
  assert_eq!(sink_log.borrow().frames.len(), 3);
  assert_eq!(
    events,
    vec![ProgressEvent::completed(
      dir.path().join("live_output.mp4").display().to_string()
    )]
  );
}

#[test]
fn file_read_failure_ends_the_run_quietly() {
  let session = session(Vec::new());
  let mut source = SyntheticSource::new(10, 10);
  source.fail_after = Some(4);
  let sink_log = Rc::new(RefCell::new(SinkLog::default()));
  let mut sink = RecordingSink::new(sink_log.clone());

  let mut events: Vec<ProgressEvent> = Vec::new();
  let summary = FramePipeline::new(&session, StreamMode::File)
    .run(&mut source, &mut sink, &mut events)
    .unwrap();

  assert_eq!(summary.frames_written, 4);
  assert_eq!(progress_values(&events), vec![10, 20, 30, 40]);
  assert!(sink_log.borrow().finished);
}

#[test]
fn degenerate_box_writes_the_original_frame() {
  // 负宽度的框无法绘制
  let session = session(vec![vec![320.0, 320.0, -100.0, 50.0, 0.9, 0.9, 0.1]]);
  let mut source = SyntheticSource::new(3, 3);
  let sink_log = Rc::new(RefCell::new(SinkLog::default()));
  let mut sink = RecordingSink::new(sink_log.clone());

  let mut events: Vec<ProgressEvent> = Vec::new();
  let summary = FramePipeline::new(&session, StreamMode::File)
    .run(&mut source, &mut sink, &mut events)
    .unwrap();

  assert_eq!(summary.frames_read, 3);
  assert_eq!(summary.frames_recovered, 3);
  let sink = sink_log.borrow();
  assert_eq!(sink.frames, vec![frame(1), frame(2), frame(3)]);
  // 单帧失败不产生失败记录
  assert!(
    events
      .iter()
      .all(|event| !matches!(event, ProgressEvent::Progress { progress: 100, .. }))
  );
}

#[test]
fn detections_are_drawn_on_output_frames() {
  let session = session(vec![vec![320.0, 320.0, 200.0, 200.0, 0.9, 0.9, 0.1]]);
  let mut source = SyntheticSource::new(1, 1);
  let sink_log = Rc::new(RefCell::new(SinkLog::default()));
  let mut sink = RecordingSink::new(sink_log.clone());

  let mut events: Vec<ProgressEvent> = Vec::new();
  let summary = FramePipeline::new(&session, StreamMode::File)
    .run(&mut source, &mut sink, &mut events)
    .unwrap();

  assert_eq!(summary.frames_recovered, 0);
  assert_ne!(sink_log.borrow().frames[0], frame(1));
}

#[test]
fn sink_failure_reports_and_cleans_up() {
  let dir = tempfile::tempdir().unwrap();
  let session = session(Vec::new());
  let source = SyntheticSource::new(10, 10);
  let source_log = source.log.clone();
  let sink_log = Rc::new(RefCell::new(SinkLog::default()));

  let mut events: Vec<ProgressEvent> = Vec::new();
  let err = job_in(dir.path(), "clip.mp4")
    .run_with(
      &session,
      |_| Ok(source),
      |_, _| {
        let mut sink = RecordingSink::new(sink_log.clone());
        sink.fail_on = Some(3);
        Ok(sink)
      },
      &mut events,
    )
    .unwrap_err();

  assert!(matches!(
    err,
    JobError::Run(PipelineError::Write { frame: 3, .. })
  ));
  assert!(source_log.borrow().released);
  assert!(sink_log.borrow().finished);
  assert_eq!(sink_log.borrow().frames.len(), 2);

  match events.last() {
    Some(ProgressEvent::Progress { progress, message }) => {
      assert_eq!(*progress, 100);
      assert!(message.starts_with("An error occurred during processing: "));
    }
    other => panic!("unexpected final record: {:?}", other),
  }
  assert!(
    events
      .iter()
      .all(|event| !matches!(event, ProgressEvent::Completed { .. }))
  );
}

#[test]
fn interrupt_stops_with_normal_cleanup() {
  let dir = tempfile::tempdir().unwrap();
  let session = session(Vec::new());
  let source = SyntheticSource::new(10, -1);
  let source_log = source.log.clone();
  let sink_log = Rc::new(RefCell::new(SinkLog::default()));
  let interrupt = Arc::new(AtomicBool::new(false));
  interrupt.store(true, Ordering::SeqCst);

  let mut events: Vec<ProgressEvent> = Vec::new();
  let outcome = Job::new(
    InputSpec::Live,
    JobConfig {
      output_dir: dir.path().to_path_buf(),
      ..JobConfig::default()
    },
  )
  .with_interrupt(interrupt)
  .run_with(
    &session,
    |_| Ok(source),
    |_, _| Ok(RecordingSink::new(sink_log.clone())),
    &mut events,
  )
  .unwrap();

  assert!(outcome.summary.interrupted);
  assert_eq!(outcome.summary.frames_read, 0);
  assert!(source_log.borrow().released);
  assert!(sink_log.borrow().finished);
  assert!(matches!(
    events.as_slice(),
    [ProgressEvent::Completed { .. }]
  ));
}

#[test]
fn unopenable_source_is_reported() {
  let dir = tempfile::tempdir().unwrap();
  let session = session(Vec::new());
  let sink_opened = RefCell::new(false);

  let mut events: Vec<ProgressEvent> = Vec::new();
  let result = job_in(dir.path(), "missing.mp4").run_with(
    &session,
    |_| Err::<SyntheticSource, _>(InputError::ReadFailed("no such file".to_string())),
    |_, _| {
      *sink_opened.borrow_mut() = true;
      Ok(RecordingSink::new(Rc::default()))
    },
    &mut events,
  );

  assert!(result.is_err());
  assert!(!*sink_opened.borrow());
  assert_eq!(
    events,
    vec![ProgressEvent::failure(
      "Error: Unable to open video source. Please check the input."
    )]
  );
}

#[test]
fn unopenable_sink_releases_the_source() {
  let dir = tempfile::tempdir().unwrap();
  let session = session(Vec::new());
  let source = SyntheticSource::new(5, 5);
  let source_log = source.log.clone();

  let mut events: Vec<ProgressEvent> = Vec::new();
  let result = job_in(dir.path(), "clip.mp4").run_with(
    &session,
    |_| Ok(source),
    |_, _| Err::<RecordingSink, _>(OutputError::Unsupported("no encoder".to_string())),
    &mut events,
  );

  assert!(result.is_err());
  assert!(source_log.borrow().released);
  assert_eq!(events.len(), 1);
  assert!(matches!(
    &events[0],
    ProgressEvent::Progress { progress: 100, .. }
  ));
}

#[test]
fn output_directory_is_created() {
  let dir = tempfile::tempdir().unwrap();
  let output_dir = dir.path().join("nested").join("videos");
  let session = session(Vec::new());

  let mut events: Vec<ProgressEvent> = Vec::new();
  Job::new(
    "clip.mp4".parse().unwrap(),
    JobConfig {
      output_dir: output_dir.clone(),
      ..JobConfig::default()
    },
  )
  .run_with(
    &session,
    |_| Ok(SyntheticSource::new(1, 1)),
    |_, _| Ok(RecordingSink::new(Rc::default())),
    &mut events,
  )
  .unwrap();

  assert!(output_dir.is_dir());
}

/// 在第 `panic_on` 次调用时 panic 的检测器
struct PanickingDetector {
  calls: Cell<u32>,
  panic_on: u32,
}

impl Detector for PanickingDetector {
  type Error = std::io::Error;

  fn forward(&self, _square: &RgbImage) -> Result<DetectionTensor, Self::Error> {
    let call = self.calls.get() + 1;
    self.calls.set(call);
    if call == self.panic_on {
      panic!("推理后端崩溃");
    }
    Ok(DetectionTensor::empty(2))
  }
}

#[test]
fn panic_in_frame_stage_writes_the_original_frame() {
  let dir = tempfile::tempdir().unwrap();
  let session = Session::new(
    PanickingDetector {
      calls: Cell::new(0),
      panic_on: 2,
    },
    LabelSet::new(["person", "chair"]),
    PipelineConfig::default(),
  );
  let source = SyntheticSource::new(3, 3);
  let source_log = source.log.clone();
  let sink_log = Rc::new(RefCell::new(SinkLog::default()));

  let mut events: Vec<ProgressEvent> = Vec::new();
  let outcome = job_in(dir.path(), "clip.mp4")
    .run_with(
      &session,
      |_| Ok(source),
      |_, _| Ok(RecordingSink::new(sink_log.clone())),
      &mut events,
    )
    .unwrap();

  assert_eq!(outcome.summary.frames_written, 3);
  assert_eq!(outcome.summary.frames_recovered, 1);
  assert_eq!(sink_log.borrow().frames, vec![frame(1), frame(2), frame(3)]);
  assert!(sink_log.borrow().finished);
  assert!(source_log.borrow().released);
  assert_eq!(
    events.last(),
    Some(&ProgressEvent::completed(
      dir.path().join("clip-output.mp4").display().to_string()
    ))
  );
}

#[test]
fn panic_outside_frame_stage_is_reported_once() {
  let dir = tempfile::tempdir().unwrap();
  let session = session(Vec::new());

  let mut events: Vec<ProgressEvent> = Vec::new();
  let err = job_in(dir.path(), "clip.mp4")
    .run_with(
      &session,
      |_| Ok(SyntheticSource::new(3, 3)),
      |_, _| -> Result<RecordingSink, OutputError> { panic!("编码器初始化崩溃") },
      &mut events,
    )
    .unwrap_err();

  assert!(matches!(err, JobError::Panicked(ref message) if message == "编码器初始化崩溃"));
  assert_eq!(
    events,
    vec![ProgressEvent::failure(
      "An error occurred during processing: 编码器初始化崩溃"
    )]
  );
}
