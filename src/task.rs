// 该文件是 Naoying （脑影） 项目的一部分。
// src/task.rs - 扫描流水线与任务
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
  path::{Path, PathBuf},
  sync::Arc,
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  input::{PreparedImage, PreprocessError, Preprocessor},
  model::{ClassifierModel, ForwardError, Model, ModelHandle, ModelLoadError},
  output::{CompositeError, Compositor, SaveImageFileError, copy_source},
  predict::{Label, PredictionResult},
  record::ScanStats,
  saliency::{GradCam, SaliencyError},
};

/// 解释图的生成方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeKind {
  /// 写出了叠加热力图的解释图
  Explained,
  /// 解释失败，逐字节复制了源图像
  Fallback(String),
}

impl CompositeKind {
  pub fn is_fallback(&self) -> bool {
    matches!(self, CompositeKind::Fallback(_))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanOutcome {
  pub prediction: PredictionResult,
  pub composite: CompositeKind,
}

#[derive(Error, Debug)]
pub enum ExplainError {
  #[error("显著图错误: {0}")]
  Saliency(#[from] SaliencyError),
  #[error("合成错误: {0}")]
  Composite(#[from] CompositeError),
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("模型加载错误: {0}")]
  Model(#[from] ModelLoadError),
  #[error("预处理错误: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("前向计算错误: {0}")]
  Forward(#[from] ForwardError),
  #[error("回退复制源图像失败: {0}")]
  Fallback(#[from] SaveImageFileError),
  #[error("工作线程异常退出")]
  Worker,
}

/// 单次扫描：预处理、预测、解释（失败时回退为复制源图像）
#[derive(Clone)]
pub struct ScanPipeline {
  model: Arc<ModelHandle>,
  compositor: Compositor,
}

impl ScanPipeline {
  pub fn new(model: Arc<ModelHandle>, compositor: Compositor) -> Self {
    Self { model, compositor }
  }

  pub fn run(
    &self,
    bytes: &[u8],
    source_out: &Path,
    composite_out: &Path,
  ) -> Result<ScanOutcome, PipelineError> {
    let model = self.model.get()?;

    let now = Instant::now();
    let prepared = Preprocessor::for_model(&model).preprocess(bytes, source_out)?;
    debug!("预处理完成，耗时: {:.2?}", now.elapsed());

    let now = Instant::now();
    let prediction = model.infer(&prepared.tensor)?;
    info!(
      "预测完成: {} ({:.2}%)，耗时: {:.2?}",
      prediction.label,
      prediction.confidence_pct,
      now.elapsed()
    );

    let now = Instant::now();
    let composite = self
      .explain(&model, &prepared, prediction.label, composite_out)
      .map(|()| CompositeKind::Explained)
      .or_else(|err| {
        warn!("生成解释图失败，改为复制源图像: {}", err);
        copy_source(&prepared.source_path, composite_out)
          .map(|_| CompositeKind::Fallback(err.to_string()))
      })?;
    debug!("解释图输出完成，耗时: {:.2?}", now.elapsed());

    Ok(ScanOutcome {
      prediction,
      composite,
    })
  }

  /// 计算 Grad-CAM 并写出解释图
  pub fn explain(
    &self,
    model: &ClassifierModel,
    prepared: &PreparedImage,
    label: Label,
    out: &Path,
  ) -> Result<(), ExplainError> {
    let map = GradCam::compute(model, &prepared.tensor, label)?;
    self.compositor.render(&map, &prepared.image, label, out)?;
    Ok(())
  }

  /// 在工作线程上执行一次扫描
  pub fn spawn(
    &self,
    bytes: Arc<[u8]>,
    source_out: PathBuf,
    composite_out: PathBuf,
  ) -> JoinHandle<Result<ScanOutcome, PipelineError>> {
    let pipeline = self.clone();
    thread::spawn(move || pipeline.run(&bytes, &source_out, &composite_out))
  }
}

pub trait Task: Sized {
  type Output;
  type Error;
  fn run_task(self, pipeline: &ScanPipeline, bytes: Arc<[u8]>) -> Result<Self::Output, Self::Error>;
}

/// 单次扫描任务，输出路径由调用方给定
pub struct OneShotTask {
  pub source_out: PathBuf,
  pub composite_out: PathBuf,
}

impl Task for OneShotTask {
  type Output = ScanOutcome;
  type Error = PipelineError;

  fn run_task(self, pipeline: &ScanPipeline, bytes: Arc<[u8]>) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let now = Instant::now();
    let outcome = pipeline.run(&bytes, &self.source_out, &self.composite_out)?;
    info!("任务完成，耗时: {:.2?}", now.elapsed());
    Ok(outcome)
  }
}

/// 多线程重复扫描同一输入，共享同一模型
pub struct RepeatShotTask {
  pub repeat: usize,
  pub workers: usize,
  pub output_dir: PathBuf,
  pub extension: String,
}

impl RepeatShotTask {
  fn paths(&self, index: usize) -> (PathBuf, PathBuf) {
    (
      self
        .output_dir
        .join(format!("{index:04}_original.{}", self.extension)),
      self
        .output_dir
        .join(format!("{index:04}_gradcam.{}", self.extension)),
    )
  }
}

impl Task for RepeatShotTask {
  type Output = ScanStats;
  type Error = PipelineError;

  fn run_task(self, pipeline: &ScanPipeline, bytes: Arc<[u8]>) -> Result<Self::Output, Self::Error> {
    let workers = self.workers.clamp(1, self.repeat.max(1));
    info!("开始任务: {} 次扫描，{} 个工作线程", self.repeat, workers);

    let mut times = Vec::with_capacity(self.repeat);
    let mut labels = Vec::with_capacity(self.repeat);
    let mut fallbacks = 0usize;

    for batch_start in (0..self.repeat).step_by(workers) {
      let batch_end = (batch_start + workers).min(self.repeat);
      let handles: Vec<_> = (batch_start..batch_end)
        .map(|i| {
          let (source_out, composite_out) = self.paths(i);
          let now = Instant::now();
          (i, now, pipeline.spawn(bytes.clone(), source_out, composite_out))
        })
        .collect();

      for (i, started, handle) in handles {
        let outcome = handle.join().map_err(|_| PipelineError::Worker)??;
        let elapsed = started.elapsed();
        info!("({})扫描完成，耗时: {:.2?}", i, elapsed);
        if outcome.composite.is_fallback() {
          fallbacks += 1;
        }
        labels.push(outcome.prediction.label);
        times.push(elapsed);
      }
    }

    // 前两次包含模型加载与预热
    let warm: Vec<Duration> = times.iter().skip(2).copied().collect();
    if !warm.is_empty() {
      warn!(
        "平均扫描时间: {:.2?}",
        warm.iter().sum::<Duration>() / warm.len() as u32
      );
    }

    let stats = ScanStats::tally(labels.iter().copied());
    info!(
      "统计: 共 {} 次，阳性 {} 次，阴性 {} 次，回退 {} 次",
      stats.total_scans, stats.tumor_detected, stats.no_tumor, fallbacks
    );
    Ok(stats)
  }
}
