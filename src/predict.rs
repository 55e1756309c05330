// 该文件是 Naoying （脑影） 项目的一部分。
// src/predict.rs - 二分类预测
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

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
  backend::{InferenceBackend, default_device},
  frame::InputTensor,
  model::{ClassifierModel, ForwardError, Model, NoProbe},
};

const DECISION_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
  TumorDetected,
  NoTumorDetected,
}

impl Label {
  pub fn is_positive(&self) -> bool {
    matches!(self, Label::TumorDetected)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Label::TumorDetected => "Tumor Detected",
      Label::NoTumorDetected => "No Tumor Detected",
    }
  }
}

impl fmt::Display for Label {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
  pub label: Label,
  /// 对所预测类别的置信度（百分比）
  pub confidence_pct: f32,
  /// 模型输出的阳性概率
  pub probability: f32,
}

impl PredictionResult {
  pub fn from_probability(probability: f32) -> Result<Self, ForwardError> {
    if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
      return Err(ForwardError::InvalidProbability(probability));
    }

    let (label, confidence_pct) = if probability > DECISION_THRESHOLD {
      (Label::TumorDetected, probability * 100.0)
    } else {
      (Label::NoTumorDetected, (1.0 - probability) * 100.0)
    };

    Ok(Self {
      label,
      confidence_pct,
      probability,
    })
  }
}

/// 推理模式前向计算得到阳性概率
pub fn probability(model: &ClassifierModel, tensor: &InputTensor) -> Result<f32, ForwardError> {
  let device = default_device();
  let input = tensor.to_tensor::<InferenceBackend>(&device);
  let output = model.forward(input, &mut NoProbe)?;

  let dims = output.dims();
  let values = output
    .into_data()
    .to_vec::<f32>()
    .map_err(|e| ForwardError::TensorData(format!("{e:?}")))?;
  match values[..] {
    [p] => Ok(p),
    _ => Err(ForwardError::OutputShape(dims.to_vec())),
  }
}

pub struct Predictor;

impl Predictor {
  pub fn predict(
    model: &ClassifierModel,
    tensor: &InputTensor,
  ) -> Result<PredictionResult, ForwardError> {
    let p = probability(model, tensor)?;
    debug!("模型输出概率: {:.6}", p);
    PredictionResult::from_probability(p)
  }
}

impl Model for ClassifierModel {
  type Input = InputTensor;
  type Output = PredictionResult;
  type Error = ForwardError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    Predictor::predict(self, input)
  }
}
