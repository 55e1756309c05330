// 该文件是 Naoying （脑影） 项目的一部分。
// src/model/network.rs - 前向计算
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

use burn::tensor::{
  Tensor,
  activation::{relu, sigmoid},
  backend::Backend,
  module::{adaptive_avg_pool2d, conv2d, max_pool2d},
  ops::ConvOptions,
};
use thiserror::Error;

use crate::model::{ClassifierModel, FusedActivation, LayerSpec};

#[derive(Error, Debug)]
pub enum ForwardError {
  #[error("层 {layer} 需要{expected}输入")]
  RankMismatch {
    layer: String,
    expected: &'static str,
  },
  #[error("模型输出形状无效: {0:?}")]
  OutputShape(Vec<usize>),
  #[error("模型输出不是有效概率: {0}")]
  InvalidProbability(f32),
  #[error("张量数据错误: {0}")]
  TensorData(String),
}

/// 层间传递的特征
pub enum Features<B: Backend> {
  /// `[N, C, H, W]`
  Spatial(Tensor<B, 4>),
  /// `[N, F]`
  Flat(Tensor<B, 2>),
}

impl<B: Backend> Features<B> {
  fn spatial(self, layer: &LayerSpec) -> Result<Tensor<B, 4>, ForwardError> {
    match self {
      Features::Spatial(t) => Ok(t),
      Features::Flat(_) => Err(ForwardError::RankMismatch {
        layer: layer.name().to_string(),
        expected: "空间",
      }),
    }
  }

  fn flat(self, layer: &LayerSpec) -> Result<Tensor<B, 2>, ForwardError> {
    match self {
      Features::Flat(t) => Ok(t),
      Features::Spatial(_) => Err(ForwardError::RankMismatch {
        layer: layer.name().to_string(),
        expected: "一维",
      }),
    }
  }
}

/// 观察（并可替换）空间层输出的探针
pub trait Probe<B: Backend> {
  fn observe(&mut self, path: &[usize], output: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// 不做任何处理的探针
pub struct NoProbe;

impl<B: Backend> Probe<B> for NoProbe {
  fn observe(&mut self, _path: &[usize], output: Tensor<B, 4>) -> Tensor<B, 4> {
    output
  }
}

fn fused<B: Backend, const D: usize>(
  tensor: Tensor<B, D>,
  activation: Option<FusedActivation>,
) -> Tensor<B, D> {
  match activation {
    Some(FusedActivation::Relu) => relu(tensor),
    Some(FusedActivation::Sigmoid) => sigmoid(tensor),
    None => tensor,
  }
}

impl ClassifierModel {
  /// 推理模式前向计算，返回 `[1, 1]` 输出
  pub fn forward<B: Backend, P: Probe<B>>(
    &self,
    input: Tensor<B, 4>,
    probe: &mut P,
  ) -> Result<Tensor<B, 2>, ForwardError> {
    let device = input.device();
    let mut path = Vec::new();
    let output = forward_layers(
      self.layers(),
      Features::Spatial(input),
      &mut path,
      probe,
      &device,
    )?;

    match output {
      Features::Flat(t) => Ok(t),
      Features::Spatial(t) => Err(ForwardError::OutputShape(t.dims().to_vec())),
    }
  }
}

fn forward_layers<B: Backend, P: Probe<B>>(
  layers: &[LayerSpec],
  mut x: Features<B>,
  path: &mut Vec<usize>,
  probe: &mut P,
  device: &B::Device,
) -> Result<Features<B>, ForwardError> {
  for (idx, layer) in layers.iter().enumerate() {
    path.push(idx);
    x = forward_layer(layer, x, path, probe, device)?;
    path.pop();
  }
  Ok(x)
}

fn forward_layer<B: Backend, P: Probe<B>>(
  layer: &LayerSpec,
  x: Features<B>,
  path: &mut Vec<usize>,
  probe: &mut P,
  device: &B::Device,
) -> Result<Features<B>, ForwardError> {
  match layer {
    LayerSpec::Conv2d {
      weight,
      bias,
      stride,
      padding,
      activation,
      ..
    } => {
      let x = x.spatial(layer)?;
      let options = ConvOptions::new([*stride, *stride], [*padding, *padding], [1, 1], 1);
      let out = conv2d(
        x,
        weight.to_tensor::<B, 4>(device),
        bias.as_ref().map(|b| b.to_tensor::<B, 1>(device)),
        options,
      );
      let out = fused(out, *activation);
      Ok(Features::Spatial(probe.observe(path, out)))
    }
    LayerSpec::BatchNorm {
      gamma,
      beta,
      mean,
      variance,
      epsilon,
      ..
    } => {
      let gamma = gamma.to_tensor::<B, 1>(device);
      let beta = beta.to_tensor::<B, 1>(device);
      let mean = mean.to_tensor::<B, 1>(device);
      let scale = gamma.div(variance.to_tensor::<B, 1>(device).add_scalar(*epsilon).sqrt());

      match x {
        Features::Spatial(t) => {
          let [_, c, _, _] = t.dims();
          let out = (t - mean.reshape([1, c, 1, 1])) * scale.reshape([1, c, 1, 1])
            + beta.reshape([1, c, 1, 1]);
          Ok(Features::Spatial(out))
        }
        Features::Flat(t) => {
          let [_, c] = t.dims();
          let out = (t - mean.reshape([1, c])) * scale.reshape([1, c]) + beta.reshape([1, c]);
          Ok(Features::Flat(out))
        }
      }
    }
    LayerSpec::Relu => Ok(match x {
      Features::Spatial(t) => Features::Spatial(relu(t)),
      Features::Flat(t) => Features::Flat(relu(t)),
    }),
    LayerSpec::Sigmoid => Ok(match x {
      Features::Spatial(t) => Features::Spatial(sigmoid(t)),
      Features::Flat(t) => Features::Flat(sigmoid(t)),
    }),
    // 推理模式下不做随机丢弃
    LayerSpec::Dropout { .. } => Ok(x),
    LayerSpec::MaxPool2d { kernel, stride } => {
      let x = x.spatial(layer)?;
      let stride = stride.unwrap_or(*kernel);
      Ok(Features::Spatial(max_pool2d(
        x,
        [*kernel, *kernel],
        [stride, stride],
        [0, 0],
        [1, 1],
      )))
    }
    LayerSpec::GlobalAvgPool2d => {
      let x = x.spatial(layer)?;
      let [n, c, _, _] = x.dims();
      Ok(Features::Flat(adaptive_avg_pool2d(x, [1, 1]).reshape([n, c])))
    }
    LayerSpec::Flatten => Ok(match x {
      Features::Spatial(t) => {
        let [n, c, h, w] = t.dims();
        Features::Flat(t.reshape([n, c * h * w]))
      }
      flat => flat,
    }),
    LayerSpec::Dense {
      weight,
      bias,
      activation,
      ..
    } => {
      let x = x.flat(layer)?;
      let mut out = x.matmul(weight.to_tensor::<B, 2>(device));
      if let Some(bias) = bias {
        let [_, features] = out.dims();
        out = out + bias.to_tensor::<B, 1>(device).reshape([1, features]);
      }
      Ok(Features::Flat(fused(out, *activation)))
    }
    LayerSpec::Model { layers, .. } => forward_layers(layers, x, path, probe, device),
  }
}
