// 该文件是 Naoying （脑影） 项目的一部分。
// src/model/artifact.rs - 分类器模型文件（结构与权重）
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
  fmt,
  path::{Path, PathBuf},
};

use burn::tensor::{Tensor, TensorData, backend::Backend};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::frame::Normalization;

const INPUT_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("模型文件不存在: {0}")]
  Missing(PathBuf),
  #[error("模型文件读取错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("模型文件解析错误: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("模型无效: {0}")]
  Invalid(String),
}

/// 按行优先顺序存储的参数张量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamTensor {
  pub shape: Vec<usize>,
  pub data: Vec<f32>,
}

impl ParamTensor {
  pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
    Self { shape, data }
  }

  pub fn filled(shape: Vec<usize>, value: f32) -> Self {
    let len = shape.iter().product();
    Self {
      shape,
      data: vec![value; len],
    }
  }

  fn check(&self, layer: &str, role: &str, expected: &[usize]) -> Result<(), String> {
    if self.shape != expected {
      return Err(format!(
        "层 {layer} 的 {role} 形状应为 {expected:?}, 实际为 {:?}",
        self.shape
      ));
    }
    let numel: usize = self.shape.iter().product();
    if self.data.len() != numel {
      return Err(format!(
        "层 {layer} 的 {role} 数据长度应为 {numel}, 实际为 {}",
        self.data.len()
      ));
    }
    if self.data.iter().any(|v| !v.is_finite()) {
      return Err(format!("层 {layer} 的 {role} 含有非有限值"));
    }
    Ok(())
  }

  pub fn to_tensor<B: Backend, const D: usize>(&self, device: &B::Device) -> Tensor<B, D> {
    Tensor::from_data(
      TensorData::new(self.data.clone(), self.shape.clone()),
      device,
    )
  }
}

/// 融合在卷积层/全连接层之后的激活函数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusedActivation {
  Relu,
  Sigmoid,
}

fn default_stride() -> usize {
  1
}

fn default_epsilon() -> f32 {
  1e-3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
  Conv2d {
    name: String,
    /// `[out, in, kh, kw]`
    weight: ParamTensor,
    #[serde(default)]
    bias: Option<ParamTensor>,
    #[serde(default = "default_stride")]
    stride: usize,
    #[serde(default)]
    padding: usize,
    #[serde(default)]
    activation: Option<FusedActivation>,
  },
  BatchNorm {
    name: String,
    gamma: ParamTensor,
    beta: ParamTensor,
    mean: ParamTensor,
    variance: ParamTensor,
    #[serde(default = "default_epsilon")]
    epsilon: f32,
  },
  Relu,
  Sigmoid,
  MaxPool2d {
    kernel: usize,
    /// 缺省时等于 kernel
    #[serde(default)]
    stride: Option<usize>,
  },
  GlobalAvgPool2d,
  Flatten,
  Dense {
    name: String,
    /// `[in, out]`
    weight: ParamTensor,
    #[serde(default)]
    bias: Option<ParamTensor>,
    #[serde(default)]
    activation: Option<FusedActivation>,
  },
  /// 推理时为恒等映射
  Dropout {
    #[serde(default)]
    rate: f32,
  },
  /// 嵌套子模型（例如作为单个组件封装的特征提取主干）
  Model {
    name: String,
    layers: Vec<LayerSpec>,
  },
}

impl LayerSpec {
  /// 空间（卷积）层标记
  pub fn is_spatial(&self) -> bool {
    matches!(self, LayerSpec::Conv2d { .. })
  }

  /// 容器（子模型）标记
  pub fn is_container(&self) -> bool {
    matches!(self, LayerSpec::Model { .. })
  }

  pub fn children(&self) -> &[LayerSpec] {
    match self {
      LayerSpec::Model { layers, .. } => layers,
      _ => &[],
    }
  }

  pub fn name(&self) -> &str {
    match self {
      LayerSpec::Conv2d { name, .. }
      | LayerSpec::BatchNorm { name, .. }
      | LayerSpec::Dense { name, .. }
      | LayerSpec::Model { name, .. } => name,
      LayerSpec::Relu => "relu",
      LayerSpec::Sigmoid => "sigmoid",
      LayerSpec::MaxPool2d { .. } => "max_pool2d",
      LayerSpec::GlobalAvgPool2d => "global_avg_pool2d",
      LayerSpec::Flatten => "flatten",
      LayerSpec::Dropout { .. } => "dropout",
    }
  }
}

/// 从根节点出发的逐级层索引
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayerPath(Vec<usize>);

impl LayerPath {
  pub fn new(indices: Vec<usize>) -> Self {
    Self(indices)
  }

  pub fn indices(&self) -> &[usize] {
    &self.0
  }

  pub fn resolve<'a>(&self, layers: &'a [LayerSpec]) -> Option<&'a LayerSpec> {
    let (last, parents) = self.0.split_last()?;
    let mut current = layers;
    for &idx in parents {
      current = current.get(idx)?.children();
    }
    current.get(*last)
  }
}

impl fmt::Display for LayerPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
    write!(f, "/{}", parts.join("/"))
  }
}

/// 模型文件的顶层结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureSpec {
  pub name: String,
  /// 方形输入边长（ResNet50 主干为 224）
  pub input_size: usize,
  #[serde(default)]
  pub normalization: Normalization,
  pub layers: Vec<LayerSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureShape {
  Spatial { c: usize, h: usize, w: usize },
  Flat(usize),
}

impl fmt::Display for FeatureShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FeatureShape::Spatial { c, h, w } => write!(f, "[{c}, {h}, {w}]"),
      FeatureShape::Flat(n) => write!(f, "[{n}]"),
    }
  }
}

impl ArchitectureSpec {
  /// 静态形状推断，返回网络输出形状
  pub fn infer_output_shape(&self) -> Result<FeatureShape, String> {
    if self.input_size == 0 {
      return Err("input_size 必须大于 0".to_string());
    }
    let input = FeatureShape::Spatial {
      c: INPUT_CHANNELS,
      h: self.input_size,
      w: self.input_size,
    };
    infer_layers(&self.layers, input)
  }

  pub fn validate(&self) -> Result<(), String> {
    match self.infer_output_shape()? {
      FeatureShape::Flat(1) => Ok(()),
      other => Err(format!("模型输出必须为单个概率, 实际形状为 {other}")),
    }
  }
}

fn infer_layers(layers: &[LayerSpec], mut shape: FeatureShape) -> Result<FeatureShape, String> {
  for layer in layers {
    shape = infer_layer(layer, shape)?;
  }
  Ok(shape)
}

fn window_output(size: usize, padding: usize, kernel: usize, stride: usize) -> Option<usize> {
  if kernel == 0 || stride == 0 || size + 2 * padding < kernel {
    return None;
  }
  Some((size + 2 * padding - kernel) / stride + 1)
}

fn infer_layer(layer: &LayerSpec, shape: FeatureShape) -> Result<FeatureShape, String> {
  let name = layer.name();
  match layer {
    LayerSpec::Conv2d {
      weight,
      bias,
      stride,
      padding,
      ..
    } => {
      let FeatureShape::Spatial { c, h, w } = shape else {
        return Err(format!("卷积层 {name} 需要空间输入, 实际为 {shape}"));
      };
      let [out, inp, kh, kw] = weight.shape[..] else {
        return Err(format!("卷积层 {name} 的权重必须是 4 维"));
      };
      if inp != c {
        return Err(format!("卷积层 {name} 输入通道应为 {c}, 实际为 {inp}"));
      }
      weight.check(name, "weight", &[out, c, kh, kw])?;
      if let Some(bias) = bias {
        bias.check(name, "bias", &[out])?;
      }
      let oh = window_output(h, *padding, kh, *stride);
      let ow = window_output(w, *padding, kw, *stride);
      match (oh, ow) {
        (Some(h), Some(w)) => Ok(FeatureShape::Spatial { c: out, h, w }),
        _ => Err(format!("卷积层 {name} 的卷积窗口不适用于输入 {shape}")),
      }
    }
    LayerSpec::BatchNorm {
      gamma,
      beta,
      mean,
      variance,
      epsilon,
      ..
    } => {
      let channels = match shape {
        FeatureShape::Spatial { c, .. } => c,
        FeatureShape::Flat(n) => n,
      };
      gamma.check(name, "gamma", &[channels])?;
      beta.check(name, "beta", &[channels])?;
      mean.check(name, "mean", &[channels])?;
      variance.check(name, "variance", &[channels])?;
      if !(*epsilon > 0.0) || variance.data.iter().any(|v| *v < 0.0) {
        return Err(format!("批归一化层 {name} 的方差或 epsilon 无效"));
      }
      Ok(shape)
    }
    LayerSpec::Relu | LayerSpec::Sigmoid => Ok(shape),
    LayerSpec::Dropout { rate } => {
      if !(0.0..1.0).contains(rate) {
        return Err(format!("dropout 比例必须在 [0, 1) 内, 实际为 {rate}"));
      }
      Ok(shape)
    }
    LayerSpec::MaxPool2d { kernel, stride } => {
      let FeatureShape::Spatial { c, h, w } = shape else {
        return Err(format!("池化层需要空间输入, 实际为 {shape}"));
      };
      let stride = stride.unwrap_or(*kernel);
      match (
        window_output(h, 0, *kernel, stride),
        window_output(w, 0, *kernel, stride),
      ) {
        (Some(h), Some(w)) => Ok(FeatureShape::Spatial { c, h, w }),
        _ => Err(format!("池化窗口 {kernel} 不适用于输入 {shape}")),
      }
    }
    LayerSpec::GlobalAvgPool2d => match shape {
      FeatureShape::Spatial { c, .. } => Ok(FeatureShape::Flat(c)),
      FeatureShape::Flat(_) => Err("全局平均池化需要空间输入".to_string()),
    },
    LayerSpec::Flatten => match shape {
      FeatureShape::Spatial { c, h, w } => Ok(FeatureShape::Flat(c * h * w)),
      flat => Ok(flat),
    },
    LayerSpec::Dense { weight, bias, .. } => {
      let FeatureShape::Flat(n) = shape else {
        return Err(format!("全连接层 {name} 需要一维输入, 实际为 {shape}"));
      };
      let [inp, out] = weight.shape[..] else {
        return Err(format!("全连接层 {name} 的权重必须是 2 维"));
      };
      if inp != n {
        return Err(format!("全连接层 {name} 输入维度应为 {n}, 实际为 {inp}"));
      }
      weight.check(name, "weight", &[n, out])?;
      if let Some(bias) = bias {
        bias.check(name, "bias", &[out])?;
      }
      Ok(FeatureShape::Flat(out))
    }
    LayerSpec::Model { layers, .. } => infer_layers(layers, shape),
  }
}

/// 已加载并校验过的分类器，加载后只读
#[derive(Debug, Clone)]
pub struct ClassifierModel {
  spec: ArchitectureSpec,
}

impl ClassifierModel {
  pub fn from_spec(spec: ArchitectureSpec) -> Result<Self, ModelLoadError> {
    spec.validate().map_err(ModelLoadError::Invalid)?;
    Ok(Self { spec })
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
    let path = path.as_ref();
    if !path.is_file() {
      return Err(ModelLoadError::Missing(path.to_path_buf()));
    }

    info!("加载模型文件: {}", path.display());
    let raw = std::fs::read(path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      raw.len() as f64 / (1024.0 * 1024.0)
    );

    let spec: ArchitectureSpec = serde_json::from_slice(&raw)?;
    let model = Self::from_spec(spec)?;
    info!(
      "模型 {} 加载完成, 输入尺寸 {}x{}",
      model.name(),
      model.input_size(),
      model.input_size()
    );
    Ok(model)
  }

  pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelLoadError> {
    let json = serde_json::to_vec(&self.spec)?;
    std::fs::write(path, json)?;
    Ok(())
  }

  pub fn architecture(&self) -> &ArchitectureSpec {
    &self.spec
  }

  pub fn layers(&self) -> &[LayerSpec] {
    &self.spec.layers
  }

  pub fn name(&self) -> &str {
    &self.spec.name
  }

  pub fn input_size(&self) -> usize {
    self.spec.input_size
  }

  pub fn normalization(&self) -> Normalization {
    self.spec.normalization
  }

  /// 指定层输出的特征形状
  pub fn layer_output_shape(&self, path: &LayerPath) -> Option<FeatureShape> {
    let mut shape = FeatureShape::Spatial {
      c: INPUT_CHANNELS,
      h: self.spec.input_size,
      w: self.spec.input_size,
    };
    let mut layers = self.spec.layers.as_slice();
    let (last, parents) = path.indices().split_last()?;
    for &idx in parents {
      shape = infer_layers(layers.get(..idx)?, shape).ok()?;
      layers = layers.get(idx)?.children();
    }
    infer_layers(layers.get(..=*last)?, shape).ok()
  }
}
