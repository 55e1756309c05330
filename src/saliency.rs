// 该文件是 Naoying （脑影） 项目的一部分。
// src/saliency.rs - Grad-CAM 显著图
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
  backend::{AutodiffBackend, Backend},
};
use thiserror::Error;
use tracing::debug;

use crate::{
  backend::{GradientBackend, default_device},
  frame::InputTensor,
  model::{ArchitectureSpec, ClassifierModel, ForwardError, LayerPath, LayerSpec, Probe},
  predict::Label,
};

#[derive(Error, Debug)]
pub enum SaliencyError {
  #[error("模型中没有可用于 Grad-CAM 的卷积层")]
  NoConvLayer,
  #[error("显著图数值无效")]
  Degenerate,
  #[error("未能取得探针层的梯度")]
  MissingGradient,
  #[error("前向计算错误: {0}")]
  Forward(#[from] ForwardError),
  #[error("张量数据错误: {0}")]
  TensorData(String),
}

/// 选择探针层
///
/// 若顶层存在子模型，以第一个子模型为搜索范围，否则搜索顶层；
/// 在该范围的直接子层中从后往前找第一个空间层。不跨层级搜索。
pub fn locate_probe_layer(architecture: &ArchitectureSpec) -> Result<LayerPath, SaliencyError> {
  let (prefix, base) = match architecture
    .layers
    .iter()
    .position(LayerSpec::is_container)
  {
    Some(idx) => (vec![idx], architecture.layers[idx].children()),
    None => (Vec::new(), &architecture.layers[..]),
  };

  let (idx, _) = base
    .iter()
    .enumerate()
    .rev()
    .find(|(_, layer)| layer.is_spatial())
    .ok_or(SaliencyError::NoConvLayer)?;

  let mut indices = prefix;
  indices.push(idx);
  Ok(LayerPath::new(indices))
}

/// 反向传播的目标信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSignal {
  /// 模型输出本身
  Raw,
  /// `1 - 输出`
  Complement,
}

impl TargetSignal {
  pub fn for_label(label: Label) -> Self {
    match label {
      Label::TumorDetected => TargetSignal::Raw,
      Label::NoTumorDetected => TargetSignal::Complement,
    }
  }

  pub fn apply<B: Backend>(&self, output: Tensor<B, 2>) -> Tensor<B, 2> {
    match self {
      TargetSignal::Raw => output,
      TargetSignal::Complement => output.neg().add_scalar(1.0),
    }
  }
}

/// 归一化后的显著图，最大值为 1，或全零
#[derive(Debug, Clone, PartialEq)]
pub struct SaliencyMap {
  width: usize,
  height: usize,
  values: Vec<f32>,
}

impl SaliencyMap {
  /// 由非负的原始响应构造，按最大值归一化
  pub fn normalized(width: usize, height: usize, raw: Vec<f32>) -> Result<Self, SaliencyError> {
    if raw.len() != width * height || raw.iter().any(|v| !v.is_finite() || *v < 0.0) {
      return Err(SaliencyError::Degenerate);
    }

    let max = raw.iter().copied().fold(0.0f32, f32::max);
    let values = if max > 0.0 {
      raw.into_iter().map(|v| v / max).collect()
    } else {
      vec![0.0; width * height]
    };

    Ok(Self {
      width,
      height,
      values,
    })
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn values(&self) -> &[f32] {
    &self.values
  }

  pub fn get(&self, x: usize, y: usize) -> f32 {
    self.values[y * self.width + x]
  }

  pub fn max(&self) -> f32 {
    self.values.iter().copied().fold(0.0, f32::max)
  }

  pub fn is_zero(&self) -> bool {
    self.values.iter().all(|v| *v == 0.0)
  }
}

/// 在探针层把输出替换为新的梯度叶子
struct LeafProbe<B: AutodiffBackend> {
  target: LayerPath,
  leaf: Option<Tensor<B, 4>>,
}

impl<B: AutodiffBackend> Probe<B> for LeafProbe<B> {
  fn observe(&mut self, path: &[usize], output: Tensor<B, 4>) -> Tensor<B, 4> {
    if path != self.target.indices() {
      return output;
    }
    let leaf = output.detach().require_grad();
    self.leaf = Some(leaf.clone());
    leaf
  }
}

pub struct GradCam;

impl GradCam {
  pub fn compute(
    model: &ClassifierModel,
    tensor: &InputTensor,
    label: Label,
  ) -> Result<SaliencyMap, SaliencyError> {
    let target = locate_probe_layer(model.architecture())?;
    if let (Some(layer), Some(shape)) = (
      target.resolve(model.layers()),
      model.layer_output_shape(&target),
    ) {
      debug!("Grad-CAM 探针层: {} ({})，输出形状 {}", layer.name(), target, shape);
    }

    let device = default_device();
    let input = tensor.to_tensor::<GradientBackend>(&device);
    let mut probe = LeafProbe {
      target,
      leaf: None,
    };
    let output = model.forward(input, &mut probe)?;

    let signal = TargetSignal::for_label(label).apply(output);
    let grads = signal.sum().backward();

    let leaf = probe.leaf.ok_or(SaliencyError::MissingGradient)?;
    let gradient = leaf.grad(&grads).ok_or(SaliencyError::MissingGradient)?;
    let activations = leaf.inner();
    let [_, _, height, width] = activations.dims();

    // 通道权重为梯度的空间均值
    let weights = gradient.mean_dim(3).mean_dim(2);
    let cam = (activations * weights).sum_dim(1).clamp_min(0.0);

    let raw = cam
      .into_data()
      .to_vec::<f32>()
      .map_err(|e| SaliencyError::TensorData(format!("{e:?}")))?;
    SaliencyMap::normalized(width, height, raw)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    backend::InferenceBackend,
    frame::Normalization,
    model::{FusedActivation, ParamTensor},
  };
  use burn::tensor::ElementConversion;
  use image::{Rgb, RgbImage};

  fn conv(name: &str) -> LayerSpec {
    LayerSpec::Conv2d {
      name: name.to_string(),
      weight: ParamTensor::filled(vec![1, 3, 2, 2], 0.25),
      bias: None,
      stride: 2,
      padding: 0,
      activation: Some(FusedActivation::Relu),
    }
  }

  fn head() -> Vec<LayerSpec> {
    vec![
      LayerSpec::GlobalAvgPool2d,
      LayerSpec::Dense {
        name: "fc".to_string(),
        weight: ParamTensor::filled(vec![1, 1], 1.0),
        bias: None,
        activation: Some(FusedActivation::Sigmoid),
      },
    ]
  }

  fn architecture(layers: Vec<LayerSpec>) -> ArchitectureSpec {
    ArchitectureSpec {
      name: "saliency-test".to_string(),
      input_size: 4,
      normalization: Normalization::Tf,
      layers,
    }
  }

  #[test]
  fn probe_search_prefers_first_container() {
    let mut layers = vec![
      conv("top"),
      LayerSpec::Model {
        name: "backbone".to_string(),
        layers: vec![conv("a"), LayerSpec::Relu, conv("b"), LayerSpec::Relu],
      },
    ];
    layers.extend(head());

    let path = locate_probe_layer(&architecture(layers)).expect("found");
    assert_eq!(path.indices(), &[1, 2]);
  }

  #[test]
  fn probe_search_top_level_in_reverse() {
    let mut layers = vec![conv("a"), conv("b"), LayerSpec::Relu];
    layers.extend(head());

    let path = locate_probe_layer(&architecture(layers)).expect("found");
    assert_eq!(path.indices(), &[1]);
  }

  #[test]
  fn container_without_conv_does_not_fall_back_to_top_level() {
    let mut layers = vec![
      conv("top"),
      LayerSpec::Model {
        name: "backbone".to_string(),
        layers: vec![LayerSpec::Relu],
      },
    ];
    layers.extend(head());

    assert!(matches!(
      locate_probe_layer(&architecture(layers)),
      Err(SaliencyError::NoConvLayer)
    ));
  }

  #[test]
  fn no_spatial_layer_is_reported() {
    let arch = architecture(vec![
      LayerSpec::GlobalAvgPool2d,
      LayerSpec::Dense {
        name: "fc".to_string(),
        weight: ParamTensor::filled(vec![3, 1], 1.0),
        bias: None,
        activation: Some(FusedActivation::Sigmoid),
      },
    ]);
    assert!(matches!(
      locate_probe_layer(&arch),
      Err(SaliencyError::NoConvLayer)
    ));
  }

  #[test]
  fn target_signal_table() {
    assert_eq!(TargetSignal::for_label(Label::TumorDetected), TargetSignal::Raw);
    assert_eq!(
      TargetSignal::for_label(Label::NoTumorDetected),
      TargetSignal::Complement
    );

    let device = default_device();
    let output = Tensor::<InferenceBackend, 2>::from_floats([[0.7]], &device);
    let raw: f32 = TargetSignal::Raw.apply(output.clone()).into_scalar().elem();
    let complement: f32 = TargetSignal::Complement.apply(output).into_scalar().elem();
    assert!((raw - 0.7).abs() < 1e-6);
    assert!((complement - 0.3).abs() < 1e-6);
  }

  #[test]
  fn normalization_scales_to_unit_max() {
    let map = SaliencyMap::normalized(2, 2, vec![0.0, 2.0, 4.0, 1.0]).expect("map");
    assert_eq!(map.values(), &[0.0, 0.5, 1.0, 0.25]);
    assert_eq!(map.max(), 1.0);

    let zero = SaliencyMap::normalized(2, 1, vec![0.0, 0.0]).expect("map");
    assert!(zero.is_zero());

    assert!(matches!(
      SaliencyMap::normalized(1, 1, vec![f32::NAN]),
      Err(SaliencyError::Degenerate)
    ));
  }

  fn quadrant_input() -> InputTensor {
    // 左上 2x2 为白，其余为黑
    let image = RgbImage::from_fn(4, 4, |x, y| {
      if x < 2 && y < 2 {
        Rgb([255, 255, 255])
      } else {
        Rgb([0, 0, 0])
      }
    });
    InputTensor::from_rgb_image(&image, Normalization::Tf)
  }

  fn quadrant_model() -> ClassifierModel {
    let mut layers = vec![LayerSpec::Model {
      name: "backbone".to_string(),
      layers: vec![conv("conv")],
    }];
    layers.extend(head());
    ClassifierModel::from_spec(architecture(layers)).expect("valid")
  }

  #[test]
  fn grad_cam_highlights_active_region() {
    let map = GradCam::compute(&quadrant_model(), &quadrant_input(), Label::TumorDetected)
      .expect("grad-cam");

    assert_eq!((map.width(), map.height()), (2, 2));
    assert!((map.get(0, 0) - 1.0).abs() < 1e-5);
    assert_eq!(map.get(1, 0), 0.0);
    assert_eq!(map.get(0, 1), 0.0);
    assert_eq!(map.get(1, 1), 0.0);
  }

  #[test]
  fn complement_target_yields_zero_map() {
    let map = GradCam::compute(&quadrant_model(), &quadrant_input(), Label::NoTumorDetected)
      .expect("grad-cam");
    assert!(map.is_zero());
  }
}
