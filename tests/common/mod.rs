// 该文件是 Naoying （脑影） 项目的一部分。
// tests/common/mod.rs - 集成测试共用的模型与图像
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

#![allow(dead_code)]

use std::{
  io::Cursor,
  path::{Path, PathBuf},
  sync::Arc,
};

use image::{ImageFormat, Rgb, RgbImage};
use naoying::{
  frame::Normalization,
  model::{ArchitectureSpec, ClassifierModel, FusedActivation, LayerSpec, ModelHandle, ParamTensor},
  output::Compositor,
  task::ScanPipeline,
};

pub const SIZE: u32 = 16;

fn head(bias: f32) -> Vec<LayerSpec> {
  vec![
    LayerSpec::GlobalAvgPool2d,
    LayerSpec::Dropout { rate: 0.3 },
    LayerSpec::Dense {
      name: "classifier".to_string(),
      weight: ParamTensor::filled(vec![1, 1], 1.0),
      bias: Some(ParamTensor::filled(vec![1], bias)),
      activation: Some(FusedActivation::Sigmoid),
    },
  ]
}

/// 主干为单个 8x8 步长 8 的卷积，亮区域推高阳性概率
pub fn conv_model() -> ClassifierModel {
  let mut layers = vec![LayerSpec::Model {
    name: "backbone".to_string(),
    layers: vec![LayerSpec::Conv2d {
      name: "conv".to_string(),
      weight: ParamTensor::filled(vec![1, 3, 8, 8], 1e-4),
      bias: None,
      stride: 8,
      padding: 0,
      activation: Some(FusedActivation::Relu),
    }],
  }];
  layers.extend(head(-0.5));

  ClassifierModel::from_spec(ArchitectureSpec {
    name: "conv-fixture".to_string(),
    input_size: SIZE as usize,
    normalization: Normalization::Caffe,
    layers,
  })
  .expect("valid conv fixture")
}

/// 没有任何空间层的模型，无法计算 Grad-CAM
pub fn flat_model() -> ClassifierModel {
  ClassifierModel::from_spec(ArchitectureSpec {
    name: "flat-fixture".to_string(),
    input_size: SIZE as usize,
    normalization: Normalization::Caffe,
    layers: vec![
      LayerSpec::GlobalAvgPool2d,
      LayerSpec::Dense {
        name: "classifier".to_string(),
        weight: ParamTensor::filled(vec![3, 1], 1e-3),
        bias: None,
        activation: Some(FusedActivation::Sigmoid),
      },
    ],
  })
  .expect("valid flat fixture")
}

/// 分类头没有 sigmoid，输出不是概率
pub fn linear_model() -> ClassifierModel {
  ClassifierModel::from_spec(ArchitectureSpec {
    name: "linear-fixture".to_string(),
    input_size: SIZE as usize,
    normalization: Normalization::Caffe,
    layers: vec![
      LayerSpec::GlobalAvgPool2d,
      LayerSpec::Dense {
        name: "classifier".to_string(),
        weight: ParamTensor::filled(vec![3, 1], 1.0),
        bias: None,
        activation: None,
      },
    ],
  })
  .expect("valid linear fixture")
}

pub fn write_model(dir: &Path, model: &ClassifierModel) -> PathBuf {
  let path = dir.join("best_model.json");
  model.save(&path).expect("save model");
  path
}

pub fn pipeline(model: ClassifierModel) -> ScanPipeline {
  ScanPipeline::new(
    Arc::new(ModelHandle::with_model(model)),
    Compositor::default(),
  )
}

/// 左半白、右半黑
pub fn half_white() -> RgbImage {
  RgbImage::from_fn(SIZE, SIZE, |x, _| {
    if x < SIZE / 2 {
      Rgb([255, 255, 255])
    } else {
      Rgb([0, 0, 0])
    }
  })
}

pub fn black() -> RgbImage {
  RgbImage::from_pixel(SIZE, SIZE, Rgb([0, 0, 0]))
}

pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
  let mut bytes = Vec::new();
  image
    .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
    .expect("encode png");
  bytes
}

pub fn out_paths(dir: &Path, tag: &str) -> (PathBuf, PathBuf) {
  (
    dir.join(format!("{tag}_original.png")),
    dir.join(format!("{tag}_gradcam.png")),
  )
}
