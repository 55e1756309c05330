// 该文件是 Naoying （脑影） 项目的一部分。
// src/frame.rs - NCHW 输入张量定义
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

use burn::tensor::{Tensor, TensorData, backend::Backend};
use image::RgbImage;
use serde::{Deserialize, Serialize};

const RGB_CHANNELS: usize = 3;

// ResNet50 preprocess_input 使用的 BGR 均值
const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 主干网络固定的输入归一化方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
  /// RGB -> BGR，减去逐通道均值，不缩放
  #[default]
  Caffe,
  /// 缩放到 [0, 1]，ImageNet 均值/方差标准化
  Torch,
  /// 缩放到 [-1, 1]
  Tf,
}

impl Normalization {
  /// 返回输出通道 `c` 对应的像素值（已归一化）
  fn apply(&self, pixel: &[u8; 3], c: usize) -> f32 {
    match self {
      Normalization::Caffe => {
        // 输出通道顺序为 BGR
        let value = pixel[RGB_CHANNELS - 1 - c] as f32;
        value - CAFFE_MEAN_BGR[c]
      }
      Normalization::Torch => {
        let value = pixel[c] as f32 / 255.0;
        (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c]
      }
      Normalization::Tf => pixel[c] as f32 / 127.5 - 1.0,
    }
  }
}

/// 带批次维度（大小为 1）的 NCHW 浮点输入张量
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  data: Box<[f32]>,
  height: usize,
  width: usize,
}

impl InputTensor {
  pub fn from_rgb_image(image: &RgbImage, normalization: Normalization) -> Self {
    let (width, height) = image.dimensions();
    let (width, height) = (width as usize, height as usize);
    let plane = width * height;
    let mut data = vec![0f32; RGB_CHANNELS * plane];

    for (x, y, pixel) in image.enumerate_pixels() {
      let idx = y as usize * width + x as usize;
      for c in 0..RGB_CHANNELS {
        data[c * plane + idx] = normalization.apply(&pixel.0, c);
      }
    }

    Self {
      data: data.into_boxed_slice(),
      height,
      width,
    }
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  /// `[N, C, H, W]`
  pub fn shape(&self) -> [usize; 4] {
    [1, RGB_CHANNELS, self.height, self.width]
  }

  pub fn as_nchw(&self) -> &[f32] {
    &self.data
  }

  pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
    Tensor::from_data(TensorData::new(self.data.to_vec(), self.shape()), device)
  }
}
