// 该文件是 Naoying （脑影） 项目的一部分。
// src/input.rs - 图像输入预处理
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

use std::path::{Path, PathBuf};

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{InputTensor, Normalization},
  model::ClassifierModel,
  output::{SaveImageFileError, save_rgb_image},
};

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("图像解码错误: {0}")]
  Decode(image::ImageError),
  #[error("保存缩放后图像错误: {0}")]
  Persist(#[from] SaveImageFileError),
}

/// 预处理结果：缩放后的图像（已写入磁盘）与模型输入张量
#[derive(Debug, Clone)]
pub struct PreparedImage {
  pub image: RgbImage,
  pub tensor: InputTensor,
  pub source_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Preprocessor {
  size: u32,
  normalization: Normalization,
  filter: FilterType,
}

impl Preprocessor {
  pub fn new(size: u32, normalization: Normalization) -> Self {
    Self {
      size,
      normalization,
      // 与 PIL 默认的双三次插值一致，结果确定
      filter: FilterType::CatmullRom,
    }
  }

  pub fn for_model(model: &ClassifierModel) -> Self {
    Self::new(model.input_size() as u32, model.normalization())
  }

  /// 解码、转换为 RGB 并缩放，不产生文件
  pub fn decode(&self, bytes: &[u8]) -> Result<RgbImage, PreprocessError> {
    let decoded = image::load_from_memory(bytes).map_err(PreprocessError::Decode)?;
    debug!(
      "输入图像解码完成: {}x{}, 颜色类型 {:?}",
      decoded.width(),
      decoded.height(),
      decoded.color()
    );
    let rgb = decoded.to_rgb8();
    Ok(image::imageops::resize(
      &rgb,
      self.size,
      self.size,
      self.filter,
    ))
  }

  /// 解码并写出缩放后的源图像，然后生成输入张量
  ///
  /// 解码失败时不会写任何文件。
  pub fn preprocess(
    &self,
    bytes: &[u8],
    source_out: &Path,
  ) -> Result<PreparedImage, PreprocessError> {
    let image = self.decode(bytes)?;
    save_rgb_image(&image, source_out)?;
    let tensor = InputTensor::from_rgb_image(&image, self.normalization);

    Ok(PreparedImage {
      image,
      tensor,
      source_path: source_out.to_path_buf(),
    })
  }
}
