// 该文件是 Naoying （脑影） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::Path;

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
}

fn ensure_parent(path: &Path) -> Result<(), std::io::Error> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }
  Ok(())
}

/// 保存图像，编码格式由扩展名决定
pub fn save_rgb_image(image: &RgbImage, path: &Path) -> Result<(), SaveImageFileError> {
  ensure_parent(path)?;
  image.save(path)?;
  debug!("保存图像到文件: {}", path.display());
  Ok(())
}

/// 逐字节复制已保存的源图像
pub fn copy_source(source: &Path, target: &Path) -> Result<u64, SaveImageFileError> {
  ensure_parent(target)?;
  let bytes = std::fs::copy(source, target)?;
  debug!("复制图像 {} -> {}", source.display(), target.display());
  Ok(bytes)
}
