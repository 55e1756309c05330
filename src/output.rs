// 该文件是 Naoying （脑影） 项目的一部分。
// src/output.rs - 解释图合成与输出
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

use image::RgbImage;
use thiserror::Error;

use crate::{predict::Label, saliency::SaliencyMap};

pub mod draw;
pub mod heatmap;

mod save_image_file;
pub use self::draw::LabelStamp;
pub use self::save_image_file::{SaveImageFileError, copy_source, save_rgb_image};

#[derive(Error, Debug)]
pub enum CompositeError {
  #[error("读取字体文件 {path:?} 错误: {source}")]
  FontIo {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
  #[error("保存合成图像错误: {0}")]
  Save(#[from] SaveImageFileError),
}

/// 将显著图与源图像合成为解释图
#[derive(Clone, Default)]
pub struct Compositor {
  stamp: LabelStamp,
}

impl Compositor {
  pub fn new(stamp: LabelStamp) -> Self {
    Self { stamp }
  }

  /// 可选字体路径，为空时使用内置字体
  pub fn from_font_path(font: Option<&Path>) -> Result<Self, CompositeError> {
    let stamp = match font {
      Some(path) => LabelStamp::default().with_font_file(path)?,
      None => LabelStamp::default(),
    };
    Ok(Self::new(stamp))
  }

  pub fn stamp(&self) -> &LabelStamp {
    &self.stamp
  }

  pub fn compose(&self, map: &SaliencyMap, image: &RgbImage, label: Label) -> RgbImage {
    // 阴性结果不叠加热力图
    let mut composite = if label.is_positive() {
      let grid = heatmap::upsample(map, image.width(), image.height());
      heatmap::blend(image, &heatmap::colorize(&grid))
    } else {
      image.clone()
    };
    self.stamp.stamp(&mut composite, label);
    composite
  }

  pub fn render(
    &self,
    map: &SaliencyMap,
    image: &RgbImage,
    label: Label,
    out: &Path,
  ) -> Result<(), CompositeError> {
    let composite = self.compose(map, image, label);
    save_rgb_image(&composite, out)?;
    Ok(())
  }
}
