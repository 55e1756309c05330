// 该文件是 Naoying （脑影） 项目的一部分。
// src/output/draw.rs - 诊断标签绘制
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_text_mut, text_size},
  rect::Rect,
};
use tracing::info;

use crate::{output::CompositeError, predict::Label};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_TEXT_HORIZONTAL_PADDING: i32 = 4;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_ORIGIN: (i32, i32) = (10, 5);

const POSITIVE_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const NEGATIVE_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

pub fn label_color(label: Label) -> Rgb<u8> {
  if label.is_positive() {
    Rgb(POSITIVE_COLOR)
  } else {
    Rgb(NEGATIVE_COLOR)
  }
}

/// 在图像左上角绘制诊断标签：标签颜色底框加白色文字
#[derive(Clone)]
pub struct LabelStamp {
  font_size: f32,
  label_text_height: i32,
  label_text_horizontal_padding: i32,
  label_text_vertical_padding: i32,
  origin: (i32, i32),
  font: FontArc,
}

impl Default for LabelStamp {
  fn default() -> Self {
    let font_data: &'static [u8] = include_bytes!("../../assets/font.ttf"); // default font
    let font = FontArc::try_from_slice(font_data).expect("无法加载嵌入的字体文件");

    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_text_horizontal_padding: LABEL_TEXT_HORIZONTAL_PADDING,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      origin: LABEL_ORIGIN,
      font,
    }
  }
}

impl LabelStamp {
  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = font;
    self
  }

  /// 以字体文件替换内置字体
  pub fn with_font_file(self, path: &Path) -> Result<Self, CompositeError> {
    let data = std::fs::read(path).map_err(|source| CompositeError::FontIo {
      path: path.to_path_buf(),
      source,
    })?;
    let font = FontArc::try_from_vec(data)?;
    info!("加载标签字体: {}", path.display());
    Ok(self.with_font(font))
  }

  /// 标签底框在给定图像上的区域，空间不足时为 `None`
  pub fn badge_rect(&self, image: &RgbImage, label: Label) -> Option<Rect> {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let (x, y) = self.origin;
    if x >= w || y >= h {
      return None;
    }

    let (text_width, _) = text_size(PxScale::from(self.font_size), &self.font, label.as_str());
    let width = (text_width as i32 + 2 * self.label_text_horizontal_padding).min(w - x);
    let height = self.label_text_height.min(h - y);
    (width > 0 && height > 0).then(|| Rect::at(x, y).of_size(width as u32, height as u32))
  }

  pub fn stamp(&self, image: &mut RgbImage, label: Label) {
    let Some(rect) = self.badge_rect(image, label) else {
      return;
    };

    // 文字先画在底框上，再贴回原图，保证不越出底框
    let mut badge = RgbImage::from_pixel(rect.width(), rect.height(), label_color(label));
    draw_text_mut(
      &mut badge,
      Rgb(TEXT_COLOR),
      self.label_text_horizontal_padding,
      self.label_text_vertical_padding,
      PxScale::from(self.font_size),
      &self.font,
      label.as_str(),
    );
    image::imageops::replace(image, &badge, rect.left() as i64, rect.top() as i64);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  fn badge_pixels(image: &RgbImage, rect: Rect) -> Vec<Rgb<u8>> {
    let mut pixels = Vec::new();
    for y in rect.top()..=rect.bottom() {
      for x in rect.left()..=rect.right() {
        pixels.push(*image.get_pixel(x as u32, y as u32));
      }
    }
    pixels
  }

  #[test]
  fn badge_carries_label_text() {
    let stamp = LabelStamp::default();
    for label in [Label::TumorDetected, Label::NoTumorDetected] {
      let mut image = RgbImage::from_pixel(224, 224, Rgb([128, 128, 128]));
      stamp.stamp(&mut image, label);

      let rect = stamp.badge_rect(&image, label).expect("room for badge");
      let pixels = badge_pixels(&image, rect);
      let background = label_color(label);

      assert_eq!(image.get_pixel(rect.left() as u32, rect.top() as u32), &background);
      let text_pixels = pixels.iter().filter(|p| **p != background).count();
      assert!(text_pixels > 20, "{label}: only {text_pixels} text pixels");
      // 白色文字会抬高底色中为 0 的通道
      let lifted = |p: &Rgb<u8>| if label.is_positive() { p[1] > 128 } else { p[0] > 128 };
      assert!(pixels.iter().any(lifted));
      assert!(pixels.iter().map(|p| p.0).collect::<HashSet<_>>().len() > 2);

      // 底框以外保持不变
      assert_eq!(image.get_pixel(223, 223), &Rgb([128, 128, 128]));
    }
  }

  #[test]
  fn text_stays_inside_clipped_badge() {
    let stamp = LabelStamp::default();
    let mut image = RgbImage::from_pixel(40, 12, Rgb([9, 9, 9]));
    stamp.stamp(&mut image, Label::NoTumorDetected);

    let rect = stamp
      .badge_rect(&image, Label::NoTumorDetected)
      .expect("badge");
    assert_eq!((rect.right(), rect.bottom()), (39, 11));
    for (x, y, pixel) in image.enumerate_pixels() {
      let (x, y) = (x as i32, y as i32);
      let inside = rect.left() <= x && x <= rect.right() && rect.top() <= y && y <= rect.bottom();
      assert_eq!(inside, *pixel != Rgb([9, 9, 9]), "({x}, {y})");
    }
  }

  #[test]
  fn tiny_images_are_left_untouched() {
    let stamp = LabelStamp::default();
    let mut tiny = RgbImage::from_pixel(4, 4, Rgb([9, 9, 9]));
    assert!(stamp.badge_rect(&tiny, Label::TumorDetected).is_none());
    stamp.stamp(&mut tiny, Label::TumorDetected);
    assert!(tiny.pixels().all(|p| *p == Rgb([9, 9, 9])));
  }

  #[test]
  fn invalid_font_file_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("font.ttf");
    std::fs::write(&path, b"not a font").expect("write");
    assert!(matches!(
      LabelStamp::default().with_font_file(&path),
      Err(CompositeError::InvalidFont(_))
    ));
    assert!(matches!(
      LabelStamp::default().with_font_file(&dir.path().join("missing.ttf")),
      Err(CompositeError::FontIo { .. })
    ));
  }
}
