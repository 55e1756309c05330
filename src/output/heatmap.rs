// 该文件是 Naoying （脑影） 项目的一部分。
// src/output/heatmap.rs - 热力图上采样、着色与叠加
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

use image::{ImageBuffer, Luma, Rgb, RgbImage, imageops::FilterType};

use crate::saliency::SaliencyMap;

const IMAGE_WEIGHT: f32 = 0.6;
const HEAT_WEIGHT: f32 = 0.4;

pub type HeatGrid = ImageBuffer<Luma<f32>, Vec<f32>>;

/// 双线性上采样到目标尺寸
pub fn upsample(map: &SaliencyMap, width: u32, height: u32) -> HeatGrid {
  let grid = HeatGrid::from_fn(map.width() as u32, map.height() as u32, |x, y| {
    Luma([map.get(x as usize, y as usize)])
  });
  image::imageops::resize(&grid, width, height, FilterType::Triangle)
}

/// JET 色图，输入为 0..=255 的强度
pub fn jet(level: u8) -> Rgb<u8> {
  let x = level as f32 / 255.0;
  let channel = |offset: f32| {
    let v = (1.5 - (4.0 * x - offset).abs()).clamp(0.0, 1.0);
    (v * 255.0).round() as u8
  };
  Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

pub fn colorize(grid: &HeatGrid) -> RgbImage {
  RgbImage::from_fn(grid.width(), grid.height(), |x, y| {
    let v = grid.get_pixel(x, y)[0];
    let level = (255.0 * v).floor().clamp(0.0, 255.0) as u8;
    jet(level)
  })
}

/// `0.6 * image + 0.4 * heat`，四舍五入并饱和
pub fn blend(image: &RgbImage, heat: &RgbImage) -> RgbImage {
  RgbImage::from_fn(image.width(), image.height(), |x, y| {
    let a = image.get_pixel(x, y);
    let b = heat.get_pixel(x, y);
    Rgb(std::array::from_fn(|c| {
      (IMAGE_WEIGHT * a[c] as f32 + HEAT_WEIGHT * b[c] as f32)
        .round()
        .clamp(0.0, 255.0) as u8
    }))
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn jet_endpoints() {
    assert_eq!(jet(0), Rgb([0, 0, 128]));
    assert_eq!(jet(255), Rgb([128, 0, 0]));
    // 中点附近为绿色
    let mid = jet(128);
    assert!(mid[1] == 255 && mid[0] > 100 && mid[2] > 100);
  }

  #[test]
  fn blend_weights() {
    let image = RgbImage::from_pixel(1, 1, Rgb([100, 200, 0]));
    let heat = RgbImage::from_pixel(1, 1, Rgb([0, 255, 255]));
    assert_eq!(blend(&image, &heat).get_pixel(0, 0), &Rgb([60, 222, 102]));
  }

  #[test]
  fn upsample_keeps_constant_maps_constant() {
    let map = SaliencyMap::normalized(2, 2, vec![3.0; 4]).expect("map");
    let grid = upsample(&map, 16, 16);
    assert_eq!(grid.dimensions(), (16, 16));
    assert!(grid.pixels().all(|p| (p[0] - 1.0).abs() < 1e-5));
  }

  #[test]
  fn colorize_matches_grid_size() {
    let map = SaliencyMap::normalized(2, 1, vec![0.0, 1.0]).expect("map");
    let heat = colorize(&upsample(&map, 10, 6));
    assert_eq!(heat.dimensions(), (10, 6));
  }
}
