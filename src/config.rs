// 该文件是 Naoying （脑影） 项目的一部分。
// src/config.rs - 服务参数配置
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

use std::{path::PathBuf, sync::Arc};

use clap::Args;
use tracing::info;

use crate::{
  model::ModelHandle,
  output::{CompositeError, Compositor},
  task::ScanPipeline,
};

/// 各可执行程序共享的服务配置
#[derive(Args, Debug, Clone)]
pub struct ServiceConfig {
  /// 模型文件路径（JSON 架构与权重）
  #[arg(
    long,
    env = "NAOYING_MODEL",
    default_value = "model/best_model.json",
    value_name = "FILE"
  )]
  pub model: PathBuf,

  /// 标签字体文件（TTF/OTF），未设置时使用内置字体
  #[arg(long, env = "NAOYING_FONT", value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 输出目录
  #[arg(long, default_value = "uploads", value_name = "DIR")]
  pub output_dir: PathBuf,

  /// 输出图像扩展名，决定编码格式
  #[arg(long, default_value = "jpg", value_name = "EXT")]
  pub extension: String,
}

impl ServiceConfig {
  pub fn model_handle(&self) -> Arc<ModelHandle> {
    Arc::new(ModelHandle::new(&self.model))
  }

  pub fn compositor(&self) -> Result<Compositor, CompositeError> {
    Compositor::from_font_path(self.font.as_deref())
  }

  /// 构造流水线并预加载模型
  pub fn pipeline(&self) -> anyhow::Result<ScanPipeline> {
    info!("模型文件路径: {}", self.model.display());
    let model = self.model_handle();
    model.preload()?;
    Ok(ScanPipeline::new(model, self.compositor()?))
  }
}

pub fn init_logging() {
  tracing_subscriber::fmt::init();
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser)]
  struct Cli {
    #[command(flatten)]
    config: ServiceConfig,
  }

  #[test]
  fn explicit_flags_override_defaults() {
    let cli = Cli::parse_from([
      "naoying",
      "--model",
      "weights/m.json",
      "--output-dir",
      "out",
      "--extension",
      "png",
    ]);
    assert_eq!(cli.config.model, PathBuf::from("weights/m.json"));
    assert_eq!(cli.config.output_dir, PathBuf::from("out"));
    assert_eq!(cli.config.extension, "png");
  }

  #[test]
  fn missing_model_fails_pipeline_startup() {
    let cli = Cli::parse_from(["naoying", "--model", "/nonexistent/naoying.json"]);
    assert!(cli.config.pipeline().is_err());
  }
}
