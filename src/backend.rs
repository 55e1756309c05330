// 该文件是 Naoying （脑影） 项目的一部分。
// src/backend.rs - 张量后端选择
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

use burn::backend::{Autodiff, NdArray, ndarray::NdArrayDevice};

/// 推理后端（不记录计算图）
pub type InferenceBackend = NdArray<f32>;

/// 用于 Grad-CAM 的自动微分后端
pub type GradientBackend = Autodiff<InferenceBackend>;

pub fn default_device() -> NdArrayDevice {
  NdArrayDevice::Cpu
}

pub fn backend_name() -> &'static str {
  "NdArray (CPU)"
}
