// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 错误类型定义
pub mod errors;
/// 遥测初始化
pub mod telemetry;
/// URL工具函数
pub mod url_utils;
