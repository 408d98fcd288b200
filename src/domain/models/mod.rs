// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 抓取结果模型
pub mod outcome;
/// 会话与代理模型
pub mod session;
/// 任务模型
pub mod task;
