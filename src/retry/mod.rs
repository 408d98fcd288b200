// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 错误分类器
pub mod classifier;
/// 重试计划器
pub mod planner;

pub use classifier::{Classification, ErrorClassifier, RetryStrategy};
pub use planner::{RetryDecision, RetryPlanner};
