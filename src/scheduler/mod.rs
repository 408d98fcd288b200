// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 调度器
pub mod crawl_scheduler;
/// 域名队列与延迟队列
pub mod queue;

pub use crawl_scheduler::{CrawlScheduler, EnqueueRequest, QueueSnapshot};
