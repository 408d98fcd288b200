// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::{queue_order, CrawlTask};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Instant;

/// 堆内任务包装
///
/// BinaryHeap弹出最大元素，这里把queue_order反转，
/// 使"最优先"的任务成为堆顶。
#[derive(Debug, Clone)]
struct QueuedTask(CrawlTask);

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        queue_order(&self.0, &other.0)
            .then_with(|| self.0.id.cmp(&other.0.id))
            .reverse()
    }
}

/// 单个域名的优先级队列
#[derive(Debug, Default)]
pub struct DomainQueue {
    heap: BinaryHeap<QueuedTask>,
}

impl DomainQueue {
    /// 创建空队列
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队
    pub fn push(&mut self, task: CrawlTask) {
        self.heap.push(QueuedTask(task));
    }

    /// 弹出当前最优先的任务
    pub fn pop(&mut self) -> Option<CrawlTask> {
        self.heap.pop().map(|q| q.0)
    }

    /// 查看当前最优先的任务
    pub fn peek(&self) -> Option<&CrawlTask> {
        self.heap.peek().map(|q| &q.0)
    }

    /// 队列长度
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// 队列是否为空
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// 延迟重试条目
#[derive(Debug, Clone)]
struct DeferredTask {
    ready_at: Instant,
    task: CrawlTask,
}

impl PartialEq for DeferredTask {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.task.id == other.task.id
    }
}

impl Eq for DeferredTask {}

impl PartialOrd for DeferredTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeferredTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ready_at
            .cmp(&other.ready_at)
            .then_with(|| self.task.id.cmp(&other.task.id))
    }
}

/// 延迟队列
///
/// 重试退避通过时间最小堆实现：任务带着就绪时间入堆，
/// 到点后由调度器捞回域名队列。工作器不会抱着调度器状态睡眠。
#[derive(Debug, Default)]
pub struct DeferredQueue {
    heap: BinaryHeap<Reverse<DeferredTask>>,
}

impl DeferredQueue {
    /// 创建空的延迟队列
    pub fn new() -> Self {
        Self::default()
    }

    /// 在指定时间点后就绪
    pub fn push(&mut self, task: CrawlTask, ready_at: Instant) {
        self.heap.push(Reverse(DeferredTask { ready_at, task }));
    }

    /// 取出所有已就绪的任务
    pub fn pop_ready(&mut self, now: Instant) -> Vec<CrawlTask> {
        let mut ready = Vec::new();
        while let Some(Reverse(front)) = self.heap.peek() {
            if front.ready_at > now {
                break;
            }
            if let Some(Reverse(entry)) = self.heap.pop() {
                ready.push(entry.task);
            }
        }
        ready
    }

    /// 等待中的任务数
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// 是否没有等待中的任务
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
