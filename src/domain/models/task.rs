// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::outcome::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// 任务优先级
///
/// 五个有序级别，Critical最高。调度器按优先级出队，
/// 重试任务会被降一级，避免反复失败的任务饿死新任务。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// 关键任务，如联系页
    Critical,
    /// 高优先级
    High,
    /// 中优先级
    #[default]
    Medium,
    /// 低优先级
    Low,
    /// 后台任务
    Background,
}

impl TaskPriority {
    /// 优先级序号，数值越小优先级越高
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 3,
            TaskPriority::Background => 4,
        }
    }

    /// 降低一个优先级，Background不再下降
    pub fn demote(&self) -> TaskPriority {
        match self {
            TaskPriority::Critical => TaskPriority::High,
            TaskPriority::High => TaskPriority::Medium,
            TaskPriority::Medium => TaskPriority::Low,
            TaskPriority::Low | TaskPriority::Background => TaskPriority::Background,
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskPriority::Critical => write!(f, "critical"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Medium => write!(f, "medium"),
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Background => write!(f, "background"),
        }
    }
}

impl FromStr for TaskPriority {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(TaskPriority::Critical),
            "high" => Ok(TaskPriority::High),
            "medium" => Ok(TaskPriority::Medium),
            "low" => Ok(TaskPriority::Low),
            "background" => Ok(TaskPriority::Background),
            _ => Err(()),
        }
    }
}

/// 任务状态枚举
///
/// 状态转换遵循以下流程：
/// Pending → Active → Completed/Failed，重试时 Active → Pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 等待调度
    #[default]
    Pending,
    /// 正在被工作器处理
    Active,
    /// 成功完成
    Completed,
    /// 永久失败
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Active => write!(f, "active"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// 领域错误类型
#[derive(Error, Debug)]
pub enum DomainError {
    /// 无效的状态转换
    #[error("Invalid state transition")]
    InvalidStateTransition,

    /// 验证错误
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// 爬取任务实体
///
/// 表示一个待抓取的页面。任务归属于其所在的域名队列，
/// 解决后进入Completed或Failed终态集合。
/// 不变式：attempt不会超过max_attempts，一旦达到上限任务永久失败，
/// 不会再被重新入队。
#[derive(Debug, Clone)]
pub struct CrawlTask {
    /// 任务唯一标识符
    pub id: Uuid,
    /// 目标URL（已规范化）
    pub url: String,
    /// 所属域名，限流与会话的作用域
    pub domain: String,
    /// 任务优先级
    pub priority: TaskPriority,
    /// 页面类型提示，由外部内容分类器给出
    pub page_type_hint: Option<String>,
    /// 置信度 [0,1]，同优先级下置信度高者先出队
    pub confidence: f64,
    /// 任务状态
    pub status: TaskStatus,
    /// 已尝试次数
    pub attempt: u32,
    /// 最大尝试次数
    pub max_attempts: u32,
    /// 发现该URL的来源页面
    pub discovered_from: Option<String>,
    /// 入队时间
    pub enqueued_at: DateTime<Utc>,
    /// 首次尝试时间，用于总耗时上限判断
    pub first_attempt_at: Option<Instant>,
    /// 最近一次失败的错误类型
    pub last_error: Option<ErrorKind>,
}

impl CrawlTask {
    /// 创建一个新的爬取任务
    ///
    /// # 参数
    ///
    /// * `url` - 目标URL
    /// * `domain` - 所属域名
    /// * `priority` - 优先级
    /// * `confidence` - 置信度，会被钳制到[0,1]
    ///
    /// # 返回值
    ///
    /// 返回新创建的任务实例
    pub fn new(url: String, domain: String, priority: TaskPriority, confidence: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
            domain,
            priority,
            page_type_hint: None,
            confidence: confidence.clamp(0.0, 1.0),
            status: TaskStatus::Pending,
            attempt: 0,
            max_attempts: 4,
            discovered_from: None,
            enqueued_at: Utc::now(),
            first_attempt_at: None,
            last_error: None,
        }
    }

    /// 标记任务开始执行
    pub fn start(&mut self) -> Result<(), DomainError> {
        match self.status {
            TaskStatus::Pending => {
                self.status = TaskStatus::Active;
                self.attempt += 1;
                if self.first_attempt_at.is_none() {
                    self.first_attempt_at = Some(Instant::now());
                }
                Ok(())
            }
            _ => Err(DomainError::InvalidStateTransition),
        }
    }

    /// 标记任务完成
    pub fn complete(&mut self) -> Result<(), DomainError> {
        match self.status {
            TaskStatus::Active => {
                self.status = TaskStatus::Completed;
                Ok(())
            }
            _ => Err(DomainError::InvalidStateTransition),
        }
    }

    /// 标记任务永久失败
    pub fn fail(&mut self, kind: ErrorKind) -> Result<(), DomainError> {
        match self.status {
            TaskStatus::Active => {
                self.status = TaskStatus::Failed;
                self.last_error = Some(kind);
                Ok(())
            }
            _ => Err(DomainError::InvalidStateTransition),
        }
    }

    /// 未执行即判定失败
    ///
    /// 用于任务在出队前就被裁决的场合，如robots.txt禁止抓取。
    /// 只接受Pending状态，不占用尝试次数。
    pub fn fail_before_start(&mut self, kind: ErrorKind) -> Result<(), DomainError> {
        match self.status {
            TaskStatus::Pending => {
                self.status = TaskStatus::Failed;
                self.last_error = Some(kind);
                Ok(())
            }
            _ => Err(DomainError::InvalidStateTransition),
        }
    }

    /// 为重试做准备：回到Pending并降一级优先级
    pub fn requeue_for_retry(&mut self, kind: ErrorKind) -> Result<(), DomainError> {
        match self.status {
            TaskStatus::Active => {
                self.status = TaskStatus::Pending;
                self.priority = self.priority.demote();
                self.last_error = Some(kind);
                Ok(())
            }
            _ => Err(DomainError::InvalidStateTransition),
        }
    }

    /// 是否还有剩余尝试次数
    pub fn attempts_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// 首次尝试以来的总耗时
    pub fn elapsed_since_first_attempt(&self) -> Option<std::time::Duration> {
        self.first_attempt_at.map(|t| t.elapsed())
    }
}

/// 队列排序比较函数
///
/// 先比较优先级（rank小者在前），同优先级时置信度高者在前。
/// 这是一个显式命名的比较函数而非运算符重载：同优先级的两个任务
/// 不是FIFO，置信度0.9的联系页会排在0.3的猜测之前。
pub fn queue_order(a: &CrawlTask, b: &CrawlTask) -> Ordering {
    a.priority
        .rank()
        .cmp(&b.priority.rank())
        .then_with(|| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.enqueued_at.cmp(&b.enqueued_at))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(priority: TaskPriority, confidence: f64) -> CrawlTask {
        CrawlTask::new(
            "https://example.com/a".to_string(),
            "example.com".to_string(),
            priority,
            confidence,
        )
    }

    #[test]
    fn test_queue_order_priority_first() {
        let critical = task(TaskPriority::Critical, 0.1);
        let medium = task(TaskPriority::Medium, 0.9);
        assert_eq!(queue_order(&critical, &medium), Ordering::Less);
    }

    #[test]
    fn test_queue_order_confidence_breaks_ties() {
        let strong = task(TaskPriority::Medium, 0.9);
        let weak = task(TaskPriority::Medium, 0.3);
        assert_eq!(queue_order(&strong, &weak), Ordering::Less);
        assert_eq!(queue_order(&weak, &strong), Ordering::Greater);
    }

    #[test]
    fn test_demote_saturates_at_background() {
        assert_eq!(TaskPriority::Critical.demote(), TaskPriority::High);
        assert_eq!(TaskPriority::Low.demote(), TaskPriority::Background);
        assert_eq!(TaskPriority::Background.demote(), TaskPriority::Background);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut t = task(TaskPriority::High, 0.5);
        t.start().unwrap();
        assert_eq!(t.status, TaskStatus::Active);
        assert_eq!(t.attempt, 1);
        t.complete().unwrap();
        assert_eq!(t.status, TaskStatus::Completed);
        assert!(t.complete().is_err());
    }

    #[test]
    fn test_requeue_demotes_priority() {
        let mut t = task(TaskPriority::Critical, 0.5);
        t.start().unwrap();
        t.requeue_for_retry(ErrorKind::Connection).unwrap();
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.priority, TaskPriority::High);
        assert_eq!(t.last_error, Some(ErrorKind::Connection));
    }

    #[test]
    fn test_fail_before_start_only_from_pending() {
        let mut t = task(TaskPriority::Medium, 0.5);
        t.fail_before_start(ErrorKind::Blocked).unwrap();
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.last_error, Some(ErrorKind::Blocked));
        assert_eq!(t.attempt, 0);

        let mut active = task(TaskPriority::Medium, 0.5);
        active.start().unwrap();
        assert!(active.fail_before_start(ErrorKind::Blocked).is_err());
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(task(TaskPriority::Low, 1.7).confidence, 1.0);
        assert_eq!(task(TaskPriority::Low, -0.2).confidence, 0.0);
    }
}
