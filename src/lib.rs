// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 包含核心业务实体：任务、抓取结果、会话
pub mod domain;

/// 引擎模块
///
/// 定义抓取引擎接口以及默认的reqwest实现
pub mod engines;

/// 限流模块
///
/// 按域名进行准入控制：滑动窗口限速、熔断器、自适应速率调整
pub mod limiter;

/// 爬取策略模块
///
/// 缓存每个域名的robots规则、爬取延迟和页面预算
pub mod policy;

/// 重试模块
///
/// 错误分类与重试计划：退避公式、抖动、重试上限
pub mod retry;

/// 调度模块
///
/// 多域名优先级调度器，组合策略、限流、会话与重试组件
pub mod scheduler;

/// 会话模块
///
/// 管理爬取会话与代理的生命周期和健康状态
pub mod session;

/// 工具模块
///
/// 提供通用的工具函数和辅助功能
pub mod utils;

/// 工作器模块
///
/// 实现抓取工作器循环和工作器管理
pub mod workers;
