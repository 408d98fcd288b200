// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// 抓取错误类型
#[derive(Error, Debug)]
pub enum FetchError {
    /// 请求失败
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// 超时
    #[error("Timeout")]
    Timeout,
    /// 其他错误
    #[error("Other error: {0}")]
    Other(String),
}

impl FetchError {
    /// 是否为超时错误
    pub fn is_timeout(&self) -> bool {
        match self {
            FetchError::Timeout => true,
            FetchError::RequestFailed(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// 是否为连接级错误
    pub fn is_connect(&self) -> bool {
        matches!(self, FetchError::RequestFailed(e) if e.is_connect())
    }
}

/// 抓取请求
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// 目标URL
    pub url: String,
    /// User-Agent
    pub user_agent: String,
    /// 代理端点URL（无则直连）
    pub proxy: Option<String>,
    /// 超时时间
    pub timeout: Duration,
}

/// 抓取响应
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP状态码
    pub status_code: u16,
    /// 响应体
    pub body: String,
    /// 响应头
    pub headers: HashMap<String, String>,
    /// 请求耗时
    pub elapsed: Duration,
}

impl FetchResponse {
    /// 解析Retry-After响应头（仅支持秒数形式）
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// 抓取引擎特质
///
/// 执行实际的网络请求。调度核心只依赖该接口，
/// 具体实现（HTTP客户端、无头浏览器）是外部协作者。
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// 执行抓取
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;

    /// 引擎名称
    fn name(&self) -> &'static str;
}
