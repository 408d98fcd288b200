// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// 某个域名的已解析爬取策略
#[derive(Debug, Clone)]
pub struct FetchedPolicy {
    /// robots.txt原文，空串表示无限制
    pub robots_content: String,
    /// Crawl-delay指令给出的爬取延迟
    pub crawl_delay: Option<Duration>,
}

/// 策略提供者接口
///
/// 按域名提供已解析的robots规则与爬取延迟，可刷新。
/// robots的获取属于外部协作者，策略缓存只消费结果。
#[async_trait]
pub trait PolicyProvider: Send + Sync {
    /// 获取域名的爬取策略
    async fn fetch_policy(&self, domain: &str) -> Result<FetchedPolicy>;
}

/// 基于HTTP的策略提供者
///
/// 抓取`{scheme}://{domain}/robots.txt`并解析Crawl-delay。
/// 404视为无robots.txt（全部允许）；服务端错误会在有限次数内重试。
#[derive(Clone)]
pub struct HttpPolicyProvider {
    client: Client,
    user_agent: String,
    scheme: String,
    max_attempts: u32,
}

impl HttpPolicyProvider {
    /// 创建新的策略提供者实例
    pub fn new(user_agent: String) -> Self {
        Self {
            client: Client::new(),
            user_agent,
            scheme: "https".to_string(),
            max_attempts: 3,
        }
    }

    /// 指定scheme（测试时用http指向本地mock服务）
    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    async fn fetch_robots_content(&self, domain: &str) -> Result<String> {
        let robots_url = format!("{}://{}/robots.txt", self.scheme, domain);

        let mut attempt = 0;
        let mut last_error = None;

        while attempt < self.max_attempts {
            attempt += 1;
            let response = self
                .client
                .get(&robots_url)
                .header("User-Agent", &self.user_agent)
                .timeout(Duration::from_secs(5))
                .send()
                .await;

            match response {
                Ok(resp) => {
                    if resp.status().is_success() {
                        return Ok(resp.text().await.unwrap_or_default());
                    } else if resp.status() == reqwest::StatusCode::NOT_FOUND {
                        // 404是合法响应，表示没有robots.txt
                        return Ok(String::new());
                    } else if resp.status().is_server_error() {
                        last_error = Some(anyhow::anyhow!("Server error: {}", resp.status()));
                    } else {
                        // 其他状态（403等）可能是永久的，按"全部允许"处理
                        return Ok(String::new());
                    }
                }
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Request failed: {}", e));
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("robots fetch failed")))
    }
}

#[async_trait]
impl PolicyProvider for HttpPolicyProvider {
    async fn fetch_policy(&self, domain: &str) -> Result<FetchedPolicy> {
        let content = self.fetch_robots_content(domain).await?;
        let crawl_delay = parse_crawl_delay(&content, &self.user_agent);
        Ok(FetchedPolicy {
            robots_content: content,
            crawl_delay,
        })
    }
}

/// 解析Crawl-delay指令
///
/// 简单的解析逻辑：找到匹配该User-Agent的块，在块内查找Crawl-delay。
/// 不完全符合RFC规范，但足以处理大多数情况。
pub fn parse_crawl_delay(content: &str, user_agent: &str) -> Option<Duration> {
    let mut current_agent_matched = false;
    let mut delay: Option<f64> = None;
    let mut specific_agent_found = false;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let lower_line = line.to_lowercase();
        if lower_line.starts_with("user-agent:") {
            let agent = line[11..].trim();
            if agent == "*" {
                current_agent_matched = !specific_agent_found;
            } else if user_agent.to_lowercase().contains(&agent.to_lowercase()) {
                current_agent_matched = true;
                specific_agent_found = true;
                // 找到更具体的agent块后重置delay
                delay = None;
            } else {
                current_agent_matched = false;
            }
        } else if lower_line.starts_with("crawl-delay:") && current_agent_matched {
            if let Ok(d) = line[12..].trim().parse::<f64>() {
                delay = Some(d);
            }
        }
    }

    delay.map(Duration::from_secs_f64)
}
