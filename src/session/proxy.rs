// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::ProxySettings;
use crate::domain::models::session::ProxyRecord;
use parking_lot::RwLock;
use uuid::Uuid;

/// 代理池
///
/// 代理被所有会话共享，没有会话独占某个代理。选择按健康度加权：
/// 健康且低延迟的代理被优先选中；连续失败达到阈值的代理被标记为
/// 不健康并排除在选择之外，后续成功反馈会让失败计数衰减回来。
pub struct ProxyPool {
    settings: ProxySettings,
    proxies: RwLock<Vec<ProxyRecord>>,
}

impl ProxyPool {
    /// 从端点列表创建代理池
    pub fn new(endpoints: Vec<String>, settings: ProxySettings) -> Self {
        let proxies = endpoints.into_iter().map(ProxyRecord::new).collect();
        Self {
            settings,
            proxies: RwLock::new(proxies),
        }
    }

    /// 池中是否没有任何代理
    pub fn is_empty(&self) -> bool {
        self.proxies.read().is_empty()
    }

    /// 按健康度加权选择一个代理
    ///
    /// 权重 = 1/(1+平均延迟ms)，不健康的代理权重为0。
    /// 所有代理都不健康时返回None（调用方可以不带代理直连）。
    pub fn pick(&self) -> Option<ProxyRecord> {
        let proxies = self.proxies.read();
        if proxies.is_empty() {
            return None;
        }

        let weights: Vec<f64> = proxies
            .iter()
            .map(|p| {
                if p.healthy {
                    1.0 / (1.0 + p.avg_latency_ms)
                } else {
                    0.0
                }
            })
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return None;
        }

        let mut roll = rand::random_range(0.0..total);
        for (proxy, weight) in proxies.iter().zip(&weights) {
            if roll < *weight {
                return Some(proxy.clone());
            }
            roll -= weight;
        }
        // 浮点累加误差的兜底
        proxies.iter().rfind(|p| p.healthy).cloned()
    }

    /// 记录代理的一次使用结果
    pub fn record_result(&self, proxy_id: Uuid, success: bool, latency_ms: u64) {
        let mut proxies = self.proxies.write();
        let Some(proxy) = proxies.iter_mut().find(|p| p.id == proxy_id) else {
            return;
        };

        let alpha = self.settings.latency_ewma_alpha;
        if proxy.avg_latency_ms == 0.0 {
            proxy.avg_latency_ms = latency_ms as f64;
        } else {
            proxy.avg_latency_ms =
                alpha * latency_ms as f64 + (1.0 - alpha) * proxy.avg_latency_ms;
        }

        if success {
            // 成功让失败计数衰减，达到阈值以下后恢复健康
            proxy.consecutive_failures = proxy.consecutive_failures.saturating_sub(1);
            if proxy.consecutive_failures < self.settings.unhealthy_threshold {
                proxy.healthy = true;
            }
        } else {
            proxy.consecutive_failures += 1;
            if proxy.consecutive_failures >= self.settings.unhealthy_threshold {
                if proxy.healthy {
                    tracing::warn!(endpoint = %proxy.endpoint, "proxy marked unhealthy");
                }
                proxy.healthy = false;
            }
        }
    }

    /// 按ID查找代理
    pub fn get(&self, proxy_id: Uuid) -> Option<ProxyRecord> {
        self.proxies.read().iter().find(|p| p.id == proxy_id).cloned()
    }
}
