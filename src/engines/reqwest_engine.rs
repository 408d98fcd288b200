// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::traits::{FetchError, FetchRequest, FetchResponse, Fetcher};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Instant;

/// 基于reqwest的默认抓取引擎
///
/// 每个代理绑定一个独立的Client（连接池与cookie存储随之隔离），
/// 直连请求共用无代理Client。
pub struct ReqwestFetcher {
    /// 代理端点到Client的缓存，None键为直连
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestFetcher {
    /// 创建新的抓取引擎实例
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, proxy: &Option<String>) -> Result<Client, FetchError> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(proxy) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder().cookie_store(true);
        if let Some(endpoint) = proxy {
            let p = reqwest::Proxy::all(endpoint)
                .map_err(|e| FetchError::Other(format!("invalid proxy {}: {}", endpoint, e)))?;
            builder = builder.proxy(p);
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::Other(format!("client build failed: {}", e)))?;
        clients.insert(proxy.clone(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let client = self.client_for(&request.proxy)?;
        let start = Instant::now();

        let response = client
            .get(&request.url)
            .header("User-Agent", &request.user_agent)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::RequestFailed(e)
                }
            })?;

        let status_code = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await.unwrap_or_default();

        Ok(FetchResponse {
            status_code,
            body,
            headers,
            elapsed: start.elapsed(),
        })
    }

    fn name(&self) -> &'static str {
        "reqwest"
    }
}
