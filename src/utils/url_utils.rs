// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use url::{ParseError, Url};

/// 提取URL的域名部分
///
/// 域名是限流、策略和会话的作用域单位。`www.`前缀会被去掉，
/// 使 `www.example.com` 与 `example.com` 归入同一个域。
pub fn domain_of(url_str: &str) -> Result<String, ParseError> {
    let url = Url::parse(url_str)?;
    let host = url.host_str().ok_or(ParseError::EmptyHost)?;
    let host = host.to_ascii_lowercase();
    Ok(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// 规范化URL作为去重键
///
/// 去掉fragment，主机名转为小写。查询串保留，因为同一路径
/// 不同查询参数可能对应不同的页面。
pub fn normalize_url(url_str: &str) -> Result<String, ParseError> {
    let mut url = Url::parse(url_str)?;
    url.set_fragment(None);
    if let Some(host) = url.host_str() {
        let lower = host.to_ascii_lowercase();
        if lower != host {
            // set_host 只在解析失败时返回错误，这里主机名已验证过
            url.set_host(Some(&lower)).map_err(|_| ParseError::EmptyHost)?;
        }
    }
    Ok(url.to_string())
}
