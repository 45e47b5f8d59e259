// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use url::{ParseError, Url};

/// 将可能为相对路径的URL转换为绝对路径URL
pub fn resolve_url(base_url: &Url, path: &str) -> Result<Url, ParseError> {
    base_url.join(path)
}

/// 规范化待抓取的URL
///
/// 去除片段部分，并将百分号编码的逗号还原为字面逗号，
/// 某些站点的分页链接会带着编码后的逗号出现
pub fn normalize_url(url_str: &str) -> Result<String, ParseError> {
    let cleaned = if url_str.contains("%2C") || url_str.contains("%2c") {
        url_str.replace("%2C", ",").replace("%2c", ",")
    } else {
        url_str.to_string()
    };

    let mut url = Url::parse(&cleaned)?;
    url.set_fragment(None);
    Ok(url.to_string())
}

/// 提取URL的主机名
pub fn host_of(url_str: &str) -> Option<String> {
    Url::parse(url_str)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}

/// 从URL中提取域名主标签
///
/// `https://www.example.co/path` 返回 `example`，用于输出目录命名
pub fn domain_label(url_str: &str) -> Option<String> {
    let host = host_of(url_str)?;
    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() > 2 {
        Some(parts[parts.len() - 2].to_string())
    } else {
        parts.first().map(|p| p.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_absolute_url() {
        let base = Url::parse("http://example.com/a/b").unwrap();
        let path = "http://t.co/c";
        assert_eq!(resolve_url(&base, path).unwrap().as_str(), "http://t.co/c");
    }

    #[test]
    fn test_resolve_protocol_relative_url() {
        let base = Url::parse("https://example.com/a/b").unwrap();
        let path = "//t.co/c";
        assert_eq!(resolve_url(&base, path).unwrap().as_str(), "https://t.co/c");
    }

    #[test]
    fn test_resolve_root_relative_url() {
        let base = Url::parse("http://example.com/a/b").unwrap();
        let path = "/c";
        assert_eq!(
            resolve_url(&base, path).unwrap().as_str(),
            "http://example.com/c"
        );
    }

    #[test]
    fn test_resolve_relative_url() {
        let base = Url::parse("http://example.com/a/b").unwrap();
        let path = "c";
        assert_eq!(
            resolve_url(&base, path).unwrap().as_str(),
            "http://example.com/a/c"
        );
    }

    #[test]
    fn test_normalize_decodes_commas() {
        assert_eq!(
            normalize_url("http://example.com/list%2C1%2C2").unwrap(),
            "http://example.com/list,1,2"
        );
    }

    #[test]
    fn test_normalize_strips_fragment() {
        assert_eq!(
            normalize_url("http://example.com/page#section").unwrap(),
            "http://example.com/page"
        );
    }

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("https://www.example.com/a"),
            Some("www.example.com".to_string())
        );
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn test_domain_label() {
        assert_eq!(
            domain_label("https://www.example.com/a"),
            Some("example".to_string())
        );
        assert_eq!(
            domain_label("https://example.com"),
            Some("example".to_string())
        );
        assert_eq!(
            domain_label("http://localhost:8080"),
            Some("localhost".to_string())
        );
    }
}
