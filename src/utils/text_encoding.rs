// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use lru::LruCache;
use once_cell::sync::Lazy;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

/// 文本编码处理错误类型
#[derive(Error, Debug, Clone)]
pub enum TextEncodingError {
    #[error("encoding conversion failed: {0}")]
    ConversionFailed(String),

    #[error("invalid encoding label: {0}")]
    InvalidEncoding(String),
}

/// 按主机缓存的编码检测结果
///
/// 同一站点的页面几乎总是使用同一编码，缓存检测结果
/// 可以跳过对后续页面的整体扫描
static HOST_ENCODING_CACHE: Lazy<Mutex<LruCache<String, &'static Encoding>>> =
    Lazy::new(|| Mutex::new(LruCache::new(std::num::NonZeroUsize::new(256).unwrap())));

/// 将原始响应字节解码为UTF-8字符串
///
/// 解码顺序：
/// 1. Content-Type头中的charset标签
/// 2. 有效的UTF-8直接通过
/// 3. 按主机缓存的历史检测结果
/// 4. chardetng整体检测
///
/// # 参数
///
/// * `input` - 原始字节
/// * `charset_hint` - Content-Type头中的charset标签（如果有）
/// * `host` - 来源主机，用于检测结果缓存
///
/// # 返回值
///
/// 解码后的UTF-8字符串
pub fn decode_body(
    input: &[u8],
    charset_hint: Option<&str>,
    host: Option<&str>,
) -> Result<String, TextEncodingError> {
    // 1. Honor an explicit charset label when it resolves to a known encoding
    if let Some(label) = charset_hint {
        if let Some(encoding) = Encoding::for_label(label.trim().as_bytes()) {
            let (decoded, _, had_errors) = encoding.decode(input);
            if !had_errors {
                cache_host_encoding(host, encoding);
                return Ok(decoded.into_owned());
            }
            warn!(
                "declared charset '{}' produced replacement characters, falling back to detection",
                label
            );
        } else {
            warn!("unknown charset label '{}' in content-type", label);
        }
    }

    // 2. Valid UTF-8 passes through untouched
    if let Ok(utf8_str) = std::str::from_utf8(input) {
        return Ok(utf8_str.to_string());
    }

    // 3. Reuse the encoding previously detected for this host
    if let Some(encoding) = cached_host_encoding(host) {
        let (decoded, _, had_errors) = encoding.decode(input);
        if !had_errors {
            debug!("decoded body with cached encoding {}", encoding.name());
            return Ok(decoded.into_owned());
        }
    }

    // 4. Full detection pass
    let mut detector = EncodingDetector::new();
    detector.feed(input, true);
    let encoding = detector.guess(None, true);
    debug!("detected body encoding: {}", encoding.name());

    let (decoded, _, had_errors) = encoding.decode(input);
    if had_errors && encoding.name() != "UTF-8" {
        return Err(TextEncodingError::ConversionFailed(format!(
            "body could not be decoded as {}",
            encoding.name()
        )));
    }

    cache_host_encoding(host, encoding);
    Ok(decoded.into_owned())
}

/// 从Content-Type头中提取charset标签
pub fn charset_from_content_type(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .map(|part| part.trim())
        .find_map(|part| part.strip_prefix("charset="))
        .map(|cs| cs.trim_matches('"'))
}

fn cached_host_encoding(host: Option<&str>) -> Option<&'static Encoding> {
    let host = host?;
    HOST_ENCODING_CACHE.lock().unwrap().get(host).copied()
}

fn cache_host_encoding(host: Option<&str>, encoding: &'static Encoding) {
    if let Some(host) = host {
        HOST_ENCODING_CACHE
            .lock()
            .unwrap()
            .put(host.to_string(), encoding);
    }
}
