// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use uuid::Uuid;

/// 文件名允许的最大长度（字节）
const MAX_FILENAME_LEN: usize = 200;

/// 将任意字符串净化为可安全用作文件名的形式
///
/// 路径分隔符、控制字符和文件系统保留字符均替换为下划线，
/// 首尾的点和空白会被去除，超长名称会被截断。
///
/// # 参数
///
/// * `raw` - 原始字符串（域名、URL片段等）
///
/// # 返回值
///
/// 净化后的文件名；输入完全不可用时返回一个随机短ID
pub fn sanitize_filename(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => out.push('_'),
            c if c.is_control() || c.is_whitespace() => out.push('_'),
            c => out.push(c),
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_').to_string();

    let mut name = if trimmed.is_empty() {
        short_id()
    } else {
        trimmed
    };

    if name.len() > MAX_FILENAME_LEN {
        // 按字符边界截断
        name = name.chars().take(MAX_FILENAME_LEN).collect();
    }
    name
}

/// 生成一个8位十六进制短ID，用于文件名去重
pub fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// 在文件名主干后追加后缀，保留扩展名
///
/// `with_suffix("page.html", "1")` 返回 `page-1.html`
pub fn with_suffix(filename: &str, suffix: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, suffix, ext),
        _ => format!("{}-{}", filename, suffix),
    }
}
