// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 数据提取模块
///
/// 通过CSS、XPath或正则选择器从页面内容中提取结构化数据
pub mod profiles;

use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::warn;

/// 选择器类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    /// CSS选择器
    #[default]
    Css,
    /// XPath表达式，由浏览器引擎求值
    Xpath,
    /// 正则表达式
    Regex,
}

/// 提取规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRule {
    /// 选择器表达式
    pub selector: String,
    /// 选择器类型
    #[serde(default)]
    pub kind: SelectorKind,
    /// 要提取的属性，None表示提取文本内容
    #[serde(default)]
    pub attr: Option<String>,
    /// 是否提取全部匹配项
    #[serde(default)]
    pub is_array: bool,
}

impl ExtractionRule {
    /// 创建CSS文本提取规则
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            kind: SelectorKind::Css,
            attr: None,
            is_array: false,
        }
    }

    /// 创建正则提取规则
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            selector: pattern.into(),
            kind: SelectorKind::Regex,
            attr: None,
            is_array: false,
        }
    }

    /// 设置属性提取
    pub fn with_attr(mut self, attr: impl Into<String>) -> Self {
        self.attr = Some(attr.into());
        self
    }

    /// 设置为数组提取
    pub fn as_array(mut self) -> Self {
        self.is_array = true;
        self
    }
}

/// 提取服务
///
/// 负责从 HTML 内容中提取结构化数据。
/// XPath规则需要活动的浏览器页面，这里统一产出Null并告警，
/// 由会话层转交浏览器引擎处理。
pub struct Extractor;

impl Extractor {
    /// 提取数据
    ///
    /// # 参数
    ///
    /// * `html_content` - 页面HTML
    /// * `rules` - 规则名到提取规则的映射
    ///
    /// # 返回值
    ///
    /// 规则名到提取值的JSON对象，未命中的规则为Null
    pub fn extract(html_content: &str, rules: &HashMap<String, ExtractionRule>) -> Value {
        let mut result = HashMap::new();
        let document = Html::parse_document(html_content);

        for (key, rule) in rules {
            let value = match rule.kind {
                SelectorKind::Css => Self::extract_css(&document, rule),
                SelectorKind::Regex => Self::extract_regex(html_content, rule),
                SelectorKind::Xpath => {
                    warn!(
                        "rule '{}' uses an XPath selector, which requires the browser engine",
                        key
                    );
                    Value::Null
                }
            };
            result.insert(key.clone(), value);
        }

        json!(result)
    }

    /// 按名称返回规则集中所有的XPath规则
    pub fn xpath_rules(
        rules: &HashMap<String, ExtractionRule>,
    ) -> Vec<(&String, &ExtractionRule)> {
        rules
            .iter()
            .filter(|(_, rule)| rule.kind == SelectorKind::Xpath)
            .collect()
    }

    fn extract_css(document: &Html, rule: &ExtractionRule) -> Value {
        let selector = match Selector::parse(&rule.selector) {
            Ok(s) => s,
            Err(_) => {
                warn!("invalid css selector '{}'", rule.selector);
                return Value::Null;
            }
        };

        if rule.is_array {
            let mut values = Vec::new();
            for element in document.select(&selector) {
                if let Some(v) = Self::element_value(&element, rule) {
                    if !v.is_empty() {
                        values.push(Value::String(v));
                    }
                }
            }
            Value::Array(values)
        } else if let Some(element) = document.select(&selector).next() {
            match Self::element_value(&element, rule) {
                Some(v) => Value::String(v),
                None => Value::Null,
            }
        } else {
            Value::Null
        }
    }

    fn element_value(element: &scraper::ElementRef<'_>, rule: &ExtractionRule) -> Option<String> {
        if let Some(attr) = &rule.attr {
            element.value().attr(attr).map(|s| s.to_string())
        } else {
            Some(
                element
                    .text()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .trim()
                    .to_string(),
            )
        }
    }

    fn extract_regex(content: &str, rule: &ExtractionRule) -> Value {
        let re = match Regex::new(&rule.selector) {
            Ok(re) => re,
            Err(e) => {
                warn!("invalid regex '{}': {}", rule.selector, e);
                return Value::Null;
            }
        };

        // 带捕获组的模式取第一个捕获组，否则取整体匹配
        let capture_value = |caps: &regex::Captures<'_>| -> String {
            caps.get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        };

        if rule.is_array {
            let values: Vec<Value> = re
                .captures_iter(content)
                .map(|caps| Value::String(capture_value(&caps)))
                .filter(|v| v.as_str().is_some_and(|s| !s.is_empty()))
                .collect();
            Value::Array(values)
        } else {
            match re.captures(content) {
                Some(caps) => Value::String(capture_value(&caps)),
                None => Value::Null,
            }
        }
    }
}
