// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// 引擎错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    /// 请求失败
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// 浏览器操作失败
    #[error("Browser error: {0}")]
    Browser(String),
    /// robots.txt禁止访问
    #[error("Fetch disallowed by robots.txt: {0}")]
    Disallowed(String),
    /// 输入无效
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// 所有引擎都失败
    #[error("All engines failed")]
    AllEnginesFailed,
    /// 超时
    #[error("Timeout")]
    Timeout,
    /// 其他错误
    #[error("Other error: {0}")]
    Other(String),
}

impl EngineError {
    /// 判断错误是否可重试
    ///
    /// # 返回值
    ///
    /// 如果错误是可重试的则返回true，否则返回false
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::RequestFailed(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
            }
            EngineError::Timeout => true,
            // 浏览器故障通常是瞬时的，允许换引擎或重试
            EngineError::Browser(_) => true,
            EngineError::Disallowed(_) => false,
            EngineError::InvalidInput(_) => false,
            EngineError::Other(_) => false,
            _ => false,
        }
    }
}

/// 页面交互动作
///
/// 浏览器引擎在页面加载完成后按顺序执行
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageAction {
    /// 等待指定毫秒数
    Wait { milliseconds: u64 },
    /// 点击元素
    Click { selector: String },
    /// 将光标悬停在元素上
    Hover { selector: String },
    /// 滚动页面 (up, down, top, bottom)
    Scroll { direction: String },
    /// 向元素输入文本
    Type { selector: String, text: String },
    /// 执行JavaScript
    Evaluate { script: String },
}

/// 截图配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotConfig {
    /// 是否全屏
    pub full_page: bool,
    /// 元素选择器
    pub selector: Option<String>,
    /// 质量 (1-100)
    pub quality: Option<u8>,
    /// 格式 (png, jpeg)
    pub format: Option<String>,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            full_page: true,
            selector: None,
            quality: None,
            format: Some("jpeg".to_string()),
        }
    }
}

/// 抓取请求
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// 目标URL
    pub url: String,
    /// 请求头
    pub headers: HashMap<String, String>,
    /// User-Agent，None时由引擎选择默认值
    pub user_agent: Option<String>,
    /// 超时时间
    pub timeout: Duration,
    /// 是否需要JavaScript支持
    pub needs_js: bool,
    /// 是否需要截图
    pub needs_screenshot: bool,
    /// 截图配置
    pub screenshot_config: Option<ScreenshotConfig>,
    /// 页面交互动作
    pub actions: Vec<PageAction>,
    /// 是否移动端
    pub mobile: bool,
    /// 代理配置 (URL)
    pub proxy: Option<String>,
    /// 是否跳过TLS验证
    pub skip_tls_verification: bool,
}

impl FetchRequest {
    /// 创建仅含URL的请求，其余字段取默认值
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            user_agent: None,
            timeout: Duration::from_secs(30),
            needs_js: false,
            needs_screenshot: false,
            screenshot_config: None,
            actions: Vec::new(),
            mobile: false,
            proxy: None,
            skip_tls_verification: false,
        }
    }

    /// 请求是否必须由浏览器引擎处理
    pub fn needs_browser(&self) -> bool {
        self.needs_js || self.needs_screenshot || !self.actions.is_empty()
    }
}

/// 抓取响应
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP状态码
    pub status_code: u16,
    /// 重定向后的最终URL
    pub final_url: String,
    /// 响应内容（已解码为UTF-8）
    pub content: String,
    /// 截图数据
    pub screenshot: Option<Vec<u8>>,
    /// 内容类型
    pub content_type: String,
    /// 响应头
    pub headers: HashMap<String, String>,
    /// 响应时间（毫秒）
    pub response_time_ms: u64,
}

impl FetchResponse {
    /// 创建测试用的最小响应
    pub fn new(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            status_code: 200,
            final_url: url.into(),
            content: content.into(),
            screenshot: None,
            content_type: "text/html".to_string(),
            headers: HashMap::new(),
            response_time_ms: 0,
        }
    }
}

/// 抓取引擎特质
#[async_trait]
pub trait ScraperEngine: Send + Sync {
    /// 执行抓取
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, EngineError>;

    /// 计算对请求的支持分数（0-100）
    fn support_score(&self, request: &FetchRequest) -> u8;

    /// 引擎名称
    fn name(&self) -> &'static str;
}
