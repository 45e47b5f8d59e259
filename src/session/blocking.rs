// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashMap;
use serde_json::Value;

use crate::extract::ExtractionRule;
use crate::session::{
    self, NavigateOptions, Page, SavedPage, ScraperConfig, ScreenshotOptions, SessionError,
};

/// 同步抓取会话
///
/// 与异步[`session::Scraper`]共享同一套核心实现，内部持有
/// 专用的tokio运行时并逐调用委托。适合没有异步上下文的
/// 脚本与命令行工具。
///
/// 不能在异步运行时内部构造，否则会panic。
pub struct Scraper {
    inner: session::Scraper,
    rt: tokio::runtime::Runtime,
}

impl Scraper {
    /// 启动同步抓取会话
    ///
    /// # 参数
    ///
    /// * `config` - 会话配置
    ///
    /// # Panics
    ///
    /// 在tokio运行时内部调用时panic，异步环境应使用
    /// [`session::Scraper`]
    pub fn start(config: ScraperConfig) -> Result<Self, SessionError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            panic!(
                "blocking::Scraper must not be constructed inside a tokio runtime; \
                 use the async session::Scraper instead"
            );
        }

        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| SessionError::InvalidConfig(format!("runtime build failed: {}", e)))?;

        let inner = rt.block_on(session::Scraper::start(config))?;
        Ok(Self { inner, rt })
    }

    /// 导航到指定URL
    pub fn navigate_to(&mut self, url: &str) -> Result<&Page, SessionError> {
        self.rt.block_on(self.inner.navigate_to(url))
    }

    /// 以指定选项导航
    pub fn navigate_to_with(
        &mut self,
        url: &str,
        options: NavigateOptions,
    ) -> Result<&Page, SessionError> {
        self.rt.block_on(self.inner.navigate_to_with(url, options))
    }

    /// 当前页面
    pub fn page(&self) -> Option<&Page> {
        self.inner.page()
    }

    /// 保存当前页面的HTML到输出目录
    pub fn save_page(&mut self, filename: &str) -> Result<SavedPage, SessionError> {
        self.rt.block_on(self.inner.save_page(filename))
    }

    /// 截取当前页面的截图并保存
    pub fn screenshot(
        &mut self,
        filename: &str,
        options: ScreenshotOptions,
    ) -> Result<SavedPage, SessionError> {
        self.rt.block_on(self.inner.screenshot(filename, options))
    }

    /// 点击当前页面上的元素
    pub fn click(&mut self, selector: &str) -> Result<&Page, SessionError> {
        self.rt.block_on(self.inner.click(selector))
    }

    /// 在当前页面上执行JavaScript并返回结果
    pub fn evaluate_js(&mut self, script: &str) -> Result<Value, SessionError> {
        self.rt.block_on(self.inner.evaluate_js(script))
    }

    /// 对当前页面应用提取规则
    pub fn extract(
        &mut self,
        rules: &HashMap<String, ExtractionRule>,
    ) -> Result<Value, SessionError> {
        self.rt.block_on(self.inner.extract(rules))
    }

    /// 关闭会话，幂等
    pub fn exit(&mut self) -> Result<(), SessionError> {
        self.rt.block_on(self.inner.exit())
    }
}
