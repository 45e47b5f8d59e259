// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::extract::ExtractionRule;

/// 站点提取配置
///
/// 不同站点的HTML结构差异由按域名配置的规则集处理，
/// 而不是在代码里猜测页面类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteProfile {
    /// 域名（按后缀匹配，`example.com`也命中`www.example.com`）
    pub domain: String,
    /// 规则名到提取规则的映射
    pub rules: HashMap<String, ExtractionRule>,
}

/// 站点配置注册表
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteProfileRegistry {
    /// 全部站点配置
    #[serde(default)]
    pub profiles: Vec<SiteProfile>,
}

impl SiteProfileRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 从YAML文本加载注册表
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// 注册站点配置
    pub fn register(&mut self, profile: SiteProfile) {
        self.profiles.push(profile);
    }

    /// 查找适用于指定主机的配置
    ///
    /// 按域名后缀匹配，多个命中时取域名最长（最具体）的那个
    pub fn lookup(&self, host: &str) -> Option<&SiteProfile> {
        self.profiles
            .iter()
            .filter(|p| host == p.domain || host.ends_with(&format!(".{}", p.domain)))
            .max_by_key(|p| p.domain.len())
    }
}
