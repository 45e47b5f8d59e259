// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::Deserialize;
use std::collections::HashMap;
use validator::Validate;

use crate::engines::traits::PageAction;
use crate::extract::profiles::SiteProfile;
use crate::extract::ExtractionRule;

/// 抓取计划
///
/// CLI的输入：要抓取的任务列表，外加可选的站点提取配置
#[derive(Debug, Deserialize, Validate)]
pub struct ScrapePlan {
    /// 抓取任务
    #[validate(nested)]
    pub jobs: Vec<ScrapeJob>,
    /// 站点提取配置
    #[serde(default)]
    pub profiles: Vec<SiteProfile>,
}

/// 单个抓取任务
#[derive(Debug, Deserialize, Validate)]
pub struct ScrapeJob {
    /// 目标URL
    #[validate(url(message = "job url must be absolute"))]
    pub url: String,
    /// 输出文件名主干，缺省时从URL推导
    #[serde(default)]
    pub name: Option<String>,
    /// 是否需要JavaScript渲染
    #[serde(default)]
    pub needs_js: bool,
    /// 页面交互动作
    #[serde(default)]
    pub actions: Vec<PageAction>,
    /// 提取规则；非空时结果保存为同名JSON文件
    #[serde(default)]
    pub rules: HashMap<String, ExtractionRule>,
    /// 是否保存HTML
    #[serde(default = "default_save_html")]
    pub save_html: bool,
}

fn default_save_html() -> bool {
    true
}

impl ScrapePlan {
    /// 从YAML文本加载并校验抓取计划
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let plan: ScrapePlan = serde_yaml::from_str(yaml)?;
        plan.validate()?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_from_yaml() {
        let yaml = r#"
jobs:
  - url: https://example.com/articles
    name: articles
    rules:
      title:
        selector: "h1"
      links:
        selector: "a"
        attr: href
        is_array: true
  - url: https://example.com/app
    needs_js: true
    actions:
      - type: wait
        milliseconds: 500
      - type: click
        selector: "button.load-more"
profiles:
  - domain: example.com
    rules:
      author:
        selector: "span.author"
"#;
        let plan = ScrapePlan::from_yaml(yaml).unwrap();
        assert_eq!(plan.jobs.len(), 2);
        assert_eq!(plan.jobs[0].name.as_deref(), Some("articles"));
        assert!(plan.jobs[0].save_html);
        assert_eq!(plan.jobs[0].rules.len(), 2);
        assert!(plan.jobs[1].needs_js);
        assert_eq!(plan.jobs[1].actions.len(), 2);
        assert_eq!(plan.profiles.len(), 1);
    }

    #[test]
    fn test_plan_rejects_relative_url() {
        let yaml = r#"
jobs:
  - url: /relative/path
"#;
        assert!(ScrapePlan::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_plan_rejects_garbage() {
        assert!(ScrapePlan::from_yaml("jobs: 12").is_err());
    }
}
