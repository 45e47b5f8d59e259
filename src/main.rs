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

use std::collections::HashMap;

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use scraprs::config::plan::{ScrapeJob, ScrapePlan};
use scraprs::config::settings::Settings;
use scraprs::extract::profiles::SiteProfileRegistry;
use scraprs::session::{NavigateOptions, Scraper, SessionError};
use scraprs::utils::{filename, telemetry, url_utils};

/// 计划内并发执行的会话数
const MAX_CONCURRENT_SITES: usize = 4;

/// 单个任务的执行结果
enum JobOutcome {
    Ok,
    Disallowed,
    Failed,
}

/// 主函数
///
/// 读取抓取计划并逐站点执行：抓取页面、保存HTML、
/// 应用提取规则并把结果写到输出目录
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    info!("Starting scraprs...");

    // 2. Load configuration
    let settings = Settings::new()?;
    info!("Configuration loaded");

    if let Some(url) = &settings.browser.remote_debugging_url {
        std::env::set_var("CHROMIUM_REMOTE_DEBUGGING_URL", url);
    }

    // 3. Load the scrape plan
    let plan_path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: scraprs <plan.yaml>"))?;
    let plan_text = tokio::fs::read_to_string(&plan_path).await?;
    let plan = ScrapePlan::from_yaml(&plan_text)?;
    info!("Loaded scrape plan with {} jobs from {}", plan.jobs.len(), plan_path);

    let profiles = SiteProfileRegistry {
        profiles: plan.profiles.clone(),
    };

    // 4. Group jobs by host so each site runs in one polite session
    let mut by_host: HashMap<String, Vec<ScrapeJob>> = HashMap::new();
    for job in plan.jobs {
        match url_utils::host_of(&job.url) {
            Some(host) => by_host.entry(host).or_default().push(job),
            None => warn!("skipping job with unusable url '{}'", job.url),
        }
    }

    // 5. Run sites concurrently, jobs within a site sequentially
    let outcomes: Vec<JobOutcome> = stream::iter(by_host.into_iter())
        .map(|(host, jobs)| {
            let settings = &settings;
            let profiles = profiles.clone();
            async move { run_site(settings, profiles, host, jobs).await }
        })
        .buffer_unordered(MAX_CONCURRENT_SITES)
        .collect::<Vec<Vec<JobOutcome>>>()
        .await
        .into_iter()
        .flatten()
        .collect();

    // 6. Summarize
    let ok = outcomes.iter().filter(|o| matches!(o, JobOutcome::Ok)).count();
    let disallowed = outcomes
        .iter()
        .filter(|o| matches!(o, JobOutcome::Disallowed))
        .count();
    let failed = outcomes
        .iter()
        .filter(|o| matches!(o, JobOutcome::Failed))
        .count();
    info!(
        "Scrape plan finished: {} ok, {} disallowed, {} failed",
        ok, disallowed, failed
    );

    if ok == 0 && (disallowed + failed) > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// 对单个站点执行其全部任务
async fn run_site(
    settings: &Settings,
    profiles: SiteProfileRegistry,
    host: String,
    jobs: Vec<ScrapeJob>,
) -> Vec<JobOutcome> {
    // Reduce the first job url to scheme://host for the session domain
    let domain = match url::Url::parse(&jobs[0].url) {
        Ok(parsed) => format!("{}://{}", parsed.scheme(), host),
        Err(_) => return jobs.iter().map(|_| JobOutcome::Failed).collect(),
    };

    let config = settings.scraper_config(&domain);
    let mut scraper = match Scraper::start(config).await {
        Ok(s) => s,
        Err(e) => {
            error!("cannot start session for {}: {}", host, e);
            return jobs.iter().map(|_| JobOutcome::Failed).collect();
        }
    };
    scraper.set_profiles(profiles);

    let mut outcomes = Vec::with_capacity(jobs.len());
    for job in &jobs {
        outcomes.push(run_job(&mut scraper, job).await);
    }

    if let Err(e) = scraper.exit().await {
        warn!("session for {} did not close cleanly: {}", host, e);
    }
    outcomes
}

/// 执行单个任务：导航、保存HTML、提取数据
async fn run_job(scraper: &mut Scraper, job: &ScrapeJob) -> JobOutcome {
    let options = NavigateOptions {
        needs_js: job.needs_js,
        actions: job.actions.clone(),
    };

    match scraper.navigate_to_with(&job.url, options).await {
        Ok(page) => {
            info!("fetched {} ({})", page.final_url, page.status_code);
        }
        Err(SessionError::Engine(scraprs::EngineError::Disallowed(url))) => {
            warn!("skipped disallowed url {}", url);
            return JobOutcome::Disallowed;
        }
        Err(e) => {
            error!("failed to fetch {}: {}", job.url, e);
            return JobOutcome::Failed;
        }
    }

    let stem = job
        .name
        .clone()
        .unwrap_or_else(|| filename::sanitize_filename(&job.url));

    if job.save_html {
        if let Err(e) = scraper.save_page(&format!("{}.html", stem)).await {
            error!("failed to save page for {}: {}", job.url, e);
            return JobOutcome::Failed;
        }
    }

    if !job.rules.is_empty() {
        match scraper.extract(&job.rules).await {
            Ok(value) => {
                let json = serde_json::to_string_pretty(&value).unwrap_or_default();
                let key = format!("{}.json", stem);
                if let Err(e) = write_extracted(scraper, &key, json.as_bytes()).await {
                    error!("failed to save extraction for {}: {}", job.url, e);
                    return JobOutcome::Failed;
                }
            }
            Err(e) => {
                error!("extraction failed for {}: {}", job.url, e);
                return JobOutcome::Failed;
            }
        }
    }

    JobOutcome::Ok
}

/// 把提取结果写到会话输出目录
async fn write_extracted(
    scraper: &Scraper,
    name: &str,
    data: &[u8],
) -> Result<(), std::io::Error> {
    let dir = scraper.output_dir();
    tokio::fs::create_dir_all(&dir).await?;
    tokio::fs::write(dir.join(name), data).await
}
