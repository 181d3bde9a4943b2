//! healthchecks 风格的运行健康上报。
//!
//! 纯尽力而为：上报失败只记 debug 日志，绝不把自身错误传染给复投
//! 流程。日志行先缓冲，在 success/failed 时作为请求体一次带上。

use reqwest::Client;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::config::HealthConfig;

pub struct HealthReporter {
    endpoint: Option<Url>,
    client: Client,
    tag: String,
    lines: Mutex<Vec<String>>,
}

impl HealthReporter {
    pub fn new(tag: &str, config: Option<&HealthConfig>) -> Self {
        let endpoint = config.and_then(|cfg| {
            let raw = format!("{}/{}", cfg.address.trim_end_matches('/'), cfg.uuid);
            match Url::parse(&raw) {
                Ok(url) => Some(url),
                Err(err) => {
                    debug!(target: "health", tag, %err, "健康上报地址无效，禁用上报");
                    None
                }
            }
        });

        Self {
            endpoint,
            client: Client::new(),
            tag: tag.to_string(),
            lines: Mutex::new(Vec::new()),
        }
    }

    pub async fn started(&self) {
        self.ping("/start", String::new()).await;
    }

    pub async fn log(&self, line: impl Into<String>) {
        self.lines.lock().await.push(line.into());
    }

    pub async fn success(&self, summary: impl Into<String>) {
        let body = self.drain_with(summary.into()).await;
        self.ping("", body).await;
    }

    pub async fn failed(&self, summary: impl Into<String>) {
        let body = self.drain_with(summary.into()).await;
        self.ping("/fail", body).await;
    }

    async fn drain_with(&self, summary: String) -> String {
        let mut lines = self.lines.lock().await;
        lines.push(summary);
        let body = lines.join("\n");
        lines.clear();
        body
    }

    async fn ping(&self, suffix: &str, body: String) {
        let Some(endpoint) = &self.endpoint else {
            return;
        };
        let url = format!("{endpoint}{suffix}");
        let result = self.client.post(&url).body(body).send().await;
        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                debug!(target: "health", tag = %self.tag, status = %response.status(), "健康上报被拒")
            }
            Err(err) => {
                debug!(target: "health", tag = %self.tag, %err, "健康上报失败")
            }
        }
    }
}
