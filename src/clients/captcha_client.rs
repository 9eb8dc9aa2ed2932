//! 验证码求解服务客户端（anti-captcha 协议）
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::CaptchaSettings;
use crate::error::AppResult;
use crate::models::captcha::IMAGE_ANSWER_LENGTH;
use crate::models::SolveOutcome;

const SOFT_ID: u32 = 1201;

/// 验证码求解能力
///
/// 求解失败不是错误：以 `SolveOutcome::unsolved` 返回服务给出的原因
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve_image(&self, image_body: &str) -> AppResult<SolveOutcome>;
    async fn solve_turnstile(&self) -> AppResult<SolveOutcome>;
    /// 报告错误答案（尽力而为）
    async fn report_bad(&self, task_id: u64) -> AppResult<()>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskResponse {
    #[serde(default)]
    error_id: i64,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    task_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskResultResponse {
    #[serde(default)]
    error_id: i64,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    solution: Option<Solution>,
}

#[derive(Debug, Deserialize)]
struct Solution {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// anti-captcha 客户端
pub struct AntiCaptchaClient {
    client: reqwest::Client,
    settings: CaptchaSettings,
}

impl AntiCaptchaClient {
    pub fn new(settings: CaptchaSettings) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, settings })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.settings.api_base_url.trim_end_matches('/'), method)
    }

    async fn create_task(&self, task: Value) -> SolveOutcome {
        let body = json!({
            "clientKey": self.settings.api_key,
            "softId": SOFT_ID,
            "task": task,
        });

        let response = match self.client.post(self.url("createTask")).json(&body).send().await {
            Ok(response) => response,
            Err(e) => return SolveOutcome::unsolved(format!("HTTP error occurred: {}", e), None),
        };
        let created: CreateTaskResponse = match response.json().await {
            Ok(created) => created,
            Err(e) => {
                return SolveOutcome::unsolved(format!("An unexpected error occurred: {}", e), None)
            }
        };

        match (created.error_id, created.task_id) {
            (0, Some(task_id)) => self.wait_for_result(task_id).await,
            _ => SolveOutcome::unsolved(
                created
                    .error_description
                    .unwrap_or_else(|| "createTask failed".to_string()),
                None,
            ),
        }
    }

    /// 轮询求解结果，直到 ready 或次数耗尽
    async fn wait_for_result(&self, task_id: u64) -> SolveOutcome {
        let body = json!({
            "clientKey": self.settings.api_key,
            "taskId": task_id,
        });

        for poll in 1..=self.settings.max_poll_attempts {
            let response = match self
                .client
                .post(self.url("getTaskResult"))
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    return SolveOutcome::unsolved(format!("HTTP error occurred: {}", e), Some(task_id))
                }
            };
            let result: TaskResultResponse = match response.json().await {
                Ok(result) => result,
                Err(e) => {
                    return SolveOutcome::unsolved(
                        format!("An unexpected error occurred: {}", e),
                        Some(task_id),
                    )
                }
            };

            if result.error_id != 0 {
                return SolveOutcome::unsolved(
                    result.error_description.unwrap_or_default(),
                    Some(task_id),
                );
            }

            if result.status.as_deref() == Some("ready") {
                let answer = result
                    .solution
                    .and_then(|s| s.token.or(s.text))
                    .unwrap_or_default();
                return SolveOutcome::solved(answer, Some(task_id));
            }

            debug!("⏳ 验证码任务 {} 尚未完成 ({}/{})", task_id, poll, self.settings.max_poll_attempts);
            tokio::time::sleep(self.settings.poll_interval).await;
        }

        SolveOutcome::unsolved("Max time for solving exhausted", Some(task_id))
    }
}

#[async_trait]
impl CaptchaSolver for AntiCaptchaClient {
    async fn solve_image(&self, image_body: &str) -> AppResult<SolveOutcome> {
        let task = json!({
            "type": "ImageToTextTask",
            "body": image_body,
            "phrase": false,
            "case": true,
            "numeric": 0,
            "math": false,
            "minLength": IMAGE_ANSWER_LENGTH,
            "maxLength": IMAGE_ANSWER_LENGTH,
            "comment": "Pay special attention to the letters and signs.",
        });
        Ok(self.create_task(task).await)
    }

    async fn solve_turnstile(&self) -> AppResult<SolveOutcome> {
        let task = json!({
            "type": "TurnstileTaskProxyless",
            "websiteURL": self.settings.turnstile_site_url,
            "websiteKey": self.settings.turnstile_site_key,
        });
        Ok(self.create_task(task).await)
    }

    async fn report_bad(&self, task_id: u64) -> AppResult<()> {
        let body = json!({
            "clientKey": self.settings.api_key,
            "taskId": task_id,
        });
        if let Err(e) = self
            .client
            .post(self.url("reportIncorrectImageCaptcha"))
            .json(&body)
            .send()
            .await
        {
            warn!("⚠️ 报告错误验证码失败 (task {}): {}", task_id, e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_result_prefers_token() {
        let json = r#"{"errorId":0,"status":"ready","solution":{"token":"tok","text":"abc"}}"#;
        let result: TaskResultResponse = serde_json::from_str(json).unwrap();
        let answer = result.solution.and_then(|s| s.token.or(s.text));
        assert_eq!(answer.as_deref(), Some("tok"));
    }

    #[test]
    fn test_create_task_error_shape() {
        let json = r#"{"errorId":1,"errorCode":"ERROR_KEY_DOES_NOT_EXIST","errorDescription":"Account authorization key not found"}"#;
        let created: CreateTaskResponse = serde_json::from_str(json).unwrap();
        assert_eq!(created.error_id, 1);
        assert!(created.task_id.is_none());
    }

    #[tokio::test]
    #[ignore] // 需要有效的 ANTICAPTCHA_API_KEY
    async fn test_live_turnstile() {
        let settings = crate::config::Config::from_env().captcha;
        let client = AntiCaptchaClient::new(settings).unwrap();
        let outcome = client.solve_turnstile().await.unwrap();
        assert!(outcome.solved, "{}", outcome.answer);
    }
}
