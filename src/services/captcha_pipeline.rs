//! 验证码流水线 - 业务能力层
//!
//! 负责在独立的小预算内拿到一个可用的验证码答案：
//! - 图片验证码：取 puzzle → 取图片 → 求解 → 校验 6 位答案
//! - Turnstile：直接向求解服务要 token
//!
//! 代理级错误（403、限流）不在这里重试，原样抛给 OperationRunner

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::clients::{CaptchaSolver, RewardsApi};
use crate::config::CaptchaSettings;
use crate::error::{AppResult, CaptchaError};
use crate::models::CaptchaChallenge;

/// 验证码流水线
pub struct CaptchaPipeline {
    solver: Arc<dyn CaptchaSolver>,
    max_attempts: usize,
    retry_delay: Duration,
}

impl CaptchaPipeline {
    pub fn new(solver: Arc<dyn CaptchaSolver>, settings: &CaptchaSettings) -> Self {
        Self {
            solver,
            max_attempts: settings.max_attempts.max(1),
            retry_delay: settings.retry_delay,
        }
    }

    /// 求解图片验证码
    pub async fn solve_image(
        &self,
        api: &dyn RewardsApi,
        app_id: &str,
        account: &str,
    ) -> AppResult<CaptchaChallenge> {
        for attempt in 1..=self.max_attempts {
            match self.try_image(api, app_id).await {
                Ok(challenge) => {
                    info!("[账号 {}] 🧩 验证码已解出 ({})", account, challenge.kind());
                    return Ok(challenge);
                }
                Err(e) if e.is_proxy_level() => return Err(e),
                Err(e) => {
                    warn!(
                        "[账号 {}] ⚠️ 图片验证码求解失败 ({}/{}): {}",
                        account, attempt, self.max_attempts, e
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(CaptchaError::SolvingFailed {
            attempts: self.max_attempts,
        }
        .into())
    }

    /// 求解 Turnstile 验证
    pub async fn solve_turnstile(&self, account: &str) -> AppResult<CaptchaChallenge> {
        for attempt in 1..=self.max_attempts {
            match self.try_turnstile().await {
                Ok(challenge) => {
                    info!("[账号 {}] 🧩 验证码已解出 ({})", account, challenge.kind());
                    return Ok(challenge);
                }
                Err(e) if e.is_proxy_level() => return Err(e),
                Err(e) => {
                    warn!(
                        "[账号 {}] ⚠️ Turnstile 求解失败 ({}/{}): {}",
                        account, attempt, self.max_attempts, e
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(CaptchaError::SolvingFailed {
            attempts: self.max_attempts,
        }
        .into())
    }

    /// 平台拒绝了答案时报告给求解服务（尽力而为）
    pub async fn report_rejected(&self, challenge: &CaptchaChallenge) {
        if let CaptchaChallenge::Image {
            task_id: Some(task_id),
            ..
        } = challenge
        {
            if let Err(e) = self.solver.report_bad(*task_id).await {
                warn!("⚠️ 报告错误验证码失败: {}", e);
            }
        }
    }

    async fn try_image(&self, api: &dyn RewardsApi, app_id: &str) -> AppResult<CaptchaChallenge> {
        let puzzle_id = api.get_puzzle(app_id).await?;
        let image_body = api.get_puzzle_image(&puzzle_id, app_id).await?;

        let outcome = self.solver.solve_image(&image_body).await?;
        if outcome.is_valid_image_answer() {
            return Ok(CaptchaChallenge::Image {
                puzzle_id,
                image_body,
                answer: outcome.answer,
                task_id: outcome.task_id,
            });
        }

        if let Some(task_id) = outcome.task_id {
            if let Err(e) = self.solver.report_bad(task_id).await {
                warn!("⚠️ 报告错误验证码失败: {}", e);
            }
        }

        let reason = if outcome.solved {
            format!("答案长度不正确: {}", outcome.answer)
        } else {
            outcome.answer
        };
        Err(CaptchaError::Unsolved(reason).into())
    }

    async fn try_turnstile(&self) -> AppResult<CaptchaChallenge> {
        let outcome = self.solver.solve_turnstile().await?;
        if outcome.solved && !outcome.answer.is_empty() {
            Ok(CaptchaChallenge::Turnstile {
                token: outcome.answer,
            })
        } else {
            Err(CaptchaError::Unsolved(outcome.answer).into())
        }
    }
}
