//! 操作执行流程 - 流程层
//!
//! 核心职责：在尝试预算内为一个账号执行一个操作，产出唯一的终态结果
//!
//! 每次尝试的顺序：
//! 1. 读取账号记录（跳过已登录 / 会话检查 / farm 休眠闸门）
//! 2. 解析代理（复用已持久化的，否则新分配）
//! 3. 解析 app id（复用已持久化的，否则远程获取）
//! 4. 执行操作本身的远程调用序列
//! 5. 失败时交给 ErrorClassifier，按策略重试、换代理或终止
//!
//! 平台客户端只在一次尝试内存活，任何退出路径上都会随 drop 释放

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::clients::{RewardsApi, RewardsApiFactory};
use crate::config::{AttemptSettings, Config};
use crate::error::{AppError, AppResult, ConfirmationError, StoreError};
use crate::infrastructure::AccountStore;
use crate::models::{
    AccountCredentials, AccountPatch, AccountRecord, CaptchaChallenge, FarmReport, Operation,
    OperationOutcome, OperationReport, OperationResult, QuarantineReason, StatsResult,
};
use crate::services::{
    describe_error, extract_key, CaptchaPipeline, ConfirmationFailure, ConfirmationResult,
    ConfirmationRetriever, ErrorClassifier, ProxyAssigner, ResultExporter, RetryAction,
};
use crate::workflow::operation_ctx::OperationContext;

/// 一次尝试的结束方式
#[derive(Debug)]
enum AttemptEnd {
    /// 得到终态结果
    Done(OperationOutcome),
    /// 账号需要隔离
    Quarantine(QuarantineReason),
}

/// 跨尝试保留的状态
#[derive(Debug, Default)]
struct RunState {
    /// 本次尝试最近一次使用的验证码（平台拒绝时报告）
    last_challenge: Option<CaptchaChallenge>,
    /// 重新发送验证链接的时间；存在即表示本次操作已发送过
    verify_requested_at: Option<DateTime<Utc>>,
    /// 已取到的确认 key（链接已被占用，后续尝试直接复用）
    confirmation_key: Option<String>,
}

/// 操作执行器
///
/// - 编排单个账号的单个操作
/// - 持有所有业务能力（services）与外部协作者
/// - 除配置错误外，不向上抛出任何错误
pub struct OperationRunner {
    store: Arc<dyn AccountStore>,
    factory: Arc<dyn RewardsApiFactory>,
    captcha: CaptchaPipeline,
    confirmation: ConfirmationRetriever,
    proxies: ProxyAssigner,
    classifier: ErrorClassifier,
    exporter: Arc<dyn ResultExporter>,
    attempts: AttemptSettings,
    skip_logged_accounts: bool,
    keepalive_interval: Duration,
    confirmation_timeout: Duration,
    validate_mailbox: bool,
}

impl OperationRunner {
    pub fn new(
        config: &Config,
        store: Arc<dyn AccountStore>,
        factory: Arc<dyn RewardsApiFactory>,
        captcha: CaptchaPipeline,
        confirmation: ConfirmationRetriever,
        exporter: Arc<dyn ResultExporter>,
    ) -> Self {
        Self {
            store,
            factory,
            captcha,
            confirmation,
            proxies: ProxyAssigner::from_config(config),
            classifier: ErrorClassifier::new(),
            exporter,
            attempts: config.attempts.clone(),
            skip_logged_accounts: config.skip_logged_accounts,
            keepalive_interval: Duration::from_secs(config.keepalive_interval_secs),
            confirmation_timeout: config.mailbox.confirmation_timeout,
            validate_mailbox: config.mailbox.validate_before_use,
        }
    }

    /// 账号存储（编排层清理代理时使用）
    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    /// 操作的尝试预算
    pub fn budget(&self, operation: Operation) -> usize {
        let budget = match operation {
            Operation::Registration => self.attempts.max_register_attempts,
            Operation::Verification => self.attempts.max_verify_attempts,
            Operation::Login => self.attempts.max_login_attempts,
            Operation::TaskCompletion => self.attempts.max_tasks_attempts,
            Operation::StatsExport => self.attempts.max_stats_attempts,
            Operation::Farm => self.attempts.max_keepalive_attempts,
        };
        budget.max(1)
    }

    /// 执行一次操作
    ///
    /// 只有配置错误会以 `Err` 返回，其余情况都落到 `OperationReport`
    pub async fn run(
        &self,
        operation: Operation,
        account: &AccountCredentials,
    ) -> AppResult<OperationReport> {
        let mut ctx = OperationContext::new(&account.email, operation, self.budget(operation));
        let mut state = RunState::default();

        debug!("{} 开始{}", ctx, operation.action());

        while ctx.attempt < ctx.max_attempts {
            ctx.attempt += 1;

            match self.attempt(&mut ctx, account, &mut state).await {
                Ok(AttemptEnd::Done(outcome)) => return Ok(self.finish(&ctx, account, outcome, None)),
                Ok(AttemptEnd::Quarantine(reason)) => {
                    return Ok(self.quarantine(&ctx, account, reason, true))
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    if let Some(report) = self.handle_failure(&mut ctx, account, &mut state, e).await? {
                        return Ok(report);
                    }
                }
            }
        }

        error!("{} ❌ 已达到最大尝试次数，无法{}", ctx, operation.action());
        let outcome = OperationOutcome::failure(operation, &account.email, &account.password);
        Ok(self.finish(&ctx, account, outcome, None))
    }

    // ========== 单次尝试 ==========

    async fn attempt(
        &self,
        ctx: &mut OperationContext,
        account: &AccountCredentials,
        state: &mut RunState,
    ) -> AppResult<AttemptEnd> {
        state.last_challenge = None;
        let operation = ctx.operation;
        let record = self.store.get(&account.email).await?;

        if let Some(end) = self.precheck(ctx, account, record.as_ref()) {
            return Ok(end);
        }

        // 代理
        let persisted_proxy = record
            .as_ref()
            .and_then(|r| r.active_proxy.clone())
            .or_else(|| ctx.proxy.clone());
        ctx.proxy = self.proxies.resolve(persisted_proxy.as_deref())?;
        if let Some(record) = &record {
            if ctx.proxy.is_some() && record.active_proxy != ctx.proxy {
                self.store
                    .update(&account.email, AccountPatch::default().proxy(ctx.proxy.clone()))
                    .await?;
            }
        }

        // 会话令牌只用于需要认证的操作
        let auth_token = match operation {
            Operation::Registration | Operation::Login => None,
            _ => record.as_ref().and_then(|r| r.auth_token.clone()),
        };
        let mut api = self.factory.create(ctx.proxy.as_deref(), auth_token.as_deref())?;

        // app id
        let persisted_app_id = record.as_ref().and_then(|r| r.app_id.clone());
        let app_id = match persisted_app_id {
            Some(app_id) => app_id,
            None => {
                let Some(app_id) = self
                    .resolve_app_id(ctx, auth_token.as_deref(), &mut api)
                    .await?
                else {
                    error!("{} ❌ 无法获取 app id", ctx);
                    if operation == Operation::Farm {
                        self.reschedule(ctx).await;
                    }
                    return Ok(AttemptEnd::Done(OperationOutcome::failure(
                        operation,
                        &account.email,
                        &account.password,
                    )));
                };
                self.store
                    .upsert(
                        &account.email,
                        AccountPatch::default()
                            .password(account.password.as_str())
                            .app_id(app_id.as_str())
                            .proxy(ctx.proxy.clone()),
                    )
                    .await?;
                app_id
            }
        };
        ctx.app_id = Some(app_id.clone());

        info!(
            "{} ▶️ 正在{} (尝试 {}/{})",
            ctx,
            operation.action(),
            ctx.attempt,
            ctx.max_attempts
        );

        match operation {
            Operation::Registration => self.register(ctx, account, api.as_ref(), state).await,
            Operation::Verification => {
                self.verify(ctx, account, api.as_ref(), &app_id, state).await
            }
            Operation::Login => self.login(ctx, account, api.as_ref(), &app_id, state).await,
            Operation::TaskCompletion => self.complete_tasks(ctx, account, api.as_ref(), &app_id).await,
            Operation::StatsExport => self.export_stats(ctx, api.as_ref(), &app_id).await,
            Operation::Farm => self.keepalive(ctx, account, api.as_ref(), &app_id).await,
        }
    }

    /// 远程调用之前的检查；返回 Some 表示本次操作到此结束
    fn precheck(
        &self,
        ctx: &OperationContext,
        account: &AccountCredentials,
        record: Option<&AccountRecord>,
    ) -> Option<AttemptEnd> {
        let operation = ctx.operation;
        let has_session = record.map(|r| r.auth_token.is_some()).unwrap_or(false);

        if operation.requires_session() {
            if !has_session {
                return Some(AttemptEnd::Quarantine(QuarantineReason::Unlogged));
            }
        } else if self.skip_logged_accounts && has_session {
            warn!("{} ⏭️ 已登录，跳过", ctx);
            return Some(AttemptEnd::Done(OperationOutcome::failure(
                operation,
                &account.email,
                &account.password,
            )));
        }

        if operation == Operation::Farm {
            if let Some(record) = record {
                if record.is_sleeping(Utc::now()) {
                    debug!("{} 😴 仍在休眠期，跳过本轮", ctx);
                    return Some(AttemptEnd::Done(OperationOutcome::Farm(FarmReport::Sleeping)));
                }
            }
        }

        None
    }

    /// app id 子循环
    ///
    /// 平台业务错误立即放弃；网络错误换代理后重试
    async fn resolve_app_id(
        &self,
        ctx: &mut OperationContext,
        auth_token: Option<&str>,
        api: &mut Box<dyn RewardsApi>,
    ) -> AppResult<Option<String>> {
        let max_attempts = self.attempts.max_app_id_attempts.max(1);

        for attempt in 1..=max_attempts {
            info!("{} 🔑 正在获取 app id...", ctx);
            match api.get_app_id().await {
                Ok(app_id) => {
                    info!("{} ✓ app id: {}", ctx, app_id);
                    return Ok(Some(app_id));
                }
                Err(e) if e.remote_message().is_some() => {
                    error!("{} ❌ 获取 app id 被拒绝: {}", ctx, describe_error(&e));
                    return Ok(None);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        "{} ⚠️ 获取 app id 失败 ({}/{}): {}",
                        ctx,
                        attempt,
                        max_attempts,
                        describe_error(&e)
                    );
                    if attempt < max_attempts {
                        self.rotate_proxy(ctx, true).await?;
                        *api = self.factory.create(ctx.proxy.as_deref(), auth_token)?;
                    }
                }
            }
        }

        Ok(None)
    }

    // ========== 各操作的远程调用序列 ==========

    async fn register(
        &self,
        ctx: &OperationContext,
        account: &AccountCredentials,
        api: &dyn RewardsApi,
        state: &mut RunState,
    ) -> AppResult<AttemptEnd> {
        let app_id = ctx.app_id.clone().unwrap_or_default();

        if state.confirmation_key.is_some() {
            return self.confirm(ctx, account, api, state, Utc::now()).await;
        }

        self.check_mailbox(ctx, account).await?;

        let since = Utc::now();
        let challenge = self.captcha.solve_turnstile(&account.email).await?;
        state.last_challenge = Some(challenge.clone());

        api.register(
            &account.email,
            &account.password,
            challenge.answer(),
            &app_id,
        )
        .await?;
        info!("{} 📨 注册请求已提交，等待确认邮件...", ctx);

        self.confirm(ctx, account, api, state, since).await
    }

    async fn verify(
        &self,
        ctx: &OperationContext,
        account: &AccountCredentials,
        api: &dyn RewardsApi,
        app_id: &str,
        state: &mut RunState,
    ) -> AppResult<AttemptEnd> {
        let since = match state.verify_requested_at {
            Some(since) => since,
            None => {
                self.check_mailbox(ctx, account).await?;

                let challenge = self.captcha.solve_image(api, app_id, &account.email).await?;
                state.last_challenge = Some(challenge.clone());

                let since = Utc::now();
                api.resend_verify_link(
                    &account.email,
                    challenge.puzzle_id().unwrap_or_default(),
                    challenge.answer(),
                    app_id,
                )
                .await?;
                state.verify_requested_at = Some(since);
                info!("{} 📨 已重新发送验证链接", ctx);
                since
            }
        };

        self.confirm(ctx, account, api, state, since).await
    }

    async fn check_mailbox(
        &self,
        ctx: &OperationContext,
        account: &AccountCredentials,
    ) -> AppResult<()> {
        if self.validate_mailbox {
            self.confirmation.validate(account).await?;
            debug!("{} 邮箱可以登录", ctx);
        }
        Ok(())
    }

    /// 取确认链接 → 提取 key → 提交验证
    async fn confirm(
        &self,
        ctx: &OperationContext,
        account: &AccountCredentials,
        api: &dyn RewardsApi,
        state: &mut RunState,
        since: DateTime<Utc>,
    ) -> AppResult<AttemptEnd> {
        let key = match state.confirmation_key.clone() {
            Some(key) => key,
            None => {
                let link = match self.confirmation.retrieve(account, since).await? {
                    ConfirmationResult::Found(link) => link,
                    ConfirmationResult::Failed(ConfirmationFailure::NotFound) => {
                        warn!("{} ⚠️ 没有可用的确认链接", ctx);
                        return Ok(AttemptEnd::Quarantine(QuarantineReason::Unverified));
                    }
                    ConfirmationResult::Failed(ConfirmationFailure::Timeout) => {
                        return Err(ConfirmationError::Timeout {
                            mailbox: account.email.clone(),
                            seconds: self.confirmation_timeout.as_secs(),
                        }
                        .into());
                    }
                };

                let key = self.confirmation_key(api, &link).await?;
                debug!("{} 确认 key: {}", ctx, key);
                state.confirmation_key = Some(key.clone());
                key
            }
        };

        let challenge = self.captcha.solve_turnstile(&account.email).await?;
        state.last_challenge = Some(challenge.clone());
        api.verify(&key, challenge.answer()).await?;

        info!("{} ✅ 邮箱验证成功", ctx);
        Ok(AttemptEnd::Done(OperationOutcome::Finished(
            OperationResult::success(&account.email, &account.password),
        )))
    }

    /// 从确认链接中取 key；没有 `key=` 时跟随重定向后再取
    async fn confirmation_key(&self, api: &dyn RewardsApi, link: &str) -> AppResult<String> {
        if let Some(key) = extract_key(link) {
            return Ok(key);
        }

        let final_url = api.follow_link(link).await?;
        extract_key(&final_url).ok_or_else(|| {
            ConfirmationError::KeyNotFound {
                link: link.to_string(),
            }
            .into()
        })
    }

    async fn login(
        &self,
        ctx: &OperationContext,
        account: &AccountCredentials,
        api: &dyn RewardsApi,
        app_id: &str,
        state: &mut RunState,
    ) -> AppResult<AttemptEnd> {
        let challenge = self.captcha.solve_image(api, app_id, &account.email).await?;
        state.last_challenge = Some(challenge.clone());

        let token = api
            .login(
                &account.email,
                &account.password,
                challenge.puzzle_id().unwrap_or_default(),
                challenge.answer(),
                app_id,
            )
            .await?;

        self.store
            .upsert(
                &account.email,
                AccountPatch::default()
                    .password(account.password.as_str())
                    .auth_token(token),
            )
            .await?;

        info!("{} ✅ 登录成功", ctx);
        Ok(AttemptEnd::Done(OperationOutcome::Finished(
            OperationResult::success(&account.email, &account.password),
        )))
    }

    async fn complete_tasks(
        &self,
        ctx: &OperationContext,
        account: &AccountCredentials,
        api: &dyn RewardsApi,
        app_id: &str,
    ) -> AppResult<AttemptEnd> {
        let info = api.user_info(app_id).await?;

        if info.reward_point.all_tasks_completed() {
            info!("{} ✓ 所有任务均已完成", ctx);
        } else {
            api.complete_tasks(app_id).await?;
            info!("{} ✅ 任务已完成", ctx);
        }

        Ok(AttemptEnd::Done(OperationOutcome::Finished(
            OperationResult::success(&account.email, &account.password),
        )))
    }

    async fn export_stats(
        &self,
        ctx: &OperationContext,
        api: &dyn RewardsApi,
        app_id: &str,
    ) -> AppResult<AttemptEnd> {
        let info = api.user_info(app_id).await?;
        info!(
            "{} 📊 积分: {} | 推荐: {}",
            ctx, info.reward_point.points, info.referral_point.commission
        );
        Ok(AttemptEnd::Done(OperationOutcome::Stats(StatsResult::success(info))))
    }

    async fn keepalive(
        &self,
        ctx: &OperationContext,
        account: &AccountCredentials,
        api: &dyn RewardsApi,
        app_id: &str,
    ) -> AppResult<AttemptEnd> {
        api.keepalive(&account.email, app_id).await?;
        let next = self.reschedule(ctx).await;
        info!("{} 💓 keepalive 已发送，下次: {}", ctx, next.format("%H:%M:%S"));
        Ok(AttemptEnd::Done(OperationOutcome::Farm(FarmReport::KeptAlive)))
    }

    // ========== 失败处理 ==========

    /// 按策略处理一次失败；返回 Some 表示操作结束
    async fn handle_failure(
        &self,
        ctx: &mut OperationContext,
        account: &AccountCredentials,
        state: &mut RunState,
        err: AppError,
    ) -> AppResult<Option<OperationReport>> {
        let (kind, action) = self.classifier.decide(&err, ctx.operation);
        let reason = describe_error(&err);
        debug!("{} 错误分类: {:?} -> {:?} ({})", ctx, kind, action, err);
        ctx.last_error = Some(reason.clone());

        // farm 的每一轮最多发送一次 keepalive，失败也要重新安排休眠
        if ctx.operation == Operation::Farm && action.quarantine_reason().is_none() {
            error!("{} ❌ 发送 keepalive 失败: {}", ctx, reason);
            self.reschedule(ctx).await;
            if action == RetryAction::RotateProxyAndRetry {
                self.rotate_proxy(ctx, false).await?;
            }
            return Ok(Some(self.finish(
                ctx,
                account,
                OperationOutcome::Farm(FarmReport::Failed),
                None,
            )));
        }

        match action {
            RetryAction::RetrySameContext => {
                warn!(
                    "{} ⚠️ {} | 尝试 {}/{} | {} 秒后重试",
                    ctx,
                    reason,
                    ctx.attempt,
                    ctx.max_attempts,
                    self.attempts.error_delay.as_secs()
                );
                if let Some(challenge) = state.last_challenge.take() {
                    self.captcha.report_rejected(&challenge).await;
                }
                if !ctx.is_last_attempt() {
                    tokio::time::sleep(self.attempts.error_delay).await;
                }
                Ok(None)
            }
            RetryAction::TreatAsSuccess => {
                warn!("{} ⚠️ 邮箱已存在，视为注册成功", ctx);
                let outcome = OperationOutcome::Finished(OperationResult::success(
                    &account.email,
                    &account.password,
                ));
                Ok(Some(self.finish(ctx, account, outcome, None)))
            }
            RetryAction::Quarantine(quarantine) => {
                Ok(Some(self.quarantine(ctx, account, quarantine, true)))
            }
            RetryAction::QuarantineAndDropSession => {
                warn!("{} ⚠️ 会话已过期", ctx);
                match self.store.delete(&account.email).await {
                    Ok(_) => debug!("{} 已删除持久化会话", ctx),
                    Err(e) => warn!("{} ⚠️ 删除会话失败: {}", ctx, e),
                }
                Ok(Some(self.quarantine(ctx, account, QuarantineReason::Unlogged, true)))
            }
            RetryAction::QuarantineSilently => {
                warn!(
                    "{} ⚠️ 域名 <{}> 可能已被封禁",
                    ctx,
                    account.domain()
                );
                Ok(Some(self.quarantine(ctx, account, QuarantineReason::Banned, false)))
            }
            RetryAction::RotateProxyAndRetry => {
                error!(
                    "{} ❌ {}失败: {} (尝试 {}/{})",
                    ctx,
                    ctx.operation.action(),
                    reason,
                    ctx.attempt,
                    ctx.max_attempts
                );
                if !ctx.is_last_attempt() {
                    self.rotate_proxy(ctx, true).await?;
                }
                Ok(None)
            }
            RetryAction::Abort => {
                error!("{} ❌ {}终止: {}", ctx, ctx.operation.action(), reason);
                let outcome =
                    OperationOutcome::failure(ctx.operation, &account.email, &account.password);
                Ok(Some(self.finish(ctx, account, outcome, None)))
            }
        }
    }

    /// 换一个新代理并持久化，可选等待错误延迟
    async fn rotate_proxy(&self, ctx: &mut OperationContext, wait: bool) -> AppResult<()> {
        let proxy = self.proxies.acquire()?;

        if proxy.is_some() {
            match self
                .store
                .update(&ctx.email, AccountPatch::default().proxy(proxy.clone()))
                .await
            {
                Ok(_) | Err(AppError::Store(StoreError::NotFound { .. })) => {}
                Err(e) => warn!("{} ⚠️ 保存新代理失败: {}", ctx, e),
            }
        }
        ctx.proxy = proxy;

        if wait {
            info!(
                "{} 🔄 已更换代理，{} 秒后重试...",
                ctx,
                self.attempts.error_delay.as_secs()
            );
            tokio::time::sleep(self.attempts.error_delay).await;
        } else {
            info!("{} 🔄 已更换代理", ctx);
        }
        Ok(())
    }

    /// 设置下一次 keepalive 的时间
    async fn reschedule(&self, ctx: &OperationContext) -> DateTime<Utc> {
        let interval = chrono::Duration::from_std(self.keepalive_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(0));
        let next = Utc::now() + interval;
        if let Err(e) = self
            .store
            .update(&ctx.email, AccountPatch::default().sleep_until(next))
            .await
        {
            warn!("{} ⚠️ 保存休眠时间失败: {}", ctx, e);
        }
        next
    }

    // ========== 终态 ==========

    fn quarantine(
        &self,
        ctx: &OperationContext,
        account: &AccountCredentials,
        reason: QuarantineReason,
        log: bool,
    ) -> OperationReport {
        if log {
            error!("{} 🚫 {}，已移出账号列表", ctx, reason.describe());
        }
        if let Err(e) = self
            .exporter
            .export_invalid(&account.email, &account.password, reason)
        {
            warn!("{} ⚠️ 写入隔离记录失败: {}", ctx, e);
        }

        let outcome = OperationOutcome::failure(ctx.operation, &account.email, &account.password);
        self.finish(ctx, account, outcome, Some(reason))
    }

    /// 导出终态结果并生成报告（每个终态恰好一次）
    fn finish(
        &self,
        ctx: &OperationContext,
        account: &AccountCredentials,
        outcome: OperationOutcome,
        quarantined: Option<QuarantineReason>,
    ) -> OperationReport {
        let exported = match &outcome {
            OperationOutcome::Finished(result) => self.exporter.export_result(ctx.operation, result),
            OperationOutcome::Stats(stats) => self.exporter.export_stats(stats),
            OperationOutcome::Farm(_) => Ok(()),
        };
        if let Err(e) = exported {
            warn!("{} ⚠️ 写入结果文件失败: {}", ctx, e);
        }

        OperationReport {
            email: account.email.clone(),
            outcome,
            quarantined,
            attempts: ctx.attempt,
        }
    }
}
