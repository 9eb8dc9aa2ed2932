//! 应用主流程 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责账号批量处理和资源装配。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：加载账号列表、打开账号存储、装配客户端与服务
//! 2. **命令分发**：六种操作之一，或清理代理
//! 3. **并发控制**：使用 Semaphore 限制同时运行的 OperationRunner 数量
//! 4. **分批处理**：每批完成后再开始下一批
//! 5. **全局统计**：汇总所有账号的处理结果
//!
//! farm 命令交给 `FarmLoop`，其余操作对账号列表执行一遍

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::clients::{
    AntiCaptchaClient, ClientSettings, ImapConnector, RewardsClientFactory,
};
use crate::config::Config;
use crate::error::AppError;
use crate::infrastructure::JsonFileAccountStore;
use crate::models::{load_account_lists, AccountCredentials, AccountLists, Operation, OperationReport};
use crate::orchestrator::farm_loop::FarmLoop;
use crate::services::{CaptchaPipeline, ConfirmationRetriever, FileResultExporter, LinkCache};
use crate::utils::logging::{
    log_accounts_loaded, log_batch_complete, log_batch_start, log_startup, print_final_stats,
};
use crate::workflow::OperationRunner;

/// 要执行的命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// 对账号列表执行一个操作
    Run(Operation),
    /// 清除所有账号的持久化代理
    CleanProxies,
}

impl Command {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "clean_proxies" | "clean-proxies" => Some(Command::CleanProxies),
            other => Operation::from_str(other).map(Command::Run),
        }
    }
}

/// 应用主结构
pub struct App {
    config: Config,
    command: Command,
    accounts: AccountLists,
    runner: Arc<OperationRunner>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        log_startup(&config);

        let command = Command::parse(&config.command)
            .with_context(|| format!("未知命令: {}", config.command))?;

        let accounts = load_account_lists(Path::new(&config.accounts_file)).await?;

        let store = JsonFileAccountStore::open(&config.store_path)
            .await
            .with_context(|| format!("无法打开账号存储: {}", config.store_path))?;

        let exporter = FileResultExporter::new(&config.results_dir);
        exporter
            .setup_files()
            .with_context(|| format!("无法初始化结果目录: {}", config.results_dir))?;
        if command == Command::Run(Operation::StatsExport) {
            let path = exporter.setup_stats()?;
            info!("📊 统计文件: {}", path.display());
        }

        let factory = RewardsClientFactory::new(ClientSettings::from_config(
            &config,
            accounts.referral_codes.clone(),
        ));
        let solver = AntiCaptchaClient::new(config.captcha.clone())?;
        let captcha = CaptchaPipeline::new(Arc::new(solver), &config.captcha);
        let confirmation = ConfirmationRetriever::new(
            Arc::new(ImapConnector::new(&config.mailbox)),
            &config.mailbox,
            LinkCache::new(),
        )?;

        let runner = OperationRunner::new(
            &config,
            Arc::new(store),
            Arc::new(factory),
            captcha,
            confirmation,
            Arc::new(exporter),
        );

        Ok(Self::new(config, command, accounts, runner))
    }

    /// 用已经装配好的执行器创建应用
    pub fn new(
        config: Config,
        command: Command,
        accounts: AccountLists,
        runner: OperationRunner,
    ) -> Self {
        Self {
            config,
            command,
            accounts,
            runner: Arc::new(runner),
        }
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<()> {
        let operation = match self.command {
            Command::CleanProxies => return self.clean_proxies().await,
            Command::Run(operation) => operation,
        };

        let accounts = self.accounts.for_operation(operation).to_vec();
        if accounts.is_empty() {
            warn!("⚠️ 没有找到需要{}的账号，程序结束", operation.action());
            return Ok(());
        }

        if operation == Operation::Farm {
            let summary = FarmLoop::new(self.runner.clone(), &self.config)
                .run(accounts)
                .await?;
            info!(
                "🌾 farm 结束: {} 轮 | keepalive {} | 失败 {} | 隔离 {}",
                summary.cycles, summary.kept_alive, summary.failed, summary.quarantined
            );
            return Ok(());
        }

        log_accounts_loaded(accounts.len(), self.config.max_concurrent_accounts);
        let stats = self.process_all_accounts(operation, accounts).await?;
        print_final_stats(
            operation.action(),
            stats.success,
            stats.failed,
            stats.quarantined,
            stats.total,
            &self.config.results_dir,
        );

        Ok(())
    }

    async fn clean_proxies(&self) -> Result<()> {
        let cleared = self.runner.store().clear_all_proxies().await?;
        info!("🧹 已清除 {} 个账号的代理", cleared);
        Ok(())
    }

    /// 处理所有账号
    async fn process_all_accounts(
        &self,
        operation: Operation,
        accounts: Vec<AccountCredentials>,
    ) -> Result<ProcessingStats> {
        let batch_size = self.config.max_concurrent_accounts.max(1);
        let semaphore = Arc::new(Semaphore::new(batch_size));
        let total = accounts.len();
        let mut stats = ProcessingStats {
            total,
            ..Default::default()
        };

        for batch_start in (0..total).step_by(batch_size) {
            let batch_end = (batch_start + batch_size).min(total);
            let batch_num = batch_start / batch_size + 1;
            let total_batches = total.div_ceil(batch_size);

            log_batch_start(batch_num, total_batches, batch_start + 1, batch_end, total);

            let batch = self
                .process_batch(operation, &accounts[batch_start..batch_end], semaphore.clone())
                .await?;

            stats.success += batch.success;
            stats.failed += batch.failed;
            stats.quarantined += batch.quarantined;

            log_batch_complete(batch_num, batch.success, batch.success + batch.failed);
        }

        Ok(stats)
    }

    /// 处理单个批次
    ///
    /// 配置错误在整批结束后向上抛出，终止整个进程
    async fn process_batch(
        &self,
        operation: Operation,
        accounts: &[AccountCredentials],
        semaphore: Arc<Semaphore>,
    ) -> Result<BatchResult> {
        let mut handles = Vec::with_capacity(accounts.len());

        for account in accounts {
            let permit = semaphore.clone().acquire_owned().await?;
            let runner = self.runner.clone();
            let account = account.clone();
            let email = account.email.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                runner.run(operation, &account).await
            });
            handles.push((email, handle));
        }

        let mut result = BatchResult::default();
        let mut fatal: Option<AppError> = None;

        for (email, handle) in handles {
            match handle.await {
                Ok(Ok(report)) => result.record(&report),
                Ok(Err(e)) => {
                    error!("[账号 {}] ❌ 配置错误: {}", email, e);
                    result.failed += 1;
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    error!("[账号 {}] 任务执行失败: {}", email, e);
                    result.failed += 1;
                }
            }
        }

        match fatal {
            Some(e) => Err(e.into()),
            None => Ok(result),
        }
    }
}

/// 处理统计
#[derive(Debug, Default)]
struct ProcessingStats {
    success: usize,
    failed: usize,
    quarantined: usize,
    total: usize,
}

/// 批次处理结果
#[derive(Debug, Default)]
struct BatchResult {
    success: usize,
    failed: usize,
    quarantined: usize,
}

impl BatchResult {
    fn record(&mut self, report: &OperationReport) {
        if report.outcome.is_success() {
            self.success += 1;
        } else {
            self.failed += 1;
        }
        if report.quarantined.is_some() {
            self.quarantined += 1;
        }
    }
}
