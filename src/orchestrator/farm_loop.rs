//! Farm 循环 - 编排层
//!
//! 对一组账号反复执行 farm 操作：
//! - 每轮开始前可选打乱顺序
//! - 被隔离的账号移出工作集
//! - 每轮之间暂停，工作集为空时退出
//!
//! 单个账号每轮是否真的发送 keepalive 由 `sleep_until` 闸门决定

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::AppResult;
use crate::models::{AccountCredentials, FarmReport, Operation, OperationOutcome};
use crate::utils::logging::log_farm_cycle;
use crate::workflow::OperationRunner;

/// farm 循环的累计统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FarmSummary {
    pub cycles: usize,
    pub kept_alive: usize,
    pub sleeping: usize,
    pub failed: usize,
    pub quarantined: usize,
}

pub struct FarmLoop {
    runner: Arc<OperationRunner>,
    shuffle: bool,
    pause: Duration,
    max_cycles: Option<usize>,
}

impl FarmLoop {
    pub fn new(runner: Arc<OperationRunner>, config: &Config) -> Self {
        Self {
            runner,
            shuffle: config.shuffle_accounts,
            pause: config.farm_cycle_pause,
            max_cycles: None,
        }
    }

    /// 限制循环轮数（None 表示一直运行到工作集为空）
    pub fn with_max_cycles(mut self, max_cycles: Option<usize>) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    /// 运行 farm 循环
    ///
    /// 只有配置错误会中断循环
    pub async fn run(&self, accounts: Vec<AccountCredentials>) -> AppResult<FarmSummary> {
        let mut working = accounts;
        let mut summary = FarmSummary::default();

        info!("🌾 开始 farm，共 {} 个账号", working.len());

        loop {
            if working.is_empty() {
                warn!("⚠️ 没有可以 farm 的账号，退出循环");
                break;
            }
            if let Some(max) = self.max_cycles {
                if summary.cycles >= max {
                    break;
                }
            }

            summary.cycles += 1;
            if self.shuffle {
                working.shuffle(&mut rand::thread_rng());
            }

            let (mut kept_alive, mut sleeping, mut failed) = (0, 0, 0);
            let mut retained = Vec::with_capacity(working.len());

            for account in working {
                let report = self.runner.run(Operation::Farm, &account).await?;

                if report.quarantined.is_some() {
                    summary.quarantined += 1;
                    continue;
                }
                match report.outcome {
                    OperationOutcome::Farm(FarmReport::KeptAlive) => kept_alive += 1,
                    OperationOutcome::Farm(FarmReport::Sleeping) => sleeping += 1,
                    _ => failed += 1,
                }
                retained.push(account);
            }
            working = retained;

            summary.kept_alive += kept_alive;
            summary.sleeping += sleeping;
            summary.failed += failed;
            log_farm_cycle(summary.cycles, kept_alive, sleeping, failed, working.len());

            if !working.is_empty() {
                tokio::time::sleep(self.pause).await;
            }
        }

        Ok(summary)
    }
}
