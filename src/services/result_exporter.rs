//! 结果导出服务 - 业务能力层
//!
//! 只负责"把终态结果追加到文件"，不关心流程

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::error::AppResult;
use crate::models::{Operation, OperationResult, QuarantineReason, StatsResult};
use crate::models::operation::TASK_POINTS;

const STATS_HEADER: &str =
    "Email,Referral Code,Points,Referral Points,Total Points,Registration Date,Completed Tasks";

const QUARANTINE_REASONS: [QuarantineReason; 4] = [
    QuarantineReason::Unverified,
    QuarantineReason::Banned,
    QuarantineReason::Unregistered,
    QuarantineReason::Unlogged,
];

/// 结果导出能力
///
/// 每个终态结果恰好调用一次
pub trait ResultExporter: Send + Sync {
    /// 通过/失败类操作的结果
    fn export_result(&self, operation: Operation, result: &OperationResult) -> AppResult<()>;

    /// 隔离账号归档
    fn export_invalid(&self, email: &str, password: &str, reason: QuarantineReason)
        -> AppResult<()>;

    /// 统计结果（只写成功的行）
    fn export_stats(&self, stats: &StatsResult) -> AppResult<()>;
}

/// 文件导出器
///
/// 目录结构：
/// - `<base>/<module>/<file>_{success,failed}.txt`
/// - `<base>/accounts/<reason>_accounts.txt`
/// - `<base>/stats/accounts_stats_<unix>.csv`
pub struct FileResultExporter {
    base: PathBuf,
    stats_path: Mutex<Option<PathBuf>>,
    write_lock: Mutex<()>,
}

impl FileResultExporter {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            stats_path: Mutex::new(None),
            write_lock: Mutex::new(()),
        }
    }

    /// 结果文件路径；stats 与 farm 没有通过/失败文件
    pub fn sink_path(&self, operation: Operation, success: bool) -> Option<PathBuf> {
        let (dir, stem) = match operation {
            Operation::Registration => ("registration", "registration"),
            Operation::Verification => ("re_verify", "verify"),
            Operation::Login => ("login", "login"),
            Operation::TaskCompletion => ("tasks", "tasks"),
            Operation::StatsExport | Operation::Farm => return None,
        };
        let outcome = if success { "success" } else { "failed" };
        Some(self.base.join(dir).join(format!("{}_{}.txt", stem, outcome)))
    }

    pub fn quarantine_path(&self, reason: QuarantineReason) -> PathBuf {
        self.base
            .join("accounts")
            .join(format!("{}_accounts.txt", reason.as_str()))
    }

    /// 本次运行的统计 CSV 路径（调用 `setup_stats` 之后才存在）
    pub fn stats_path(&self) -> Option<PathBuf> {
        self.stats_path
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// 清空所有结果文件并确保隔离归档存在
    pub fn setup_files(&self) -> AppResult<()> {
        let operations = [
            Operation::Registration,
            Operation::Verification,
            Operation::Login,
            Operation::TaskCompletion,
        ];
        for operation in operations {
            for success in [true, false] {
                if let Some(path) = self.sink_path(operation, success) {
                    ensure_parent(&path)?;
                    fs::write(&path, "")?;
                }
            }
        }

        for reason in QUARANTINE_REASONS {
            let path = self.quarantine_path(reason);
            ensure_parent(&path)?;
            OpenOptions::new().create(true).append(true).open(&path)?;
        }

        Ok(())
    }

    /// 为本次运行创建新的统计 CSV
    pub fn setup_stats(&self) -> AppResult<PathBuf> {
        let timestamp = chrono::Utc::now().timestamp();
        let path = self
            .base
            .join("stats")
            .join(format!("accounts_stats_{}.csv", timestamp));
        ensure_parent(&path)?;
        fs::write(&path, format!("{}\n", STATS_HEADER))?;

        *self
            .stats_path
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(path.clone());
        Ok(path)
    }

    fn append_line(&self, path: &Path, line: &str) -> AppResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ensure_parent(path)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(format!("{}\n", line).as_bytes())?;
        Ok(())
    }
}

impl ResultExporter for FileResultExporter {
    fn export_result(&self, operation: Operation, result: &OperationResult) -> AppResult<()> {
        let Some(path) = self.sink_path(operation, result.status) else {
            return Ok(());
        };
        debug!("写入结果: {} -> {}", result.identifier, path.display());
        self.append_line(&path, &format!("{}:{}", result.identifier, result.data))
    }

    fn export_invalid(
        &self,
        email: &str,
        password: &str,
        reason: QuarantineReason,
    ) -> AppResult<()> {
        let line = if password.is_empty() {
            email.to_string()
        } else {
            format!("{}:{}", email, password)
        };
        self.append_line(&self.quarantine_path(reason), &line)
    }

    fn export_stats(&self, stats: &StatsResult) -> AppResult<()> {
        let Some(row) = stats_row(stats) else {
            return Ok(());
        };
        let path = match self.stats_path() {
            Some(path) => path,
            None => self.setup_stats()?,
        };
        self.append_line(&path, &row)
    }
}

fn ensure_parent(path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// 生成一行统计 CSV；失败结果或缺少数据时返回 None
pub fn stats_row(stats: &StatsResult) -> Option<String> {
    if !stats.success {
        return None;
    }
    let referral = stats.referral_point.as_ref()?;
    let reward = stats.reward_point.as_ref()?;

    let completed = reward.all_tasks_completed();
    let task_points = if completed { TASK_POINTS * 3.0 } else { 0.0 };
    let total = reward.points + referral.commission + task_points;

    let fields = [
        referral.email.clone(),
        referral.referral_code.clone(),
        reward.points.to_string(),
        referral.commission.to_string(),
        total.to_string(),
        reward.registerpointsdate.clone().unwrap_or_default(),
        completed.to_string(),
    ];
    Some(
        fields
            .iter()
            .map(|field| csv_field(field))
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
