use crate::models::account::AccountCredentials;
use crate::models::operation::Operation;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;

/// accounts.toml 中按操作划分的账号列表
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountLists {
    #[serde(default)]
    pub register: Vec<AccountCredentials>,
    #[serde(default)]
    pub verify: Vec<AccountCredentials>,
    #[serde(default)]
    pub login: Vec<AccountCredentials>,
    #[serde(default)]
    pub farm: Vec<AccountCredentials>,
    #[serde(default)]
    pub complete_tasks: Vec<AccountCredentials>,
    #[serde(default)]
    pub export_stats: Vec<AccountCredentials>,
    /// 注册时随机选用的邀请码
    #[serde(default)]
    pub referral_codes: Vec<String>,
}

impl AccountLists {
    /// 取出某个操作对应的账号列表
    pub fn for_operation(&self, operation: Operation) -> &[AccountCredentials] {
        match operation {
            Operation::Registration => &self.register,
            Operation::Verification => &self.verify,
            Operation::Login => &self.login,
            Operation::Farm => &self.farm,
            Operation::TaskCompletion => &self.complete_tasks,
            Operation::StatsExport => &self.export_stats,
        }
    }
}

/// 从 TOML 文件加载账号列表
pub async fn load_account_lists(path: &Path) -> Result<AccountLists> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取账号文件: {}", path.display()))?;

    let lists = parse_account_lists(&content)
        .with_context(|| format!("无法解析账号文件: {}", path.display()))?;

    Ok(lists)
}

/// 解析账号列表，过滤掉空邮箱并按邮箱去重
pub fn parse_account_lists(content: &str) -> Result<AccountLists> {
    let mut lists: AccountLists = toml::from_str(content)?;

    for list in [
        &mut lists.register,
        &mut lists.verify,
        &mut lists.login,
        &mut lists.farm,
        &mut lists.complete_tasks,
        &mut lists.export_stats,
    ] {
        let mut seen = std::collections::HashSet::new();
        list.retain(|creds| {
            let email = creds.email.trim().to_lowercase();
            if email.is_empty() {
                tracing::warn!("⚠️ 跳过空邮箱的账号条目");
                return false;
            }
            seen.insert(email)
        });
    }

    lists.referral_codes.retain(|code| !code.trim().is_empty());

    Ok(lists)
}
