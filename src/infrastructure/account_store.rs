//! 账号存储 - 基础设施层
//!
//! 以邮箱为键的账号记录存储，支持单账号原子的读-改-写

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AppResult, StoreError};
use crate::models::{AccountPatch, AccountRecord};

/// 账号存储能力
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, email: &str) -> AppResult<Option<AccountRecord>>;

    /// 存在则按补丁更新，不存在则创建
    async fn upsert(&self, email: &str, patch: AccountPatch) -> AppResult<AccountRecord>;

    /// 只更新已存在的账号
    async fn update(&self, email: &str, patch: AccountPatch) -> AppResult<AccountRecord>;

    async fn delete(&self, email: &str) -> AppResult<bool>;

    /// 清除所有账号的代理，返回被清除的数量
    async fn clear_all_proxies(&self) -> AppResult<usize>;
}

fn upsert_in(
    records: &mut HashMap<String, AccountRecord>,
    email: &str,
    patch: &AccountPatch,
) -> AccountRecord {
    let record = records.entry(email.to_string()).or_insert_with(|| {
        AccountRecord::new(email, patch.password.clone().unwrap_or_default())
    });
    record.apply(patch);
    record.clone()
}

fn update_in(
    records: &mut HashMap<String, AccountRecord>,
    email: &str,
    patch: &AccountPatch,
) -> AppResult<AccountRecord> {
    let record = records.get_mut(email).ok_or_else(|| StoreError::NotFound {
        email: email.to_string(),
    })?;
    record.apply(patch);
    Ok(record.clone())
}

fn clear_proxies_in(records: &mut HashMap<String, AccountRecord>) -> usize {
    let mut cleared = 0;
    for record in records.values_mut() {
        if record.active_proxy.take().is_some() {
            cleared += 1;
        }
    }
    cleared
}

/// 内存存储（测试与一次性运行）
#[derive(Default)]
pub struct MemoryAccountStore {
    records: Mutex<HashMap<String, AccountRecord>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一条记录
    pub async fn insert(&self, record: AccountRecord) {
        self.records
            .lock()
            .await
            .insert(record.email.clone(), record);
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn get(&self, email: &str) -> AppResult<Option<AccountRecord>> {
        Ok(self.records.lock().await.get(email).cloned())
    }

    async fn upsert(&self, email: &str, patch: AccountPatch) -> AppResult<AccountRecord> {
        let mut records = self.records.lock().await;
        Ok(upsert_in(&mut records, email, &patch))
    }

    async fn update(&self, email: &str, patch: AccountPatch) -> AppResult<AccountRecord> {
        let mut records = self.records.lock().await;
        update_in(&mut records, email, &patch)
    }

    async fn delete(&self, email: &str) -> AppResult<bool> {
        Ok(self.records.lock().await.remove(email).is_some())
    }

    async fn clear_all_proxies(&self) -> AppResult<usize> {
        let mut records = self.records.lock().await;
        Ok(clear_proxies_in(&mut records))
    }
}

/// JSON 文件存储
///
/// 启动时整体读入，每次修改后整体写回；锁在写回完成前不释放
pub struct JsonFileAccountStore {
    path: PathBuf,
    records: Mutex<HashMap<String, AccountRecord>>,
}

impl JsonFileAccountStore {
    /// 打开存储文件，文件不存在时视为空存储
    pub async fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if tokio::fs::try_exists(&path).await? {
            let content = tokio::fs::read_to_string(&path).await?;
            if content.trim().is_empty() {
                HashMap::new()
            } else {
                let list: Vec<AccountRecord> =
                    serde_json::from_str(&content).map_err(|e| StoreError::Persistence {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    })?;
                list.into_iter()
                    .map(|record| (record.email.clone(), record))
                    .collect()
            }
        } else {
            HashMap::new()
        };

        debug!("📂 已加载 {} 个账号记录: {}", records.len(), path.display());

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    async fn persist(&self, records: &HashMap<String, AccountRecord>) -> AppResult<()> {
        let mut list: Vec<&AccountRecord> = records.values().collect();
        list.sort_by(|a, b| a.email.cmp(&b.email));

        let content = serde_json::to_string_pretty(&list).map_err(|e| StoreError::Persistence {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        // 先写临时文件再替换，避免中途崩溃留下半个 JSON
        let tmp_path = self.tmp_path();
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl AccountStore for JsonFileAccountStore {
    async fn get(&self, email: &str) -> AppResult<Option<AccountRecord>> {
        Ok(self.records.lock().await.get(email).cloned())
    }

    async fn upsert(&self, email: &str, patch: AccountPatch) -> AppResult<AccountRecord> {
        let mut records = self.records.lock().await;
        let record = upsert_in(&mut records, email, &patch);
        self.persist(&records).await?;
        Ok(record)
    }

    async fn update(&self, email: &str, patch: AccountPatch) -> AppResult<AccountRecord> {
        let mut records = self.records.lock().await;
        let record = update_in(&mut records, email, &patch)?;
        self.persist(&records).await?;
        Ok(record)
    }

    async fn delete(&self, email: &str) -> AppResult<bool> {
        let mut records = self.records.lock().await;
        let removed = records.remove(email).is_some();
        if removed {
            self.persist(&records).await?;
        }
        Ok(removed)
    }

    async fn clear_all_proxies(&self) -> AppResult<usize> {
        let mut records = self.records.lock().await;
        let cleared = clear_proxies_in(&mut records);
        if cleared > 0 {
            self.persist(&records).await?;
        }
        Ok(cleared)
    }
}
