//! 确认链接检索服务 - 业务能力层
//!
//! 在邮箱中查找参考时间之后到达的确认链接：
//! 1. 只读打开文件夹，扫描全部邮件，保留日期最新的匹配
//! 2. 没有匹配时挂起等待新邮件，每次只重新扫描未读邮件
//! 3. 整个过程受硬超时约束，会话在任何退出路径上都会关闭

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::clients::{MailboxConnector, MailboxSession, RawMessage, SearchQuery};
use crate::config::MailboxSettings;
use crate::error::{AppError, AppResult};
use crate::models::AccountCredentials;

/// 关闭会话的时间上限
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// 检索失败的终态原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationFailure {
    /// 超时内没有任何新的匹配
    Timeout,
    /// 匹配到的链接都已被其他账号使用
    NotFound,
}

/// 检索结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationResult {
    Found(String),
    Failed(ConfirmationFailure),
}

/// 进程级的已使用链接缓存
///
/// 多个账号共用一个转发邮箱时，同一条链接只能被一个账号取走
#[derive(Debug, Clone, Default)]
pub struct LinkCache {
    consumed: Arc<Mutex<HashSet<String>>>,
}

impl LinkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_consumed(&self, link: &str) -> bool {
        self.consumed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(link)
    }

    /// 原子地占用链接，已被占用时返回 false
    pub fn try_consume(&self, link: &str) -> bool {
        self.consumed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(link.to_string())
    }
}

#[derive(Debug)]
struct ScanState {
    since: DateTime<Utc>,
    saw_consumed: bool,
}

/// 确认链接检索器
pub struct ConfirmationRetriever {
    connector: Arc<dyn MailboxConnector>,
    patterns: Vec<Regex>,
    folder: String,
    hard_timeout: Duration,
    cache: LinkCache,
    redirect: Option<AccountCredentials>,
}

impl ConfirmationRetriever {
    pub fn new(
        connector: Arc<dyn MailboxConnector>,
        settings: &MailboxSettings,
        cache: LinkCache,
    ) -> AppResult<Self> {
        let patterns = settings
            .link_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    AppError::invalid_config("link_patterns", format!("{}: {}", pattern, e))
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        let redirect = settings.redirect.as_ref().map(|r| AccountCredentials {
            email: r.email.clone(),
            password: r.password.clone(),
            refresh_token: r.refresh_token.clone(),
            client_id: r.client_id.clone(),
        });

        Ok(Self {
            connector,
            patterns,
            folder: settings.folder.clone(),
            hard_timeout: settings.confirmation_timeout,
            cache,
            redirect,
        })
    }

    /// 实际要打开的邮箱（转发模式下为转发邮箱）
    fn mailbox_for<'a>(&'a self, identity: &'a AccountCredentials) -> &'a AccountCredentials {
        self.redirect.as_ref().unwrap_or(identity)
    }

    /// 验证邮箱可以登录（打开后立即关闭会话）
    pub async fn validate(&self, identity: &AccountCredentials) -> AppResult<()> {
        let mailbox = self.mailbox_for(identity);
        let mut session = self.connector.connect(mailbox).await?;
        close_session(session.as_mut(), &mailbox.email).await;
        Ok(())
    }

    /// 检索 `since` 之后到达的确认链接
    pub async fn retrieve(
        &self,
        identity: &AccountCredentials,
        since: DateTime<Utc>,
    ) -> AppResult<ConfirmationResult> {
        let mailbox = self.mailbox_for(identity);
        let deadline = Instant::now() + self.hard_timeout;

        let mut session = match timeout_at(deadline, self.connector.connect(mailbox)).await {
            Ok(session) => session?,
            Err(_) => return Ok(ConfirmationResult::Failed(ConfirmationFailure::Timeout)),
        };

        let mut state = ScanState {
            since,
            saw_consumed: false,
        };
        let scanned = timeout_at(deadline, self.scan(session.as_mut(), &mut state)).await;

        close_session(session.as_mut(), &mailbox.email).await;

        match scanned {
            Ok(Ok(link)) => {
                if self.cache.try_consume(&link) {
                    info!("[账号 {}] 📧 已找到确认链接", identity.email);
                    Ok(ConfirmationResult::Found(link))
                } else {
                    debug!("链接已被其他账号占用: {}", link);
                    Ok(ConfirmationResult::Failed(ConfirmationFailure::NotFound))
                }
            }
            Ok(Err(e)) => Err(e),
            Err(_) if state.saw_consumed => {
                Ok(ConfirmationResult::Failed(ConfirmationFailure::NotFound))
            }
            Err(_) => Ok(ConfirmationResult::Failed(ConfirmationFailure::Timeout)),
        }
    }

    async fn scan(
        &self,
        session: &mut dyn MailboxSession,
        state: &mut ScanState,
    ) -> AppResult<String> {
        session.examine(&self.folder).await?;

        let uids = session.search(SearchQuery::All).await?;
        let messages = session.fetch(&uids).await?;
        if let Some(link) = self.best_match(&messages, state) {
            return Ok(link);
        }

        loop {
            session.wait_for_new_mail().await?;
            let uids = session.search(SearchQuery::Unseen).await?;
            let messages = session.fetch(&uids).await?;
            if let Some(link) = self.best_match(&messages, state) {
                return Ok(link);
            }
        }
    }

    /// 在一批邮件中找出日期最新的、尚未被使用的匹配
    fn best_match(&self, messages: &[RawMessage], state: &mut ScanState) -> Option<String> {
        let mut best: Option<(DateTime<Utc>, String)> = None;

        for message in messages {
            let Some(date) = message.date else {
                continue;
            };
            let newest = best.as_ref().map(|(d, _)| *d).unwrap_or(state.since);
            if date <= newest {
                continue;
            }

            let body = normalize_body(&message.body);
            for pattern in &self.patterns {
                let Some(found) = pattern.find(&body) else {
                    continue;
                };
                let link = found.as_str().split('"').next().unwrap_or_default().to_string();
                if link.is_empty() {
                    continue;
                }
                // 每封邮件只取第一个匹配
                if self.cache.is_consumed(&link) {
                    state.saw_consumed = true;
                } else {
                    best = Some((date, link));
                }
                break;
            }
        }

        best.map(|(_, link)| link)
    }
}

/// 关闭会话，失败或超时只记录日志
async fn close_session(session: &mut dyn MailboxSession, mailbox: &str) {
    match timeout(LOGOUT_TIMEOUT, session.logout()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("⚠️ 关闭邮箱会话失败 {}: {}", mailbox, e),
        Err(_) => warn!("⚠️ 关闭邮箱会话超时 {}", mailbox),
    }
}

/// 去掉 quoted-printable 软换行与 `=3D` 转义
pub fn normalize_body(body: &str) -> String {
    body.replace("=\r\n", "").replace("=\n", "").replace("=3D", "=")
}

/// 从确认链接中取出 key；没有 `key=` 时返回 None
pub fn extract_key(link: &str) -> Option<String> {
    let rest = link.split("key=").nth(1)?;
    let key: String = rest
        .chars()
        .take_while(|c| !matches!(c, '&' | '"' | '\'' | '<' | '>') && !c.is_whitespace())
        .collect();
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}
