//! 邮箱客户端抽象
//!
//! 会话能力以 trait 暴露，具体协议实现见 `imap_client`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::AppResult;
use crate::models::AccountCredentials;

/// 搜索条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchQuery {
    All,
    Unseen,
}

/// 一封原始邮件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub uid: u32,
    /// 邮件日期，无法解析时为 None（此类邮件会被跳过）
    pub date: Option<DateTime<Utc>>,
    pub body: String,
}

/// 已认证的邮箱会话
#[async_trait]
pub trait MailboxSession: Send {
    /// 以只读方式打开文件夹
    async fn examine(&mut self, folder: &str) -> AppResult<()>;
    async fn search(&mut self, query: SearchQuery) -> AppResult<Vec<u32>>;
    async fn fetch(&mut self, uids: &[u32]) -> AppResult<Vec<RawMessage>>;
    /// 挂起直到有新邮件到达
    async fn wait_for_new_mail(&mut self) -> AppResult<()>;
    /// 关闭会话（必须在所有退出路径上调用）
    async fn logout(&mut self) -> AppResult<()>;
}

/// 建立邮箱会话的能力
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(&self, identity: &AccountCredentials) -> AppResult<Box<dyn MailboxSession>>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

/// Microsoft OAuth refresh-token 换取 access token
pub struct OAuthTokenRefresher {
    client: reqwest::Client,
    token_url: String,
    scope: String,
}

impl OAuthTokenRefresher {
    pub fn new(token_url: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url: token_url.into(),
            scope: scope.into(),
        }
    }

    /// 先不带 scope 请求，失败后带 IMAP scope 再试一次；两次都失败返回 None
    pub async fn access_token(&self, refresh_token: &str, client_id: &str) -> Option<String> {
        match self.request(refresh_token, client_id, None).await {
            Ok(token) => return Some(token),
            Err(e) => debug!("首次获取 access token 失败: {}", e),
        }

        match self
            .request(refresh_token, client_id, Some(self.scope.as_str()))
            .await
        {
            Ok(token) => Some(token),
            Err(e) => {
                warn!("⚠️ 获取邮箱 access token 失败: {}", e);
                None
            }
        }
    }

    async fn request(
        &self,
        refresh_token: &str,
        client_id: &str,
        scope: Option<&str>,
    ) -> anyhow::Result<String> {
        let mut form = vec![
            ("client_id", client_id),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        if let Some(scope) = scope {
            form.push(("scope", scope));
        }

        let response: TokenResponse = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| anyhow::anyhow!("响应中没有 access_token"))
    }
}
