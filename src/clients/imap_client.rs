//! IMAP 邮箱客户端
//!
//! 只实现确认邮件检索需要的最小命令集：
//! LOGIN / AUTHENTICATE XOAUTH2、EXAMINE、UID SEARCH、UID FETCH、IDLE、LOGOUT

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::clients::mailbox::{
    MailboxConnector, MailboxSession, OAuthTokenRefresher, RawMessage, SearchQuery,
};
use crate::config::MailboxSettings;
use crate::error::{AppError, AppResult, ConfirmationError};
use crate::models::AccountCredentials;

/// IMAP over TLS 连接器
pub struct ImapConnector {
    tls: TlsConnector,
    oauth: OAuthTokenRefresher,
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl ImapConnector {
    pub fn new(settings: &MailboxSettings) -> Self {
        let mut roots = RootCertStore::empty();
        roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));

        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            tls: TlsConnector::from(Arc::new(config)),
            oauth: OAuthTokenRefresher::new(&settings.oauth_token_url, &settings.oauth_scope),
            host: settings.imap_host.clone(),
            port: settings.imap_port,
            connect_timeout: settings.imap_connect_timeout,
        }
    }

    async fn open(&self, identity: &AccountCredentials) -> AppResult<Box<dyn MailboxSession>> {
        let mailbox = identity.email.clone();
        let io_error = |e: std::io::Error| mailbox_error(&mailbox, e.to_string());

        let server_name = ServerName::try_from(self.host.as_str())
            .map_err(|e| AppError::invalid_config("IMAP_HOST", e.to_string()))?;
        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(io_error)?;
        let stream = self.tls.connect(server_name, tcp).await.map_err(io_error)?;

        let mut session = ImapSession::new(mailbox.clone(), stream);
        session.read_greeting().await?;

        let access_token = match (&identity.refresh_token, &identity.client_id) {
            (Some(refresh_token), Some(client_id))
                if !refresh_token.is_empty() && !client_id.is_empty() =>
            {
                self.oauth.access_token(refresh_token, client_id).await
            }
            _ => None,
        };
        session.authenticate(identity, access_token.as_deref()).await?;

        debug!("📬 邮箱会话已建立: {}", mailbox);
        Ok(Box::new(session))
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&self, identity: &AccountCredentials) -> AppResult<Box<dyn MailboxSession>> {
        match tokio::time::timeout(self.connect_timeout, self.open(identity)).await {
            Ok(result) => result,
            Err(_) => Err(mailbox_error(&identity.email, "连接邮箱超时")),
        }
    }
}

fn mailbox_error(mailbox: &str, message: impl Into<String>) -> AppError {
    AppError::Confirmation(ConfirmationError::Mailbox {
        mailbox: mailbox.to_string(),
        message: message.into(),
    })
}

/// 一条完整的服务器响应（字面量已单独取出）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ImapResponse {
    text: String,
    literals: Vec<Vec<u8>>,
}

enum CommandError {
    /// 服务器返回 NO / BAD
    Rejected(String),
    Io(std::io::Error),
}

impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        CommandError::Io(err)
    }
}

/// IMAP 会话
pub struct ImapSession<S> {
    mailbox: String,
    stream: BufReader<S>,
    tag_counter: u32,
    idle_tag: Option<String>,
    closed: bool,
}

impl<S> ImapSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(mailbox: String, stream: S) -> Self {
        Self {
            mailbox,
            stream: BufReader::new(stream),
            tag_counter: 0,
            idle_tag: None,
            closed: false,
        }
    }

    fn next_tag(&mut self) -> String {
        self.tag_counter += 1;
        format!("A{:04}", self.tag_counter)
    }

    fn to_app_error(&self, err: CommandError) -> AppError {
        match err {
            CommandError::Rejected(status) => mailbox_error(&self.mailbox, status),
            CommandError::Io(e) => mailbox_error(&self.mailbox, e.to_string()),
        }
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await
    }

    async fn read_response(&mut self) -> std::io::Result<ImapResponse> {
        let mut response = ImapResponse::default();
        loop {
            let mut raw = Vec::new();
            let read = self.stream.read_until(b'\n', &mut raw).await?;
            if read == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "IMAP 连接已关闭",
                ));
            }
            let line = String::from_utf8_lossy(&raw)
                .trim_end_matches(|c| c == '\r' || c == '\n')
                .to_string();

            match literal_size(&line) {
                Some(size) => {
                    let mut literal = vec![0u8; size];
                    self.stream.read_exact(&mut literal).await?;
                    response.text.push_str(&line);
                    response.literals.push(literal);
                }
                None => {
                    response.text.push_str(&line);
                    return Ok(response);
                }
            }
        }
    }

    async fn read_greeting(&mut self) -> AppResult<()> {
        let greeting = self
            .read_response()
            .await
            .map_err(|e| mailbox_error(&self.mailbox, e.to_string()))?;
        if greeting.text.starts_with("* OK") || greeting.text.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(mailbox_error(&self.mailbox, greeting.text))
        }
    }

    /// 发送命令并收集未标记响应，直到收到本命令的标记响应
    async fn command(&mut self, command: &str) -> Result<Vec<ImapResponse>, CommandError> {
        let tag = self.next_tag();
        self.write_line(&format!("{} {}", tag, command)).await?;

        let prefix = format!("{} ", tag);
        let mut untagged = Vec::new();
        loop {
            let response = self.read_response().await?;
            if let Some(status) = response.text.strip_prefix(&prefix) {
                if status.starts_with("OK") {
                    return Ok(untagged);
                }
                return Err(CommandError::Rejected(status.to_string()));
            }
            if response.text.starts_with('+') {
                // SASL 失败时服务器发送 challenge，回空行以结束认证
                self.write_line("").await?;
                continue;
            }
            untagged.push(response);
        }
    }

    async fn authenticate(
        &mut self,
        identity: &AccountCredentials,
        access_token: Option<&str>,
    ) -> AppResult<()> {
        let command = match access_token {
            Some(token) => {
                let raw = format!("user={}\x01auth=Bearer {}\x01\x01", identity.email, token);
                let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
                format!("AUTHENTICATE XOAUTH2 {}", encoded)
            }
            None => format!(
                "LOGIN {} {}",
                quote(&identity.email),
                quote(&identity.password)
            ),
        };

        match self.command(&command).await {
            Ok(_) => Ok(()),
            Err(CommandError::Rejected(status)) => {
                debug!("邮箱认证被拒绝 {}: {}", self.mailbox, status);
                Err(AppError::Confirmation(ConfirmationError::AuthenticationFailed {
                    mailbox: self.mailbox.clone(),
                }))
            }
            Err(e) => Err(self.to_app_error(e)),
        }
    }
}

#[async_trait]
impl<S> MailboxSession for ImapSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn examine(&mut self, folder: &str) -> AppResult<()> {
        let command = format!("EXAMINE {}", quote(folder));
        match self.command(&command).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.to_app_error(e)),
        }
    }

    async fn search(&mut self, query: SearchQuery) -> AppResult<Vec<u32>> {
        let criteria = match query {
            SearchQuery::All => "ALL",
            SearchQuery::Unseen => "UNSEEN",
        };
        match self.command(&format!("UID SEARCH {}", criteria)).await {
            Ok(responses) => Ok(parse_search(&responses)),
            Err(e) => Err(self.to_app_error(e)),
        }
    }

    async fn fetch(&mut self, uids: &[u32]) -> AppResult<Vec<RawMessage>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let set = uids
            .iter()
            .map(|uid| uid.to_string())
            .collect::<Vec<_>>()
            .join(",");

        match self
            .command(&format!("UID FETCH {} (UID INTERNALDATE BODY.PEEK[])", set))
            .await
        {
            Ok(responses) => Ok(responses.iter().filter_map(parse_fetch).collect()),
            Err(e) => Err(self.to_app_error(e)),
        }
    }

    async fn wait_for_new_mail(&mut self) -> AppResult<()> {
        let tag = self.next_tag();
        let prefix = format!("{} ", tag);
        self.write_line(&format!("{} IDLE", tag))
            .await
            .map_err(|e| mailbox_error(&self.mailbox, e.to_string()))?;
        self.idle_tag = Some(tag);

        loop {
            let response = self
                .read_response()
                .await
                .map_err(|e| mailbox_error(&self.mailbox, e.to_string()))?;
            if response.text.starts_with(&prefix) {
                // 服务器主动结束了 IDLE
                self.idle_tag = None;
                return Ok(());
            }
            if response.text.ends_with("EXISTS") || response.text.ends_with("RECENT") {
                break;
            }
        }

        self.write_line("DONE")
            .await
            .map_err(|e| mailbox_error(&self.mailbox, e.to_string()))?;
        loop {
            let response = self
                .read_response()
                .await
                .map_err(|e| mailbox_error(&self.mailbox, e.to_string()))?;
            if response.text.starts_with(&prefix) {
                break;
            }
        }
        self.idle_tag = None;
        Ok(())
    }

    async fn logout(&mut self) -> AppResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // 尽力而为：IDLE 可能被超时中断，先结束 IDLE 再登出
        if self.idle_tag.take().is_some() {
            let _ = self.write_line("DONE").await;
        }
        let tag = self.next_tag();
        let _ = self.write_line(&format!("{} LOGOUT", tag)).await;
        let _ = self.stream.get_mut().shutdown().await;
        debug!("📪 邮箱会话已关闭: {}", self.mailbox);
        Ok(())
    }
}

/// 行尾的 `{N}` 表示后面紧跟 N 字节的字面量
fn literal_size(line: &str) -> Option<usize> {
    let inner = line.strip_suffix('}')?;
    let start = inner.rfind('{')?;
    inner[start + 1..].parse().ok()
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn parse_search(responses: &[ImapResponse]) -> Vec<u32> {
    responses
        .iter()
        .filter_map(|r| r.text.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace())
        .filter_map(|id| id.parse().ok())
        .collect()
}

fn parse_fetch(response: &ImapResponse) -> Option<RawMessage> {
    if !response.text.contains(" FETCH ") {
        return None;
    }

    let uid = response
        .text
        .split("UID ")
        .nth(1)?
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .ok()?;

    let body = response
        .literals
        .first()
        .map(|bytes| String::from_utf8_lossy(bytes).to_string())
        .unwrap_or_default();

    let date = internal_date(&response.text).or_else(|| header_date(&body));

    Some(RawMessage { uid, date, body })
}

fn internal_date(text: &str) -> Option<DateTime<Utc>> {
    let rest = text.split("INTERNALDATE \"").nth(1)?;
    let value = rest.split('"').next()?;
    DateTime::parse_from_str(value.trim(), "%d-%b-%Y %H:%M:%S %z")
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

fn header_date(body: &str) -> Option<DateTime<Utc>> {
    body.lines()
        .take_while(|line| !line.trim().is_empty())
        .find_map(|line| line.strip_prefix("Date:"))
        .and_then(|value| DateTime::parse_from_rfc2822(value.trim()).ok())
        .map(|date| date.with_timezone(&Utc))
}
