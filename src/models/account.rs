use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 持久化的账号记录
///
/// `auth_token` 存在意味着已经完成登录；`app_id` 缺失时任何需要认证的调用前都必须重新获取。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_until: Option<DateTime<Utc>>,
}

impl AccountRecord {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            app_id: None,
            auth_token: None,
            active_proxy: None,
            sleep_until: None,
        }
    }

    /// 只覆盖补丁中指定的字段
    pub fn apply(&mut self, patch: &AccountPatch) {
        if let Some(password) = &patch.password {
            self.password = password.clone();
        }
        if let Some(app_id) = &patch.app_id {
            self.app_id = Some(app_id.clone());
        }
        if let Some(auth_token) = &patch.auth_token {
            self.auth_token = Some(auth_token.clone());
        }
        if let Some(proxy) = &patch.active_proxy {
            self.active_proxy = Some(proxy.clone());
        }
        if let Some(sleep_until) = patch.sleep_until {
            self.sleep_until = Some(sleep_until);
        }
    }

    /// 账号是否仍处于 farm 休眠期
    pub fn is_sleeping(&self, now: DateTime<Utc>) -> bool {
        self.sleep_until.map(|until| now < until).unwrap_or(false)
    }
}

/// 账号部分字段更新，`None` 表示不修改
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountPatch {
    pub password: Option<String>,
    pub app_id: Option<String>,
    pub auth_token: Option<String>,
    pub active_proxy: Option<String>,
    pub sleep_until: Option<DateTime<Utc>>,
}

impl AccountPatch {
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn proxy(mut self, proxy: Option<String>) -> Self {
        self.active_proxy = proxy;
        self
    }

    pub fn sleep_until(mut self, until: DateTime<Utc>) -> Self {
        self.sleep_until = Some(until);
        self
    }
}

/// 从账号列表文件读取的账号凭据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountCredentials {
    pub email: String,
    #[serde(default)]
    pub password: String,
    /// 邮箱 OAuth refresh token（Outlook / Hotmail）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl AccountCredentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            refresh_token: None,
            client_id: None,
        }
    }

    /// 邮箱域名
    pub fn domain(&self) -> &str {
        self.email.split('@').nth(1).unwrap_or_default()
    }
}

/// 隔离原因，每种原因对应一个归档文件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    Unverified,
    Banned,
    Unregistered,
    Unlogged,
}

impl QuarantineReason {
    pub fn as_str(self) -> &'static str {
        match self {
            QuarantineReason::Unverified => "unverified",
            QuarantineReason::Banned => "banned",
            QuarantineReason::Unregistered => "unregistered",
            QuarantineReason::Unlogged => "unlogged",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            QuarantineReason::Unverified => "邮箱未验证",
            QuarantineReason::Banned => "账号已被封禁",
            QuarantineReason::Unregistered => "邮箱未注册",
            QuarantineReason::Unlogged => "未登录",
        }
    }
}

impl std::fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_apply_keeps_unspecified_fields() {
        let mut record = AccountRecord::new("a@hotmail.com", "pw");
        record.auth_token = Some("token".to_string());
        record.active_proxy = Some("http://old".to_string());

        record.apply(&AccountPatch::default().app_id("app-1"));

        assert_eq!(record.app_id.as_deref(), Some("app-1"));
        assert_eq!(record.auth_token.as_deref(), Some("token"));
        assert_eq!(record.active_proxy.as_deref(), Some("http://old"));
        assert_eq!(record.password, "pw");
    }

    #[test]
    fn test_sleep_gate() {
        let now = Utc::now();
        let mut record = AccountRecord::new("a@hotmail.com", "pw");
        assert!(!record.is_sleeping(now));

        record.sleep_until = Some(now + Duration::seconds(30));
        assert!(record.is_sleeping(now));

        record.sleep_until = Some(now);
        assert!(!record.is_sleeping(now));
    }

    #[test]
    fn test_domain() {
        let creds = AccountCredentials::new("user@outlook.com", "pw");
        assert_eq!(creds.domain(), "outlook.com");
        assert_eq!(AccountCredentials::new("broken", "pw").domain(), "");
    }
}
