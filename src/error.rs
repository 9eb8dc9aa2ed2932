use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 平台 API 调用错误
    #[error("API错误: {0}")]
    Api(#[from] ApiError),
    /// 验证码求解错误
    #[error("验证码错误: {0}")]
    Captcha(#[from] CaptchaError),
    /// 邮箱确认链接获取错误
    #[error("邮箱确认错误: {0}")]
    Confirmation(#[from] ConfirmationError),
    /// 账号存储错误
    #[error("存储错误: {0}")]
    Store(#[from] StoreError),
    /// 配置错误（唯一允许终止进程的错误）
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 平台 API 调用错误
#[derive(Debug, Error)]
pub enum ApiError {
    /// 平台返回的业务错误（需要经过 ErrorClassifier 分类）
    #[error("平台返回错误 ({endpoint}): {message}")]
    Remote { endpoint: String, message: String },
    /// 代理被拒绝（403 Forbidden 页面）
    #[error("代理被拒绝 ({endpoint}): HTTP {status}")]
    ProxyForbidden { endpoint: String, status: u16 },
    /// 会话被限流或被 Cloudflare 拦截
    #[error("会话被限流或被拦截 ({endpoint})")]
    SessionRateLimited { endpoint: String },
    /// 服务端 5xx 错误
    #[error("服务器错误 ({endpoint}): HTTP {status}")]
    Server { endpoint: String, status: u16 },
    /// 网络层错误（超时、TLS、连接失败等）
    #[error("网络请求失败 ({endpoint}): {message}")]
    Transport { endpoint: String, message: String },
    /// 响应无法解析或缺少字段
    #[error("响应格式错误 ({endpoint}): {message}")]
    MalformedResponse { endpoint: String, message: String },
}

/// 验证码求解错误
#[derive(Debug, Error)]
pub enum CaptchaError {
    /// 单次求解失败（子循环内可重试）
    #[error("验证码求解失败: {0}")]
    Unsolved(String),
    /// 子循环预算耗尽
    #[error("验证码求解失败，已尝试 {attempts} 次")]
    SolvingFailed { attempts: usize },
}

/// 邮箱确认错误
#[derive(Debug, Error)]
pub enum ConfirmationError {
    /// 硬超时内未找到确认链接
    #[error("等待确认邮件超时 ({mailbox}, {seconds} 秒)")]
    Timeout { mailbox: String, seconds: u64 },
    /// 邮箱连接或会话错误
    #[error("邮箱会话错误 ({mailbox}): {message}")]
    Mailbox { mailbox: String, message: String },
    /// 邮箱认证失败（凭据无效）
    #[error("邮箱认证失败: {mailbox}")]
    AuthenticationFailed { mailbox: String },
    /// 确认链接中无法提取 key
    #[error("无法从确认链接中提取 key: {link}")]
    KeyNotFound { link: String },
}

/// 账号存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 更新不存在的账号
    #[error("账号不存在: {email}")]
    NotFound { email: String },
    /// 存储文件读写或序列化失败
    #[error("存储文件 {path} 读写失败: {message}")]
    Persistence { path: String, message: String },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置项取值无效
    #[error("配置项 {name} 无效: {reason}")]
    Invalid { name: String, reason: String },
    /// 缺少必需的配置项
    #[error("缺少配置项 {name}")]
    Missing { name: String },
    /// 功能后端不可用
    #[error("{feature} 不可用: {reason}")]
    Unavailable { feature: String, reason: String },
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err
            .url()
            .map(|url| url.path().to_string())
            .unwrap_or_default();
        ApiError::Transport {
            endpoint,
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Api(err.into())
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建平台业务错误
    pub fn remote(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Api(ApiError::Remote {
            endpoint: endpoint.into(),
            message: message.into(),
        })
    }

    /// 创建网络层错误
    pub fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Api(ApiError::Transport {
            endpoint: endpoint.into(),
            message: message.into(),
        })
    }

    /// 创建响应格式错误
    pub fn malformed(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Api(ApiError::MalformedResponse {
            endpoint: endpoint.into(),
            message: message.into(),
        })
    }

    /// 创建配置项无效错误
    pub fn invalid_config(name: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Config(ConfigError::Invalid {
            name: name.into(),
            reason: reason.into(),
        })
    }

    /// 平台返回的业务错误消息（仅 Remote 变体）
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            AppError::Api(ApiError::Remote { message, .. }) => Some(message),
            _ => None,
        }
    }

    /// 代理级错误：不在子循环内重试，直接交给 OperationRunner 换代理
    pub fn is_proxy_level(&self) -> bool {
        matches!(
            self,
            AppError::Api(ApiError::ProxyForbidden { .. })
                | AppError::Api(ApiError::SessionRateLimited { .. })
        )
    }

    /// 致命错误：直接终止整个进程
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Config(_))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_message_only_for_remote_errors() {
        let err = AppError::remote("/v1/user/login/v2", "user not found");
        assert_eq!(err.remote_message(), Some("user not found"));

        let err = AppError::transport("/v1/user/login/v2", "connection reset");
        assert_eq!(err.remote_message(), None);
    }

    #[test]
    fn test_proxy_level_errors() {
        let forbidden = AppError::Api(ApiError::ProxyForbidden {
            endpoint: "/v1/puzzle/get-puzzle".to_string(),
            status: 403,
        });
        let limited = AppError::Api(ApiError::SessionRateLimited {
            endpoint: "/v1/puzzle/get-puzzle".to_string(),
        });
        assert!(forbidden.is_proxy_level());
        assert!(limited.is_proxy_level());
        assert!(!AppError::remote("/x", "Invalid captcha").is_proxy_level());
    }

    #[test]
    fn test_only_config_errors_are_fatal() {
        assert!(AppError::invalid_config("PROXY_URL", "bad template").is_fatal());
        assert!(!AppError::transport("/x", "timeout").is_fatal());
        assert!(!AppError::Captcha(CaptchaError::SolvingFailed { attempts: 5 }).is_fatal());
    }
}
