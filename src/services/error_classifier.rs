//! 错误分类与重试策略 - 业务能力层
//!
//! 把平台返回的错误消息映射为 `ErrorKind`，再由策略表给出唯一的处理动作。
//! 任何未识别的错误都落到"换代理重试"，绝不会导致隔离账号。

use phf::phf_map;

use crate::error::{ApiError, AppError, CaptchaError, ConfirmationError};
use crate::models::{Operation, QuarantineReason};

/// 平台错误的语义分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    IncorrectCaptcha,
    CaptchaExpired,
    InvalidCaptchaToken,
    EmailAlreadyExists,
    EmailUnverified,
    AccountBanned,
    EmailUnregistered,
    SessionExpired,
    /// 启发式判断：域名可能被封（仅在任务/统计上下文中）
    DomainLikelyBanned,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::IncorrectCaptcha,
        ErrorKind::CaptchaExpired,
        ErrorKind::InvalidCaptchaToken,
        ErrorKind::EmailAlreadyExists,
        ErrorKind::EmailUnverified,
        ErrorKind::AccountBanned,
        ErrorKind::EmailUnregistered,
        ErrorKind::SessionExpired,
        ErrorKind::DomainLikelyBanned,
        ErrorKind::Unknown,
    ];
}

/// 处理动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// 等待固定延迟后在当前上下文中重试
    RetrySameContext,
    /// 视为成功（幂等注册）
    TreatAsSuccess,
    /// 隔离账号并记录原因，终止
    Quarantine(QuarantineReason),
    /// 隔离为 unlogged 并删除持久化会话，终止
    QuarantineAndDropSession,
    /// 隔离为 banned 但不再输出失败日志，终止
    QuarantineSilently,
    /// 换代理、等待后重试
    RotateProxyAndRetry,
    /// 终止本次操作但不隔离账号
    Abort,
}

impl RetryAction {
    /// 动作导致的隔离原因
    pub fn quarantine_reason(self) -> Option<QuarantineReason> {
        match self {
            RetryAction::Quarantine(reason) => Some(reason),
            RetryAction::QuarantineAndDropSession => Some(QuarantineReason::Unlogged),
            RetryAction::QuarantineSilently => Some(QuarantineReason::Banned),
            _ => None,
        }
    }
}

// 平台返回的原始错误消息（精确匹配）
static VOCABULARY: phf::Map<&'static str, ErrorKind> = phf_map! {
    "Incorrect answer. Try again!" => ErrorKind::IncorrectCaptcha,
    "Invalid captcha" => ErrorKind::InvalidCaptchaToken,
    "refresh your captcha!!" => ErrorKind::CaptchaExpired,
    "email already exists" => ErrorKind::EmailAlreadyExists,
    "Email not verified , Please check spam folder incase you did not get email" => ErrorKind::EmailUnverified,
    "Something went wrong #BRL4" => ErrorKind::AccountBanned,
    "user not found" => ErrorKind::EmailUnregistered,
    "Your app session expired, Please login again." => ErrorKind::SessionExpired,
};

const GENERIC_FAILURE_MARKER: &str = "Something went wrong";

/// 错误分类器
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// 按消息分类
    ///
    /// 先精确匹配词表；"Something went wrong" 的其它变体（#BR4、#BR10 等）只在
    /// 任务/统计上下文中视为域名被封，这是尽力而为的启发式规则。
    pub fn classify(&self, message: &str, operation: Operation) -> ErrorKind {
        let message = message.trim();
        if let Some(kind) = VOCABULARY.get(message) {
            return *kind;
        }

        let domain_context = matches!(
            operation,
            Operation::TaskCompletion | Operation::StatsExport
        );
        if domain_context && message.contains(GENERIC_FAILURE_MARKER) {
            return ErrorKind::DomainLikelyBanned;
        }

        ErrorKind::Unknown
    }

    /// 策略表：每个分类恰好对应一个动作
    pub fn policy(&self, kind: ErrorKind) -> RetryAction {
        match kind {
            ErrorKind::IncorrectCaptcha
            | ErrorKind::CaptchaExpired
            | ErrorKind::InvalidCaptchaToken => RetryAction::RetrySameContext,
            ErrorKind::EmailAlreadyExists => RetryAction::TreatAsSuccess,
            ErrorKind::EmailUnverified => RetryAction::Quarantine(QuarantineReason::Unverified),
            ErrorKind::AccountBanned => RetryAction::Quarantine(QuarantineReason::Banned),
            ErrorKind::EmailUnregistered => RetryAction::Quarantine(QuarantineReason::Unregistered),
            ErrorKind::SessionExpired => RetryAction::QuarantineAndDropSession,
            ErrorKind::DomainLikelyBanned => RetryAction::QuarantineSilently,
            ErrorKind::Unknown => RetryAction::RotateProxyAndRetry,
        }
    }

    /// 对任意错误给出处理动作
    ///
    /// 平台业务错误走策略表；邮箱认证失败终止但不隔离；其余（网络、验证码耗尽、
    /// 代理被拒、确认超时等）一律换代理重试
    pub fn decide(&self, err: &AppError, operation: Operation) -> (ErrorKind, RetryAction) {
        if let Some(message) = err.remote_message() {
            let kind = self.classify(message, operation);
            return (kind, self.policy(kind));
        }

        match err {
            AppError::Confirmation(ConfirmationError::AuthenticationFailed { .. }) => {
                (ErrorKind::Unknown, RetryAction::Abort)
            }
            _ => (ErrorKind::Unknown, RetryAction::RotateProxyAndRetry),
        }
    }
}

/// 生成简短可读的失败原因（用于日志）
pub fn describe_error(err: &AppError) -> String {
    match err {
        AppError::Api(ApiError::Remote { message, .. }) => message.clone(),
        AppError::Api(ApiError::ProxyForbidden { status, .. }) => {
            format!("Proxy forbidden - {}", status)
        }
        AppError::Api(ApiError::SessionRateLimited { .. }) => {
            "Session is rate limited or blocked by Cloudflare".to_string()
        }
        AppError::Api(ApiError::Server { status, .. }) => format!("Server error - {}", status),
        AppError::Api(ApiError::Transport { message, .. })
        | AppError::Api(ApiError::MalformedResponse { message, .. }) => {
            describe_transport(message)
        }
        AppError::Captcha(CaptchaError::SolvingFailed { attempts }) => {
            format!("Captcha solving failed after {} attempts", attempts)
        }
        other => other.to_string(),
    }
}

fn describe_transport(message: &str) -> String {
    let lower = message.to_lowercase();
    let reason = if lower.contains("tunnel") {
        "Unsuccessful TLS Tunnel"
    } else if lower.contains("proxy") {
        "Proxy failed"
    } else if lower.contains("timed out") || lower.contains("timeout") {
        "Connection timed out"
    } else if lower.contains("empty response") {
        "Received empty response"
    } else if lower.contains("ssl") || lower.contains("tls") || lower.contains("certificate") {
        "SSL Error"
    } else if lower.contains("417") {
        "417 Expectation Failed"
    } else if lower.contains("connect") {
        "Connection Error"
    } else {
        return message.to_string();
    };
    reason.to_string()
}
