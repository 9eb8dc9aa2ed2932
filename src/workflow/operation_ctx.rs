//! 操作上下文
//!
//! 封装"我正在为哪个账号执行哪个操作的第几次尝试"这一信息

use std::fmt::Display;

use crate::models::Operation;

/// 单次操作的上下文
///
/// 只属于一次 `OperationRunner::run` 调用，操作返回即丢弃
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// 账号邮箱
    pub email: String,

    pub operation: Operation,

    /// 当前尝试序号（从 1 开始）
    pub attempt: usize,

    pub max_attempts: usize,

    /// 当前使用的代理
    pub proxy: Option<String>,

    /// 当前的 app id
    pub app_id: Option<String>,

    /// 上一次失败的可读原因
    pub last_error: Option<String>,
}

impl OperationContext {
    pub fn new(email: impl Into<String>, operation: Operation, max_attempts: usize) -> Self {
        Self {
            email: email.into(),
            operation,
            attempt: 0,
            max_attempts,
            proxy: None,
            app_id: None,
            last_error: None,
        }
    }

    /// 是否为最后一次尝试
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

impl Display for OperationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[账号 {}]", self.email)
    }
}
