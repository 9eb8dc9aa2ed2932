//! # Dawn Farmer
//!
//! 奖励平台账号生命周期自动化：注册、验证、登录、完成任务、导出统计、keepalive
//!
//! ## 架构设计
//!
//! 本系统采用严格的分层架构，只允许向下依赖：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 只暴露能力，不含业务
//! - `HttpTransport` - `send(RequestSpec) -> HttpResponse`
//! - `AccountStore` - 账号记录的部分字段读写
//!
//! ### ② 客户端（Clients）
//! - `clients/` - 外部服务的协议客户端
//! - `RewardsApi` - 平台接口
//! - `CaptchaSolver` - 验证码求解服务
//! - `MailboxConnector` - 邮箱（IMAP）
//!
//! ### ③ 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个账号
//! - `ErrorClassifier` - 错误分类与重试策略
//! - `CaptchaPipeline` - 验证码子循环
//! - `ConfirmationRetriever` - 确认链接检索
//! - `ProxyAssigner` - 代理分配
//! - `ResultExporter` - 结果文件
//!
//! ### ④ 流程层（Workflow）
//! - `workflow/` - 定义"一个账号的一个操作"的完整流程
//! - `OperationContext` - 上下文封装（账号 + 尝试序号 + 代理）
//! - `OperationRunner` - 有界重试状态机
//!
//! ### ⑤ 编排层（Orchestration）
//! - `orchestrator/app` - 批量账号处理，管理并发
//! - `orchestrator/farm_loop` - farm 循环
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{AccountCredentials, AccountRecord, Operation, OperationReport};
pub use orchestrator::{App, Command, FarmLoop};
pub use workflow::{OperationContext, OperationRunner};
