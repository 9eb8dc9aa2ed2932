//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和流程调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `app` - 应用主流程
//! - 管理应用生命周期（初始化、运行）
//! - 加载账号列表，装配存储、客户端与服务
//! - 控制并发数量（Semaphore）
//! - 输出全局统计信息
//!
//! ### `farm_loop` - farm 循环
//! - 周期性地为每个账号执行 farm 操作
//! - 移除被隔离的账号，工作集为空时退出
//!
//! ## 层次关系
//!
//! ```text
//! app / farm_loop (处理 Vec<AccountCredentials>)
//!     ↓
//! workflow::OperationRunner (处理单个账号的单个操作)
//!     ↓
//! services (能力层：captcha / confirmation / proxy / classifier / exporter)
//!     ↓
//! clients + infrastructure (平台 API、验证码服务、邮箱、账号存储)
//! ```

pub mod app;
pub mod farm_loop;

pub use app::{App, Command};
pub use farm_loop::{FarmLoop, FarmSummary};
