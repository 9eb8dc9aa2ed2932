pub mod operation_ctx;
pub mod operation_runner;

pub use operation_ctx::OperationContext;
pub use operation_runner::OperationRunner;
