pub mod captcha_pipeline;
pub mod confirmation_retriever;
pub mod error_classifier;
pub mod proxy_assigner;
pub mod result_exporter;

pub use captcha_pipeline::CaptchaPipeline;
pub use confirmation_retriever::{
    extract_key, ConfirmationFailure, ConfirmationResult, ConfirmationRetriever, LinkCache,
};
pub use error_classifier::{describe_error, ErrorClassifier, ErrorKind, RetryAction};
pub use proxy_assigner::ProxyAssigner;
pub use result_exporter::{FileResultExporter, ResultExporter};
