pub mod account;
pub mod captcha;
pub mod loaders;
pub mod operation;

pub use account::{AccountCredentials, AccountPatch, AccountRecord, QuarantineReason};
pub use captcha::{CaptchaChallenge, SolveOutcome};
pub use loaders::{load_account_lists, AccountLists};
pub use operation::{
    FarmReport, Operation, OperationOutcome, OperationReport, OperationResult, ReferralPoint,
    RewardPoint, StatsResult, UserInfo,
};
