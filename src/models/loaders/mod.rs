pub mod toml_loader;

pub use toml_loader::{load_account_lists, parse_account_lists, AccountLists};
