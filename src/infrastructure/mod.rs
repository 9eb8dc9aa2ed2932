pub mod account_store;
pub mod http_client;

pub use account_store::{AccountStore, JsonFileAccountStore, MemoryAccountStore};
pub use http_client::{HttpMethod, HttpResponse, HttpTransport, ReqwestTransport, RequestSpec};
