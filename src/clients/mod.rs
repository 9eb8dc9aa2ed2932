pub mod captcha_client;
pub mod imap_client;
pub mod mailbox;
pub mod rewards_client;

pub use captcha_client::{AntiCaptchaClient, CaptchaSolver};
pub use imap_client::ImapConnector;
pub use mailbox::{MailboxConnector, MailboxSession, OAuthTokenRefresher, RawMessage, SearchQuery};
pub use rewards_client::{
    ClientSettings, RewardsApi, RewardsApiFactory, RewardsClient, RewardsClientFactory,
};
