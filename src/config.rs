use std::time::Duration;

use regex::Regex;

use crate::error::{AppError, AppResult};

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 要执行的命令（registration / verify / login / farm / complete_tasks / export_stats / clean_accounts_proxies）
    pub command: String,
    /// 账号列表 TOML 文件
    pub accounts_file: String,
    /// 账号存储文件（JSON）
    pub store_path: String,
    /// 结果输出目录
    pub results_dir: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 同时处理的账号数量（1 表示严格串行）
    pub max_concurrent_accounts: usize,
    /// 跳过已持有会话令牌的账号
    pub skip_logged_accounts: bool,
    /// 每轮 farm 前打乱账号顺序
    pub shuffle_accounts: bool,
    /// keepalive 间隔（秒）
    pub keepalive_interval_secs: u64,
    /// 两轮 farm 之间的停顿
    pub farm_cycle_pause: Duration,
    /// 代理模板，支持 {ID} 与 {COUNTRY} 占位符
    pub proxy_template: Option<String>,
    /// {COUNTRY} 可选的国家代码
    pub proxy_countries: Vec<String>,
    /// 单次 HTTP 请求超时
    pub request_timeout: Duration,
    /// 平台客户端对 5xx 的请求级重试次数
    pub request_retries: usize,
    /// 请求级重试间隔
    pub request_retry_delay: Duration,
    /// 两次 completeTasks 子任务之间的停顿
    pub task_delay: Duration,
    // --- 尝试次数与延迟 ---
    pub attempts: AttemptSettings,
    // --- 验证码服务 ---
    pub captcha: CaptchaSettings,
    // --- 邮箱 ---
    pub mailbox: MailboxSettings,
}

/// 各操作的尝试预算
#[derive(Clone, Debug)]
pub struct AttemptSettings {
    pub max_register_attempts: usize,
    pub max_verify_attempts: usize,
    pub max_login_attempts: usize,
    pub max_tasks_attempts: usize,
    pub max_stats_attempts: usize,
    pub max_keepalive_attempts: usize,
    pub max_app_id_attempts: usize,
    /// 出错后的等待时间
    pub error_delay: Duration,
}

/// 验证码服务配置
#[derive(Clone, Debug)]
pub struct CaptchaSettings {
    pub api_key: String,
    pub api_base_url: String,
    /// 子循环尝试次数
    pub max_attempts: usize,
    /// 子循环重试间隔
    pub retry_delay: Duration,
    /// 查询求解结果的最大次数
    pub max_poll_attempts: usize,
    /// 查询求解结果的间隔
    pub poll_interval: Duration,
    pub turnstile_site_url: String,
    pub turnstile_site_key: String,
}

/// 邮箱配置
#[derive(Clone, Debug)]
pub struct MailboxSettings {
    /// 扫描的文件夹
    pub folder: String,
    /// 等待确认邮件的硬超时
    pub confirmation_timeout: Duration,
    /// 按顺序匹配的链接/令牌正则
    pub link_patterns: Vec<String>,
    /// 注册前先验证邮箱是否可登录
    pub validate_before_use: bool,
    /// 转发邮箱（所有账号的确认邮件都转发到这里）
    pub redirect: Option<RedirectMailbox>,
    pub oauth_token_url: String,
    pub oauth_scope: String,
    /// IMAP 服务器（TLS）
    pub imap_host: String,
    pub imap_port: u16,
    /// 建立 IMAP 连接与认证的超时
    pub imap_connect_timeout: Duration,
}

/// 转发邮箱凭据
#[derive(Clone, Debug)]
pub struct RedirectMailbox {
    pub email: String,
    pub password: String,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: "farm".to_string(),
            accounts_file: "config/accounts.toml".to_string(),
            store_path: "data/accounts.json".to_string(),
            results_dir: "results".to_string(),
            verbose_logging: false,
            max_concurrent_accounts: 1,
            skip_logged_accounts: false,
            shuffle_accounts: true,
            keepalive_interval_secs: 120,
            farm_cycle_pause: Duration::from_secs(5),
            proxy_template: None,
            proxy_countries: Vec::new(),
            request_timeout: Duration::from_secs(30),
            request_retries: 2,
            request_retry_delay: Duration::from_secs(3),
            task_delay: Duration::from_secs(1),
            attempts: AttemptSettings::default(),
            captcha: CaptchaSettings::default(),
            mailbox: MailboxSettings::default(),
        }
    }
}

impl Default for AttemptSettings {
    fn default() -> Self {
        Self {
            max_register_attempts: 3,
            max_verify_attempts: 3,
            max_login_attempts: 3,
            max_tasks_attempts: 3,
            max_stats_attempts: 3,
            max_keepalive_attempts: 3,
            max_app_id_attempts: 3,
            error_delay: Duration::from_secs(5),
        }
    }
}

impl Default for CaptchaSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: "https://api.anti-captcha.com".to_string(),
            max_attempts: 5,
            retry_delay: Duration::from_secs(3),
            max_poll_attempts: 40,
            poll_interval: Duration::from_secs(3),
            turnstile_site_url: "https://dashboard.dawninternet.com/".to_string(),
            turnstile_site_key: "0x4AAAAAAA48wVDquA-98fyV".to_string(),
        }
    }
}

impl Default for MailboxSettings {
    fn default() -> Self {
        Self {
            folder: "Junk".to_string(),
            confirmation_timeout: Duration::from_secs(60),
            link_patterns: vec![
                r"https://www\.aeropres\.in/chromeapi/dawn/v1/userverify/verifyconfirm\?key=[^\s]+"
                    .to_string(),
                r"https?://webmail\.online/go\.php\?r=[^\s]+".to_string(),
                r"key=([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})".to_string(),
            ],
            validate_before_use: false,
            redirect: None,
            oauth_token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token"
                .to_string(),
            oauth_scope: "https://outlook.office.com/IMAP.AccessAsUser.All".to_string(),
            imap_host: "outlook.office365.com".to_string(),
            imap_port: 993,
            imap_connect_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        let attempts = default.attempts;
        let captcha = default.captcha;
        let mailbox = default.mailbox;
        Self {
            command: std::env::var("COMMAND").unwrap_or(default.command),
            accounts_file: std::env::var("ACCOUNTS_FILE").unwrap_or(default.accounts_file),
            store_path: std::env::var("STORE_PATH").unwrap_or(default.store_path),
            results_dir: std::env::var("RESULTS_DIR").unwrap_or(default.results_dir),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(default.verbose_logging),
            max_concurrent_accounts: env_parse("MAX_CONCURRENT_ACCOUNTS").unwrap_or(default.max_concurrent_accounts),
            skip_logged_accounts: env_parse("SKIP_LOGGED_ACCOUNTS").unwrap_or(default.skip_logged_accounts),
            shuffle_accounts: env_parse("SHUFFLE_ACCOUNTS").unwrap_or(default.shuffle_accounts),
            keepalive_interval_secs: env_parse("KEEPALIVE_INTERVAL").unwrap_or(default.keepalive_interval_secs),
            farm_cycle_pause: env_secs("FARM_CYCLE_PAUSE").unwrap_or(default.farm_cycle_pause),
            proxy_template: std::env::var("PROXY_URL").ok().filter(|v| !v.trim().is_empty()),
            proxy_countries: env_list("PROXY_COUNTRIES").unwrap_or(default.proxy_countries),
            request_timeout: env_secs("REQUEST_TIMEOUT").unwrap_or(default.request_timeout),
            request_retries: env_parse("REQUEST_RETRIES").unwrap_or(default.request_retries),
            request_retry_delay: env_secs("REQUEST_RETRY_DELAY").unwrap_or(default.request_retry_delay),
            task_delay: env_secs("TASK_DELAY").unwrap_or(default.task_delay),
            attempts: AttemptSettings {
                max_register_attempts: env_parse("MAX_REGISTER_ATTEMPTS").unwrap_or(attempts.max_register_attempts),
                max_verify_attempts: env_parse("MAX_VERIFY_ATTEMPTS").unwrap_or(attempts.max_verify_attempts),
                max_login_attempts: env_parse("MAX_LOGIN_ATTEMPTS").unwrap_or(attempts.max_login_attempts),
                max_tasks_attempts: env_parse("MAX_TASKS_ATTEMPTS").unwrap_or(attempts.max_tasks_attempts),
                max_stats_attempts: env_parse("MAX_STATS_ATTEMPTS").unwrap_or(attempts.max_stats_attempts),
                max_keepalive_attempts: env_parse("MAX_KEEPALIVE_ATTEMPTS").unwrap_or(attempts.max_keepalive_attempts),
                max_app_id_attempts: env_parse("MAX_APP_ID_ATTEMPTS").unwrap_or(attempts.max_app_id_attempts),
                error_delay: env_secs("ERROR_DELAY").unwrap_or(attempts.error_delay),
            },
            captcha: CaptchaSettings {
                api_key: std::env::var("ANTICAPTCHA_API_KEY").unwrap_or(captcha.api_key),
                api_base_url: std::env::var("ANTICAPTCHA_API_URL").unwrap_or(captcha.api_base_url),
                max_attempts: env_parse("CAPTCHA_MAX_ATTEMPTS").unwrap_or(captcha.max_attempts),
                retry_delay: env_secs("CAPTCHA_RETRY_DELAY").unwrap_or(captcha.retry_delay),
                max_poll_attempts: env_parse("CAPTCHA_MAX_POLL_ATTEMPTS").unwrap_or(captcha.max_poll_attempts),
                poll_interval: env_secs("CAPTCHA_POLL_INTERVAL").unwrap_or(captcha.poll_interval),
                turnstile_site_url: captcha.turnstile_site_url,
                turnstile_site_key: captcha.turnstile_site_key,
            },
            mailbox: MailboxSettings {
                folder: std::env::var("MAILBOX_FOLDER").unwrap_or(mailbox.folder),
                confirmation_timeout: env_secs("CONFIRMATION_TIMEOUT").unwrap_or(mailbox.confirmation_timeout),
                link_patterns: mailbox.link_patterns,
                validate_before_use: env_parse("MAILBOX_VALIDATE").unwrap_or(mailbox.validate_before_use),
                redirect: redirect_from_env(),
                oauth_token_url: mailbox.oauth_token_url,
                oauth_scope: mailbox.oauth_scope,
                imap_host: std::env::var("IMAP_HOST").unwrap_or(mailbox.imap_host),
                imap_port: env_parse("IMAP_PORT").unwrap_or(mailbox.imap_port),
                imap_connect_timeout: env_secs("IMAP_CONNECT_TIMEOUT").unwrap_or(mailbox.imap_connect_timeout),
            },
        }
    }

    /// 检查配置组合是否可用
    pub fn validate(&self) -> AppResult<()> {
        if self.max_concurrent_accounts == 0 {
            return Err(AppError::invalid_config("MAX_CONCURRENT_ACCOUNTS", "必须大于 0"));
        }

        let budgets = [
            ("MAX_REGISTER_ATTEMPTS", self.attempts.max_register_attempts),
            ("MAX_VERIFY_ATTEMPTS", self.attempts.max_verify_attempts),
            ("MAX_LOGIN_ATTEMPTS", self.attempts.max_login_attempts),
            ("MAX_TASKS_ATTEMPTS", self.attempts.max_tasks_attempts),
            ("MAX_STATS_ATTEMPTS", self.attempts.max_stats_attempts),
            ("MAX_KEEPALIVE_ATTEMPTS", self.attempts.max_keepalive_attempts),
            ("MAX_APP_ID_ATTEMPTS", self.attempts.max_app_id_attempts),
            ("CAPTCHA_MAX_ATTEMPTS", self.captcha.max_attempts),
        ];
        if let Some((name, _)) = budgets.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::invalid_config(*name, "尝试次数必须大于 0"));
        }

        if let Some(template) = &self.proxy_template {
            if template.contains("{COUNTRY}") && self.proxy_countries.is_empty() {
                return Err(AppError::invalid_config(
                    "PROXY_COUNTRIES",
                    "代理模板包含 {COUNTRY}，但未配置国家列表",
                ));
            }
        }

        for pattern in &self.mailbox.link_patterns {
            Regex::new(pattern)
                .map_err(|e| AppError::invalid_config("link_patterns", format!("{}: {}", pattern, e)))?;
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_secs)
}

fn env_list(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|v| {
        v.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    })
}

fn redirect_from_env() -> Option<RedirectMailbox> {
    let email = std::env::var("REDIRECT_EMAIL").ok().filter(|v| !v.is_empty())?;
    Some(RedirectMailbox {
        email,
        password: std::env::var("REDIRECT_PASSWORD").unwrap_or_default(),
        refresh_token: std::env::var("REDIRECT_REFRESH_TOKEN").ok(),
        client_id: std::env::var("REDIRECT_CLIENT_ID").ok(),
    })
}
