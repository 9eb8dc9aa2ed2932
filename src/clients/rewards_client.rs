//! 奖励平台 API 客户端
//!
//! 封装所有与平台接口相关的调用逻辑，通过组合 `HttpTransport` 发送请求
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ApiError, AppError, AppResult};
use crate::infrastructure::{HttpResponse, HttpTransport, ReqwestTransport, RequestSpec};
use crate::models::UserInfo;

const EXTENSION_API_URL: &str = "https://www.aeropres.in/chromeapi/dawn";
const DASHBOARD_API_URL: &str = "https://ext-api.dawninternet.com/chromeapi/dawn";
const USER_POINTS_URL: &str = "https://www.aeropres.in/api/atom/v1/userreferral/getpoint";
const VERIFY_CHECK_URL: &str =
    "https://verify.dawninternet.com/chromeapi/dawn/v1/userverify/verifycheck";

const EXTENSION_ID: &str = "fpdkjdnhkakefebpekbdhillbhonfjjp";
const EXTENSION_VERSION: &str = "1.1.4";

/// completeTasks 依次更新的资料字段
pub const SOCIAL_TASKS: [&str; 3] = ["telegramid", "discordid", "twitter_x_id"];

const COUNTRIES: &[&str] = &[
    "AL", "AD", "AT", "BY", "BE", "BA", "BG", "HR", "CZ", "DK", "EE", "FI", "FR", "DE", "GR",
    "HU", "IS", "IE", "IT", "LV", "LI", "LT", "LU", "MT", "MD", "MC", "ME", "NL", "MK", "NO",
    "PL", "PT", "RO", "SM", "RS", "SK", "SI", "ES", "SE", "CH", "UA", "GB",
];

const FIRST_NAMES: &[&str] = &[
    "James", "Olivia", "Liam", "Emma", "Noah", "Ava", "Lucas", "Mia", "Ethan", "Sophia",
    "Mason", "Isabella", "Leo", "Amelia", "Oscar", "Chloe", "Henry", "Grace", "Jack", "Ella",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Brown", "Taylor", "Wilson", "Davies", "Evans", "Thomas", "Roberts",
    "Walker", "Wright", "Hughes", "Green", "Hall", "Wood", "Clarke", "Turner", "Hill",
];

/// 平台接口能力
///
/// 每个方法要么返回结果，要么返回 `ApiError`（已区分平台业务错误与网络错误）
#[async_trait]
pub trait RewardsApi: Send + Sync {
    async fn get_app_id(&self) -> AppResult<String>;
    async fn get_puzzle(&self, app_id: &str) -> AppResult<String>;
    async fn get_puzzle_image(&self, puzzle_id: &str, app_id: &str) -> AppResult<String>;
    async fn register(
        &self,
        email: &str,
        password: &str,
        captcha_token: &str,
        app_id: &str,
    ) -> AppResult<()>;
    async fn verify(&self, key: &str, captcha_token: &str) -> AppResult<()>;
    async fn resend_verify_link(
        &self,
        email: &str,
        puzzle_id: &str,
        answer: &str,
        app_id: &str,
    ) -> AppResult<()>;
    /// 登录成功返回会话令牌
    async fn login(
        &self,
        email: &str,
        password: &str,
        puzzle_id: &str,
        answer: &str,
        app_id: &str,
    ) -> AppResult<String>;
    async fn keepalive(&self, email: &str, app_id: &str) -> AppResult<()>;
    async fn complete_tasks(&self, app_id: &str) -> AppResult<()>;
    async fn user_info(&self, app_id: &str) -> AppResult<UserInfo>;
    /// 跟随链接的所有重定向，返回最终地址
    async fn follow_link(&self, url: &str) -> AppResult<String>;
}

/// 按（代理，会话令牌）创建平台客户端
///
/// 客户端只在一次尝试内使用，尝试结束时随 drop 释放连接
pub trait RewardsApiFactory: Send + Sync {
    fn create(&self, proxy: Option<&str>, auth_token: Option<&str>)
        -> AppResult<Box<dyn RewardsApi>>;
}

/// 客户端的请求级设置
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub request_timeout: Duration,
    pub request_retries: usize,
    pub request_retry_delay: Duration,
    pub task_delay: Duration,
    pub referral_codes: Vec<String>,
}

impl ClientSettings {
    pub fn from_config(config: &Config, referral_codes: Vec<String>) -> Self {
        Self {
            request_timeout: config.request_timeout,
            request_retries: config.request_retries.max(1),
            request_retry_delay: config.request_retry_delay,
            task_delay: config.task_delay,
            referral_codes,
        }
    }
}

/// 基于 reqwest 的默认工厂
pub struct RewardsClientFactory {
    settings: ClientSettings,
}

impl RewardsClientFactory {
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }
}

impl RewardsApiFactory for RewardsClientFactory {
    fn create(
        &self,
        proxy: Option<&str>,
        auth_token: Option<&str>,
    ) -> AppResult<Box<dyn RewardsApi>> {
        let transport = ReqwestTransport::new(proxy, self.settings.request_timeout)?;
        Ok(Box::new(RewardsClient::new(
            Arc::new(transport),
            auth_token.map(str::to_string),
            self.settings.clone(),
        )))
    }
}

/// 平台客户端
pub struct RewardsClient {
    transport: Arc<dyn HttpTransport>,
    auth_token: Option<String>,
    settings: ClientSettings,
}

impl RewardsClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        auth_token: Option<String>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            transport,
            auth_token,
            settings,
        }
    }

    fn extension_headers(spec: RequestSpec) -> RequestSpec {
        spec.header("Accept", "*/*")
            .header("Origin", format!("chrome-extension://{}", EXTENSION_ID))
            .header("Accept-Language", "en-US,en;q=0.9")
    }

    fn authorized(&self, spec: RequestSpec) -> AppResult<RequestSpec> {
        let token = self.auth_token.as_deref().ok_or_else(|| {
            AppError::malformed(spec.endpoint(), "Auth token is required")
        })?;
        Ok(spec.bearer(token))
    }

    /// 发送请求并校验响应
    ///
    /// 5xx 与网络错误在客户端内重试；403 与平台业务错误直接返回
    async fn send_request(&self, spec: RequestSpec, verify: bool) -> AppResult<Value> {
        let endpoint = spec.endpoint();
        let retries = self.settings.request_retries.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self.transport.send(spec.clone()).await {
                Ok(response) => verify_response(&endpoint, &response, verify),
                Err(e) => Err(e),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempt < retries && is_request_retryable(&e) => {
                    debug!(
                        "🔁 请求 {} 失败 ({}/{}): {}",
                        endpoint, attempt, retries, e
                    );
                    tokio::time::sleep(self.settings.request_retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_request_retryable(err: &AppError) -> bool {
    matches!(
        err,
        AppError::Api(ApiError::Server { .. }) | AppError::Api(ApiError::Transport { .. })
    )
}

/// 将 HTTP 响应转换为结果或分类后的错误
pub fn verify_response(endpoint: &str, response: &HttpResponse, verify: bool) -> AppResult<Value> {
    let json = response.json();

    if !verify {
        return Ok(json.unwrap_or(Value::Null));
    }

    if response.status == 403 {
        if response.body.contains("403 Forbidden") {
            return Err(ApiError::ProxyForbidden {
                endpoint: endpoint.to_string(),
                status: response.status,
            }
            .into());
        }
        return Err(ApiError::SessionRateLimited {
            endpoint: endpoint.to_string(),
        }
        .into());
    }

    if matches!(response.status, 500 | 502 | 503 | 504) {
        return Err(ApiError::Server {
            endpoint: endpoint.to_string(),
            status: response.status,
        }
        .into());
    }

    match json {
        Some(value) => {
            let failed = value.get("status") == Some(&Value::Bool(false))
                || value.get("success") == Some(&Value::Bool(false));
            let has_message = value.get("message").and_then(Value::as_str).is_some();

            if failed || (response.status >= 400 && has_message) {
                let message = value
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| value.to_string());
                return Err(AppError::remote(endpoint, message));
            }
            if response.status >= 400 {
                return Err(AppError::transport(
                    endpoint,
                    format!("HTTP {}: {}", response.status, value),
                ));
            }
            Ok(value)
        }
        None if response.body.trim().is_empty() => {
            Err(AppError::malformed(endpoint, "Received empty response"))
        }
        None if response.status >= 400 => Err(AppError::transport(
            endpoint,
            format!("HTTP {}", response.status),
        )),
        None => Ok(Value::String(response.body.clone())),
    }
}

fn field_str(value: &Value, pointer: &str, endpoint: &str) -> AppResult<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            AppError::malformed(endpoint, format!("响应缺少字段 {}: {}", pointer, value))
        })
}

#[async_trait]
impl RewardsApi for RewardsClient {
    async fn get_app_id(&self) -> AppResult<String> {
        let spec = Self::extension_headers(RequestSpec::get(format!(
            "{}/v1/appid/getappid",
            DASHBOARD_API_URL
        )))
        .query("app_v", EXTENSION_VERSION);
        let endpoint = spec.endpoint();

        let response = self.send_request(spec, true).await?;
        field_str(&response, "/data/appid", &endpoint)
    }

    async fn get_puzzle(&self, app_id: &str) -> AppResult<String> {
        let spec = Self::extension_headers(RequestSpec::get(format!(
            "{}/v1/puzzle/get-puzzle",
            DASHBOARD_API_URL
        )))
        .query("appid", app_id);
        let endpoint = spec.endpoint();

        let response = self.send_request(spec, true).await?;
        field_str(&response, "/puzzle_id", &endpoint)
    }

    async fn get_puzzle_image(&self, puzzle_id: &str, app_id: &str) -> AppResult<String> {
        let spec = Self::extension_headers(RequestSpec::get(format!(
            "{}/v1/puzzle/get-puzzle-image",
            DASHBOARD_API_URL
        )))
        .query("puzzle_id", puzzle_id)
        .query("appid", app_id);
        let endpoint = spec.endpoint();

        let response = self.send_request(spec, true).await?;
        field_str(&response, "/imgBase64", &endpoint)
    }

    async fn register(
        &self,
        email: &str,
        password: &str,
        captcha_token: &str,
        app_id: &str,
    ) -> AppResult<()> {
        let payload = {
            let mut rng = rand::thread_rng();
            json!({
                "firstname": FIRST_NAMES.choose(&mut rng).copied().unwrap_or("John"),
                "lastname": LAST_NAMES.choose(&mut rng).copied().unwrap_or("Smith"),
                "email": email,
                "mobile": "",
                "country": COUNTRIES.choose(&mut rng).copied().unwrap_or("GB"),
                "password": password,
                "referralCode": self.settings.referral_codes.choose(&mut rng).cloned().unwrap_or_default(),
                "token": captcha_token,
                "isMarketing": false,
                "browserName": "chrome",
            })
        };

        let spec = RequestSpec::post(
            format!("{}/v2/dashboard/user/validate-register", DASHBOARD_API_URL),
            payload,
        )
        .query("appid", app_id)
        .header("Accept", "application/json, text/plain, */*")
        .header("Origin", "https://dashboard.dawninternet.com")
        .header("Referer", "https://dashboard.dawninternet.com/");

        self.send_request(spec, true).await?;
        Ok(())
    }

    async fn verify(&self, key: &str, captcha_token: &str) -> AppResult<()> {
        let spec = RequestSpec::post(VERIFY_CHECK_URL, json!({ "token": captcha_token }))
            .query("key", key)
            .header("Accept", "*/*")
            .header("Origin", "https://verify.dawninternet.com");

        self.send_request(spec, true).await?;
        Ok(())
    }

    async fn resend_verify_link(
        &self,
        email: &str,
        puzzle_id: &str,
        answer: &str,
        app_id: &str,
    ) -> AppResult<()> {
        let spec = Self::extension_headers(RequestSpec::post(
            format!("{}/v1/user/resendverifylink/v2", EXTENSION_API_URL),
            json!({
                "username": email,
                "puzzle_id": puzzle_id,
                "ans": answer,
            }),
        ))
        .query("appid", app_id);

        self.send_request(spec, true).await?;
        Ok(())
    }

    async fn login(
        &self,
        email: &str,
        password: &str,
        puzzle_id: &str,
        answer: &str,
        app_id: &str,
    ) -> AppResult<String> {
        let spec = Self::extension_headers(RequestSpec::post(
            format!("{}/v1/user/login/v2", EXTENSION_API_URL),
            json!({
                "username": email,
                "password": password,
                "logindata": {
                    "_v": { "version": EXTENSION_VERSION },
                    "datetime": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                },
                "puzzle_id": puzzle_id,
                "ans": answer,
                "appid": app_id,
            }),
        ))
        .query("appid", app_id);
        let endpoint = spec.endpoint();

        let response = self.send_request(spec, true).await?;
        field_str(&response, "/data/token", &endpoint)
    }

    async fn keepalive(&self, email: &str, app_id: &str) -> AppResult<()> {
        let spec = self.authorized(Self::extension_headers(RequestSpec::post(
            format!("{}/v1/userreward/keepalive", EXTENSION_API_URL),
            json!({
                "username": email,
                "extensionid": EXTENSION_ID,
                "numberoftabs": 0,
                "_v": EXTENSION_VERSION,
            }),
        )))?
        .query("appid", app_id);

        // keepalive 不校验响应体
        self.send_request(spec, false).await?;
        Ok(())
    }

    async fn complete_tasks(&self, app_id: &str) -> AppResult<()> {
        for task in SOCIAL_TASKS {
            let spec = self
                .authorized(Self::extension_headers(RequestSpec::post(
                    format!("{}/v1/profile/update", EXTENSION_API_URL),
                    json!({ task: task }),
                )))?
                .query("appid", app_id);

            self.send_request(spec, true).await?;
            tokio::time::sleep(self.settings.task_delay).await;
        }
        Ok(())
    }

    async fn user_info(&self, app_id: &str) -> AppResult<UserInfo> {
        let spec = self
            .authorized(Self::extension_headers(RequestSpec::get(USER_POINTS_URL)))?
            .query("appid", app_id);
        let endpoint = spec.endpoint();

        let response = self.send_request(spec, true).await?;
        let data = response.get("data").cloned().unwrap_or(Value::Null);
        serde_json::from_value(data).map_err(|e| {
            warn!("⚠️ userInfo 响应无法解析: {}", e);
            AppError::malformed(endpoint, e.to_string())
        })
    }

    async fn follow_link(&self, url: &str) -> AppResult<String> {
        let spec = RequestSpec::get(url);
        let response = self.transport.send(spec).await?;
        Ok(response.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedTransport {
        responses: Mutex<VecDeque<HttpResponse>>,
        requests: Mutex<Vec<RequestSpec>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<HttpResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<RequestSpec> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: RequestSpec) -> AppResult<HttpResponse> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| AppError::transport(request.endpoint(), "no scripted response"))
        }
    }

    fn settings() -> ClientSettings {
        ClientSettings {
            request_timeout: Duration::from_secs(5),
            request_retries: 2,
            request_retry_delay: Duration::from_millis(0),
            task_delay: Duration::from_millis(0),
            referral_codes: vec!["ref1".to_string()],
        }
    }

    #[test]
    fn test_verify_response_forbidden_variants() {
        let html = HttpResponse::new(403, "<h1>403 Forbidden</h1>", "https://x/a");
        let err = verify_response("/a", &html, true).unwrap_err();
        assert!(matches!(err, AppError::Api(ApiError::ProxyForbidden { .. })));

        let cf = HttpResponse::new(403, "cf challenge", "https://x/a");
        let err = verify_response("/a", &cf, true).unwrap_err();
        assert!(matches!(err, AppError::Api(ApiError::SessionRateLimited { .. })));
    }

    #[test]
    fn test_verify_response_remote_message() {
        let body = r#"{"success":false,"message":"user not found"}"#;
        let err = verify_response("/login", &HttpResponse::new(200, body, "https://x"), true)
            .unwrap_err();
        assert_eq!(err.remote_message(), Some("user not found"));

        let body = r#"{"status":false}"#;
        let err = verify_response("/login", &HttpResponse::new(200, body, "https://x"), true)
            .unwrap_err();
        assert_eq!(err.remote_message(), Some(r#"{"status":false}"#));
    }

    #[test]
    fn test_unverified_response_passes_through() {
        let response = HttpResponse::new(500, "oops", "https://x");
        assert_eq!(verify_response("/k", &response, false).unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_server_error_retried_inside_client() {
        let transport = ScriptedTransport::new(vec![
            HttpResponse::new(502, "bad gateway", "https://x"),
            HttpResponse::new(200, r#"{"data":{"appid":"app-42"}}"#, "https://x"),
        ]);
        let client = RewardsClient::new(transport.clone(), None, settings());

        assert_eq!(client.get_app_id().await.unwrap(), "app-42");
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_remote_error_not_retried_inside_client() {
        let transport = ScriptedTransport::new(vec![HttpResponse::new(
            200,
            r#"{"status":false,"message":"Incorrect answer. Try again!"}"#,
            "https://x",
        )]);
        let client = RewardsClient::new(transport.clone(), None, settings());

        let err = client
            .login("a@hotmail.com", "pw", "pz", "abcdef", "app")
            .await
            .unwrap_err();
        assert_eq!(err.remote_message(), Some("Incorrect answer. Try again!"));
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_tasks_updates_three_fields() {
        let ok = || HttpResponse::new(200, r#"{"success":true}"#, "https://x");
        let transport = ScriptedTransport::new(vec![ok(), ok(), ok()]);
        let client = RewardsClient::new(transport.clone(), Some("tok".into()), settings());

        client.complete_tasks("app").await.unwrap();

        let bodies: Vec<Value> = transport.sent().into_iter().filter_map(|r| r.json).collect();
        assert_eq!(
            bodies,
            vec![
                json!({"telegramid": "telegramid"}),
                json!({"discordid": "discordid"}),
                json!({"twitter_x_id": "twitter_x_id"}),
            ]
        );
    }

    #[tokio::test]
    async fn test_authenticated_call_requires_token() {
        let transport = ScriptedTransport::new(vec![]);
        let client = RewardsClient::new(transport.clone(), None, settings());
        assert!(client.keepalive("a@hotmail.com", "app").await.is_err());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    #[ignore] // 需要网络：cargo test -- --ignored
    async fn test_live_get_app_id() {
        let factory = RewardsClientFactory::new(settings());
        let client = factory.create(None, None).unwrap();
        let app_id = client.get_app_id().await.unwrap();
        assert!(!app_id.is_empty());
    }
}
