//! HTTP 传输 - 基础设施层
//!
//! 只暴露"发送一个请求"的能力，不认识任何平台接口

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{AppError, AppResult};

/// 浏览器 User-Agent
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// 一次请求的完整描述
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub json: Option<JsonValue>,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            json: None,
        }
    }

    pub fn post(url: impl Into<String>, body: JsonValue) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            json: Some(body),
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    /// 日志与错误中使用的接口路径
    pub fn endpoint(&self) -> String {
        match reqwest::Url::parse(&self.url) {
            Ok(url) => url.path().to_string(),
            Err(_) => self.url.clone(),
        }
    }
}

/// 原始响应
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// 跟随重定向之后的最终地址
    pub url: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            url: url.into(),
        }
    }

    /// 以 JSON 解析响应体，非 JSON 返回 None
    pub fn json(&self) -> Option<JsonValue> {
        serde_json::from_str(&self.body).ok()
    }
}

/// HTTP 传输能力
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// 发送请求，只在网络层失败时返回错误；任何 HTTP 状态码都作为响应返回
    async fn send(&self, request: RequestSpec) -> AppResult<HttpResponse>;
}

/// 基于 reqwest 的传输实现
///
/// 每个实例绑定一个代理，连接池随实例释放
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(proxy: Option<&str>, timeout: Duration) -> AppResult<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10));

        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| AppError::transport("proxy", format!("Proxy failed: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: RequestSpec) -> AppResult<HttpResponse> {
        debug!("➡️ {:?} {}", request.method, request.url);

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response.text().await?;

        debug!("⬅️ HTTP {} {} ({} 字节)", status, url, body.len());

        Ok(HttpResponse { status, body, url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_builder() {
        let spec = RequestSpec::post("https://ext-api.dawninternet.com/chromeapi/dawn/v1/user/login/v2", json!({"a": 1}))
            .query("appid", "app-1")
            .bearer("tok");

        assert_eq!(spec.method, HttpMethod::Post);
        assert_eq!(spec.endpoint(), "/chromeapi/dawn/v1/user/login/v2");
        assert_eq!(spec.query, vec![("appid".to_string(), "app-1".to_string())]);
        assert_eq!(
            spec.headers,
            vec![("Authorization".to_string(), "Bearer tok".to_string())]
        );
    }

    #[test]
    fn test_response_json() {
        let ok = HttpResponse::new(200, r#"{"status":true}"#, "https://x");
        assert_eq!(ok.json(), Some(json!({"status": true})));
        let html = HttpResponse::new(403, "<html>403 Forbidden</html>", "https://x");
        assert_eq!(html.json(), None);
    }
}
