//! 代理传输层
//!
//! 后端不直接持有 HTTP 客户端，而是通过 Transport 收发 JSON；ProxyClient 用 reqwest 实现，
//! 测试中替换为脚本化的假实现。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::LlmError;

/// JSON 传输：path 为相对代理根地址的子路径（如 `/knowledge`、`/agent/threads`）
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(&self, path: &str, body: Value) -> Result<Value, LlmError>;

    async fn get_json(&self, path: &str) -> Result<Value, LlmError>;
}

/// reqwest 实现：base_url + path，非 2xx 转 Provider 错误，非 JSON 转 Parse 错误
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: reqwest::Client,
    base_url: String,
}

impl ProxyClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| LlmError::Configuration(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read(response: reqwest::Response) -> Result<Value, LlmError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| error_message(&v))
                .unwrap_or_else(|| status.to_string());
            return Err(LlmError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| LlmError::Parse(e.to_string()))
    }
}

#[async_trait]
impl Transport for ProxyClient {
    async fn post_json(&self, path: &str, body: Value) -> Result<Value, LlmError> {
        tracing::debug!(path = %path, "proxy POST");
        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        Self::read(response).await
    }

    async fn get_json(&self, path: &str) -> Result<Value, LlmError> {
        tracing::debug!(path = %path, "proxy GET");
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        Self::read(response).await
    }
}

/// 从错误响应体中提取消息：`{"error": "..."}` 或 `{"error": {"message": "..."}}`
pub fn error_message(body: &Value) -> Option<String> {
    match body.get("error")? {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(String::from),
        _ => None,
    }
}
