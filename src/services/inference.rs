//! 推理服务客户端
//!
//! 调用本地 Ollama 的 `/api/generate` 接口获取模型原始输出。
//! 网络错误、超时、非 2xx 响应以及无法解码的响应体都会按指数退避重试；
//! 内容能否解析不属于这里的职责。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{InferenceConfig, RunConfig};
use crate::error::{AppError, Result};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// 发送提示词并返回模型生成的原始文本
    async fn infer(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    format: &'static str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    num_predict: u32,
    num_ctx: u32,
}

impl From<&InferenceConfig> for GenerateOptions {
    fn from(config: &InferenceConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            num_predict: config.num_predict,
            num_ctx: config.num_ctx,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Ollama 文本生成客户端
pub struct OllamaInferenceClient {
    client: reqwest::Client,
    endpoint: String,
    model_name: String,
    config: InferenceConfig,
}

impl OllamaInferenceClient {
    pub fn new(run_config: &RunConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(run_config.inference.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("无法创建 HTTP 客户端: {e}")))?;

        Ok(Self {
            client,
            endpoint: run_config.generate_endpoint(),
            model_name: run_config.model_name.clone(),
            config: run_config.inference.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 第 `attempt` 次失败后的等待时间
    fn backoff_for(&self, attempt: u32) -> Duration {
        backoff_delay(&self.config, attempt)
    }

    /// Make a single request without retry.
    async fn generate_once(&self, prompt: &str) -> std::result::Result<String, String> {
        let request = GenerateRequest {
            model: &self.model_name,
            prompt,
            format: "json",
            stream: false,
            options: GenerateOptions::from(&self.config),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status.as_u16(), body.trim()));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| format!("undecodable response body: {e}"))?;

        if let Some(error) = body.error {
            return Err(format!("ollama error: {error}"));
        }
        body.response
            .ok_or_else(|| "response body has no 'response' field".to_string())
    }
}

#[async_trait]
impl InferenceClient for OllamaInferenceClient {
    async fn infer(&self, prompt: &str) -> Result<String> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.generate_once(prompt).await {
                Ok(text) => {
                    debug!(attempt, chars = text.len(), "Inference succeeded");
                    return Ok(text);
                }
                Err(reason) if attempt < max_attempts => {
                    let backoff = self.backoff_for(attempt);
                    warn!(
                        error = %reason,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "Inference request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(reason) => {
                    return Err(AppError::Inference {
                        reason,
                        attempts: attempt,
                    });
                }
            }
        }
    }
}

/// 指数退避：`retry_backoff_ms * 2^(attempt-1)`，不超过 `max_backoff_ms`
pub fn backoff_delay(config: &InferenceConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let millis = config
        .retry_backoff_ms
        .saturating_mul(1u64 << exponent)
        .min(config.max_backoff_ms);
    Duration::from_millis(millis)
}
