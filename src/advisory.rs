// src/advisory.rs
use async_trait::async_trait;
use log::{error, info};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;

/// Seam for the external text-generation service. The HTTP engine talks to
/// the configured model endpoint; the fallback keeps the advisory feature
/// answering (degraded) when that endpoint is down.
#[async_trait]
pub trait AdvisoryEngine: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ApiError>;
}

#[derive(Deserialize)]
struct AdvisoryResponse {
    message: String,
}

pub struct HttpAdvisory {
    client: Client,
    endpoint: String,
}

impl HttpAdvisory {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl AdvisoryEngine for HttpAdvisory {
    async fn generate(&self, prompt: &str) -> Result<String, ApiError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "prompt": prompt }))
            .send()
            .await
            .map_err(|e| ApiError::Advisory(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ApiError::Advisory(format!(
                "model endpoint returned HTTP {}",
                response.status()
            )));
        }

        let body: AdvisoryResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Advisory(e.to_string()))?;
        info!("advisory: model endpoint answered ({} bytes)", body.message.len());
        Ok(body.message)
    }
}

/// Canned responder. Deterministic for a given message so the degraded mode
/// is testable.
#[derive(Default)]
pub struct FallbackAdvisory;

impl FallbackAdvisory {
    pub fn new() -> Self {
        Self
    }

    pub fn respond(message: &str) -> String {
        let lower = message.to_lowercase();
        if lower.contains("portfolio") || lower.contains("holding") {
            "I'm currently unable to reach the analysis service, but your portfolio summary is available on the Portfolio page. As a rule of thumb, review positions that have drifted far from their target allocation.".to_string()
        } else if lower.contains("buy") || lower.contains("sell") {
            "I can't fetch live analysis right now. Before trading, check the stock's recent performance in your watchlist and make sure the position size fits your available balance.".to_string()
        } else {
            "The analysis service is temporarily unavailable. Please try again in a little while; your portfolio, balance and watchlist are all up to date in the meantime.".to_string()
        }
    }
}

#[async_trait]
impl AdvisoryEngine for FallbackAdvisory {
    async fn generate(&self, prompt: &str) -> Result<String, ApiError> {
        Ok(Self::respond(prompt))
    }
}

/// Run the primary engine and degrade to the canned responder on any failure.
pub async fn generate_with_fallback(
    engine: &dyn AdvisoryEngine,
    prompt: &str,
    user_message: &str,
) -> String {
    match engine.generate(prompt).await {
        Ok(text) => text,
        Err(e) => {
            error!("advisory engine failed, serving fallback: {}", e);
            FallbackAdvisory::respond(user_message)
        }
    }
}
