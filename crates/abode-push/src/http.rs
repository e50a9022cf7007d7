use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use abode_engine::{Notification, PushDeliverer, TokenOutcome, TokenResult};

/// Talks to a push relay that fans one notification out to many device tokens.
///
/// Request: `POST {endpoint}` with `{"tokens": [...], "notification": {...}}`.
/// Response: `{"results": [{"token", "success", "error_code"?}]}`, one entry per token.
pub struct HttpPushDeliverer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    tokens: &'a [String],
    notification: &'a Notification,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    results: Vec<RelayResult>,
}

#[derive(Debug, Deserialize)]
struct RelayResult {
    token: String,
    success: bool,
    #[serde(default)]
    error_code: Option<String>,
}

impl HttpPushDeliverer {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building push HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl PushDeliverer for HttpPushDeliverer {
    async fn send(&self, tokens: &[String], notification: &Notification) -> Result<Vec<TokenResult>> {
        let mut req = self.client.post(&self.endpoint).json(&SendRequest {
            tokens,
            notification,
        });
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.context("push relay unreachable")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("push relay returned {}: {}", status, body);
        }

        let body = resp.text().await.context("reading push relay response")?;
        let results = parse_results(tokens, &body)?;
        debug!("Push relay accepted batch of {}", tokens.len());
        Ok(results)
    }
}

/// Maps the relay's answer back onto the tokens that were sent. A token the
/// relay did not mention is reported as failed with code `MISSING`.
fn parse_results(sent: &[String], body: &str) -> Result<Vec<TokenResult>> {
    let parsed: SendResponse = serde_json::from_str(body).context("malformed push relay response")?;

    let results = sent
        .iter()
        .map(|token| {
            let outcome = match parsed.results.iter().find(|r| r.token == *token) {
                Some(r) if r.success => TokenOutcome::Delivered,
                Some(r) => TokenOutcome::Failed {
                    code: r.error_code.clone().unwrap_or_else(|| "UNKNOWN".into()),
                },
                None => {
                    warn!("Push relay omitted a token from its response");
                    TokenOutcome::Failed {
                        code: "MISSING".into(),
                    }
                }
            };
            TokenResult {
                token: token.clone(),
                outcome,
            }
        })
        .collect();

    Ok(results)
}
