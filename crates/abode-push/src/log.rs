use async_trait::async_trait;
use tracing::info;

use abode_engine::{Notification, PushDeliverer, TokenOutcome, TokenResult};

/// Accepts every token and only writes a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPushDeliverer;

#[async_trait]
impl PushDeliverer for LogPushDeliverer {
    async fn send(&self, tokens: &[String], notification: &Notification) -> anyhow::Result<Vec<TokenResult>> {
        info!(
            "[push] {} device(s): {} | {} {:?}",
            tokens.len(),
            notification.title,
            notification.body,
            notification.data
        );
        Ok(tokens
            .iter()
            .map(|token| TokenResult {
                token: token.clone(),
                outcome: TokenOutcome::Delivered,
            })
            .collect())
    }
}
