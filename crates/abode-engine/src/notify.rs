use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use abode_types::UserId;
use abode_types::models::PushToken;

use crate::error::{EngineError, Result, blocking};
use crate::ports::{Notification, PushDeliverer, PushTokenStore, TokenOutcome};

/// What happened to one notification fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub failed: usize,
    pub pruned: usize,
}

/// Sends push notifications to every device a user registered.
#[derive(Clone)]
pub struct Notifier {
    tokens: Arc<dyn PushTokenStore>,
    push: Arc<dyn PushDeliverer>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(tokens: Arc<dyn PushTokenStore>, push: Arc<dyn PushDeliverer>, timeout: Duration) -> Self {
        Self {
            tokens,
            push,
            timeout,
        }
    }

    /// Synchronous lookup; callers already on the blocking pool use this.
    pub(crate) fn lookup_tokens(&self, user_id: &UserId) -> Result<Vec<PushToken>> {
        self.tokens
            .tokens_for(user_id)
            .map_err(|e| EngineError::dependency("push token lookup", e))
    }

    pub async fn tokens_for(&self, user_id: &UserId) -> Result<Vec<PushToken>> {
        let this = self.clone();
        let user_id = *user_id;
        blocking(move || this.lookup_tokens(&user_id)).await
    }

    pub async fn notify(&self, user_id: &UserId, notification: &Notification) -> Result<FanOut> {
        let tokens = self.tokens_for(user_id).await?;
        self.send_to_tokens(&tokens, notification).await
    }

    /// Follow-up notifications never fail the operation that triggered them.
    pub async fn notify_best_effort(&self, user_id: &UserId, notification: &Notification) {
        match self.notify(user_id, notification).await {
            Ok(fan_out) => debug!(
                "Notified {} ({} delivered, {} failed)",
                user_id, fan_out.delivered, fan_out.failed
            ),
            Err(e) => warn!("Notification to {} dropped: {}", user_id, e),
        }
    }

    /// One provider call for all tokens, bounded by the configured timeout.
    /// Zero tokens is a successful no-op.
    pub async fn send_to_tokens(&self, tokens: &[PushToken], notification: &Notification) -> Result<FanOut> {
        if tokens.is_empty() {
            return Ok(FanOut::default());
        }

        let raw: Vec<String> = tokens.iter().map(|t| t.token.clone()).collect();
        let results = tokio::time::timeout(self.timeout, self.push.send(&raw, notification))
            .await
            .map_err(|_| {
                EngineError::DependencyUnavailable(format!(
                    "push provider timed out after {:?}",
                    self.timeout
                ))
            })?
            .map_err(|e| EngineError::dependency("push provider", e))?;

        let mut fan_out = FanOut::default();
        let mut dead = Vec::new();
        for result in &results {
            if result.outcome.is_dead_token() {
                if let Some(owner) = tokens.iter().find(|t| t.token == result.token) {
                    dead.push(owner.clone());
                }
            }
            match result.outcome {
                TokenOutcome::Delivered => fan_out.delivered += 1,
                TokenOutcome::Failed { .. } => fan_out.failed += 1,
            }
        }

        if !dead.is_empty() {
            fan_out.pruned = self.prune(dead).await;
        }
        Ok(fan_out)
    }

    async fn prune(&self, dead: Vec<PushToken>) -> usize {
        let store = self.tokens.clone();
        let pruned = blocking(move || {
            let mut pruned = 0;
            for owner in &dead {
                match store.remove(&owner.user_id, &owner.token) {
                    Ok(true) => {
                        info!("Pruned dead push token for {}", owner.user_id);
                        pruned += 1;
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Failed to prune push token for {}: {}", owner.user_id, e),
                }
            }
            Ok(pruned)
        })
        .await;

        pruned.unwrap_or_else(|e| {
            warn!("Push token pruning aborted: {}", e);
            0
        })
    }
}
