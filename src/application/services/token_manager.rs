//! Shared bearer-token cache with proactive renewal.
//!
//! One [`TokenManager`] is created per process and shared through `Arc` by
//! every remote caller. A single async mutex guards check-and-refresh, so any
//! number of concurrent callers inside the refresh window trigger exactly one
//! call to the token source; late arrivals wait on the lock and then see the
//! credential the first caller stored.

use crate::common::cancellation::CancellationSignal;
use crate::common::error::DeployError;
use crate::common::result::DeployResult;
use crate::domain::entities::Credential;
use crate::infrastructure::platform::TokenSource;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Refresh when the token expires within this margin.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60);

pub struct TokenManager {
    source: Arc<dyn TokenSource>,
    credential: Mutex<Option<Credential>>,
    safety_margin: Duration,
    refresh_count: AtomicU64,
}

impl TokenManager {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            credential: Mutex::new(None),
            safety_margin: DEFAULT_SAFETY_MARGIN,
            refresh_count: AtomicU64::new(0),
        }
    }

    pub fn with_safety_margin(mut self, safety_margin: Duration) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    /// Identity the tokens are issued to, when the source knows it.
    pub fn identity(&self) -> Option<String> {
        self.source.identity()
    }

    /// Number of successful refreshes so far.
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    /// Current access token, refreshed first when it is within the safety margin of expiry.
    pub async fn get_token(&self) -> DeployResult<String> {
        let mut guard = self.credential.lock().await;

        if let Some(credential) = guard.as_ref() {
            if !credential.expires_within(self.safety_margin, Utc::now()) {
                return Ok(credential.access_token().to_string());
            }
            debug!(expires_at = %credential.expires_at(), "access token inside refresh window");
        }

        let fresh = self.refresh_locked().await?;
        let token = fresh.access_token().to_string();
        *guard = Some(fresh);
        Ok(token)
    }

    /// Refresh unconditionally. The previous credential stays in place on failure.
    pub async fn force_refresh(&self) -> DeployResult<()> {
        let mut guard = self.credential.lock().await;
        let fresh = self.refresh_locked().await?;
        *guard = Some(fresh);
        Ok(())
    }

    async fn refresh_locked(&self) -> DeployResult<Credential> {
        let credential = self.source.fetch_token().await.map_err(|e| match e {
            DeployError::Authentication { .. } | DeployError::MissingCredential { .. } => e,
            other => DeployError::authentication_error_with_source("Token refresh failed", other),
        })?;

        let count = self.refresh_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!(expires_at = %credential.expires_at(), refresh_count = count, "access token refreshed");
        Ok(credential)
    }

    /// Keep the credential fresh in the background until `cancel` fires.
    ///
    /// Failures are logged and retried on the next tick; they never end the task.
    pub fn spawn_background_refresh(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationSignal,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = manager.get_token().await {
                            warn!(error = %e, "background token refresh failed");
                        }
                    }
                }
            }
            debug!("background token refresh stopped");
        })
    }
}
