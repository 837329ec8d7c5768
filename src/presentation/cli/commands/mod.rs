pub mod deploy;
pub mod promote;
pub mod rollback;
pub mod status;
pub mod validate;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::application::services::TokenManager;
use crate::common::cancellation::CancellationSignal;

const TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Await `fut` while `tokens` is kept fresh by a background task.
pub(crate) async fn with_token_refresh<F, T>(tokens: &Arc<TokenManager>, fut: F) -> T
where
    F: Future<Output = T>,
{
    let stop = CancellationSignal::new();
    let refresher = tokens.spawn_background_refresh(TOKEN_REFRESH_INTERVAL, stop.clone());
    let output = fut.await;
    stop.cancel();
    if let Err(e) = refresher.await {
        debug!(error = %e, "token refresh task ended abnormally");
    }
    output
}
