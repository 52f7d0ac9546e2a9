//! Housekeeping: rotate every operator's access token.

use tracing::{info, warn};

use crate::{
    ports::{IdentityProvider, Store},
    Result,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub failed: usize,
}

/// Refresh all operators; one operator's failure never aborts the batch.
pub async fn refresh_all(store: &dyn Store, idp: &dyn IdentityProvider) -> Result<RefreshReport> {
    let mut report = RefreshReport::default();

    for op in store.refreshable_operators().await? {
        let outcome = match idp.refresh(&op.refresh_token, &op.device_id).await {
            Ok((access, refresh)) if !access.is_empty() && !refresh.is_empty() => {
                store.update_tokens(op.user_id, &access, &refresh).await
            }
            Ok(_) => Err(crate::Error::AuthExchange(
                "refresh response lacks tokens".to_string(),
            )),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                report.refreshed += 1;
                info!("refreshed access token for tg_id {}", op.user_id.0);
            }
            Err(e) => {
                report.failed += 1;
                warn!("token refresh failed for tg_id {}: {e}", op.user_id.0);
            }
        }
    }

    Ok(report)
}
