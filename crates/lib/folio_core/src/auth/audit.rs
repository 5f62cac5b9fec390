//! Security event recording.

use std::sync::Arc;

use tracing::{info, warn};

use crate::models::auth::AuthEvent;
use crate::repository::AuditLog;

/// Persists events through an [`AuditLog`] and mirrors them to the `audit`
/// tracing target. Persistence failures are logged, never surfaced.
#[derive(Clone)]
pub struct Auditor {
    log: Arc<dyn AuditLog>,
}

impl Auditor {
    pub fn new(log: Arc<dyn AuditLog>) -> Self {
        Self { log }
    }

    pub async fn record(&self, event: AuthEvent) {
        let user_id = event.user_id.map(|id| id.to_string()).unwrap_or_default();
        let detail = event.detail.as_deref().unwrap_or("");
        if event.success {
            info!(target: "audit", kind = event.kind.as_str(), user_id = %user_id, detail, "auth event");
        } else {
            warn!(target: "audit", kind = event.kind.as_str(), user_id = %user_id, detail, "auth event failed");
        }
        if let Err(e) = self.log.record(&event).await {
            warn!(error = %e, kind = event.kind.as_str(), "audit event not persisted");
        }
    }
}
