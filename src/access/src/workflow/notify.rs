//! Notification collaborator

use super::request::ApproverSpec;
use crate::audit::{AuditEventType, AuditRecord};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Delivers workflow events to people. Formatting and transport are up to the
/// implementation.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(
        &self,
        event_type: AuditEventType,
        recipients: &[ApproverSpec],
        payload: &AuditRecord,
    ) -> Result<()>;
}

/// Dispatcher that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationDispatcher for NoopNotifier {
    async fn notify(&self, _: AuditEventType, _: &[ApproverSpec], _: &AuditRecord) -> Result<()> {
        Ok(())
    }
}

/// Fire and forget on the runtime; failures are only logged
pub(crate) fn dispatch(
    notifier: &Arc<dyn NotificationDispatcher>,
    recipients: Vec<ApproverSpec>,
    record: AuditRecord,
) {
    if recipients.is_empty() {
        return;
    }
    let notifier = notifier.clone();
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(record.event_type, &recipients, &record).await {
            warn!(
                "Notification for {} on {} failed: {}",
                record.event_type, record.target_id, e
            );
        }
    });
}
