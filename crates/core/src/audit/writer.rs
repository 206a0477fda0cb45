use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{AuditEventEnvelope, AuditHandle, AuditRecord, AuditStore};

/// Default capacity of the audit channel.
pub const DEFAULT_AUDIT_BUFFER: usize = 1024;

/// Background task that drains audit events into a store.
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditEventEnvelope>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    pub fn new(rx: mpsc::Receiver<AuditEventEnvelope>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    /// Consume events until every handle has been dropped.
    pub async fn run(mut self) {
        tracing::debug!("Audit writer started");

        while let Some(envelope) = self.rx.recv().await {
            let record = AuditRecord::from_event(envelope.timestamp, envelope.event);
            if let Err(e) = self.store.insert(&record) {
                tracing::error!(event_type = %record.event_type, "Failed to write audit event: {}", e);
            }
        }

        tracing::debug!("Audit writer shutting down");
    }
}

/// Create a handle and the writer that serves it.
///
/// Spawn the writer with `tokio::spawn(writer.run())`.
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (AuditHandle::new(tx), AuditWriter::new(rx, store))
}

/// Create the audit system and spawn its writer on the current runtime.
pub fn spawn_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, JoinHandle<()>) {
    let (handle, writer) = create_audit_system(store, buffer_size);
    (handle, tokio::spawn(writer.run()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditError, AuditEvent, AuditFilter, SqliteAuditStore};

    struct FailingStore;

    impl AuditStore for FailingStore {
        fn insert(&self, _record: &AuditRecord) -> Result<i64, AuditError> {
            Err(AuditError::Database("disk full".to_string()))
        }

        fn query(&self, _filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
            Ok(Vec::new())
        }

        fn count(&self, _filter: &AuditFilter) -> Result<i64, AuditError> {
            Ok(0)
        }
    }

    fn enqueued(i: usize) -> AuditEvent {
        AuditEvent::JobEnqueued {
            job_id: format!("job-{}", i),
            episode: "best-air-fryers".to_string(),
            backend: "dzine".to_string(),
            dedup_key: format!("best-air-fryers:{}:product-hero:abc", i),
            deduplicated: false,
        }
    }

    #[tokio::test]
    async fn test_writer_stores_events_in_order() {
        let store = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let (handle, join) = spawn_audit_system(store.clone(), 16);

        handle
            .emit(AuditEvent::ServiceStarted {
                version: "0.1.0".to_string(),
                config_hash: "abc".to_string(),
            })
            .await;
        for i in 0..3 {
            handle.emit(enqueued(i)).await;
        }
        drop(handle);
        join.await.unwrap();

        let records = store.query(&AuditFilter::new()).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(
            store
                .count(&AuditFilter::new().with_event_type("job_enqueued"))
                .unwrap(),
            3
        );
        let job = store.query(&AuditFilter::new().with_job_id("job-1")).unwrap();
        assert_eq!(job[0].episode.as_deref(), Some("best-air-fryers"));
    }

    #[tokio::test]
    async fn test_writer_continues_on_insert_failure() {
        let (handle, join) = spawn_audit_system(Arc::new(FailingStore), 4);
        handle.emit(enqueued(0)).await;
        handle.emit(enqueued(1)).await;
        drop(handle);
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_waits_for_all_handles_to_drop() {
        let store = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let (handle, join) = spawn_audit_system(store.clone(), 16);
        let orchestrator_handle = handle.clone();

        orchestrator_handle.emit(enqueued(0)).await;
        drop(handle);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!join.is_finished());

        orchestrator_handle
            .emit(AuditEvent::ServiceStopped {
                reason: "graceful_shutdown".to_string(),
            })
            .await;
        drop(orchestrator_handle);

        tokio::time::timeout(std::time::Duration::from_secs(1), join)
            .await
            .expect("writer should exit once every handle is dropped")
            .unwrap();
        assert_eq!(store.count(&AuditFilter::new()).unwrap(), 2);
    }
}
