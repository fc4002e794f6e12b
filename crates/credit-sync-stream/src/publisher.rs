//! Publisher: turns a committed local mutation into one envelope on a topic.

use std::sync::Arc;

use credit_sync_core::{CreditEvent, Envelope, EventId};

use crate::error::PublishError;
use crate::transport::Broker;

/// Where a published envelope landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub event_id: EventId,
}

/// Emits credit events to the broker.
///
/// No batching and no internal retry: each successful call appends exactly
/// one envelope. Callers publish only after their local write committed.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Publish `event` to `topic`, keyed by the account email.
    ///
    /// Re-publishing the same event value keeps its event id, so consumers
    /// deduplicate producer retries.
    pub async fn publish(
        &self,
        topic: &str,
        event: &CreditEvent,
    ) -> Result<PublishReceipt, PublishError> {
        let envelope = Envelope::new(topic, event.clone());
        let bytes = envelope.encode();

        let meta = self
            .broker
            .publish(topic, &envelope.key, bytes)
            .await
            .map_err(|e| {
                tracing::warn!(
                    topic,
                    event_id = %event.event_id,
                    email = %event.email,
                    error = %e,
                    "publish failed"
                );
                PublishError::from(e)
            })?;

        tracing::debug!(
            topic,
            partition = meta.partition,
            offset = meta.offset,
            event_id = %event.event_id,
            "published credit event"
        );

        Ok(PublishReceipt {
            topic: meta.topic,
            partition: meta.partition,
            offset: meta.offset,
            event_id: event.event_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryBroker;
    use crate::transport::partition_for;
    use credit_sync_core::{decode_envelope, Email};

    fn event(credits: i64) -> CreditEvent {
        CreditEvent::new(Email::parse("a@x.com").unwrap(), credits, 1000)
    }

    #[tokio::test]
    async fn test_publish_appends_one_envelope() {
        let broker = MemoryBroker::new();
        let publisher = Publisher::new(Arc::new(broker.clone()));
        let e = event(10);

        let receipt = publisher.publish("credit-data", &e).await.unwrap();
        assert_eq!(receipt.event_id, e.event_id);
        assert_eq!(receipt.partition, partition_for("a@x.com", broker.partitions()));

        let records = broker.records("credit-data").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "a@x.com");

        let envelope = decode_envelope(&records[0].value).unwrap();
        assert_eq!(envelope.payload, e);
        assert_eq!(envelope.topic, "credit-data");
    }

    #[tokio::test]
    async fn test_unavailable_is_transient() {
        let broker = MemoryBroker::new();
        let publisher = Publisher::new(Arc::new(broker.clone()));

        broker.set_available(false);
        let err = publisher.publish("credit-data", &event(1)).await.unwrap_err();
        assert!(matches!(err, PublishError::Transient(_)));
        assert!(broker.records("credit-data").await.is_empty());
    }

    #[tokio::test]
    async fn test_republish_keeps_event_id() {
        let broker = MemoryBroker::new();
        let publisher = Publisher::new(Arc::new(broker.clone()));
        let e = event(5);

        let r1 = publisher.publish("credit-data", &e).await.unwrap();
        let r2 = publisher.publish("credit-data", &e).await.unwrap();
        assert_eq!(r1.event_id, r2.event_id);
        assert_eq!(r2.offset, r1.offset + 1);
    }
}
