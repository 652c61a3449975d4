//! Broker seam and the in-process broker used by tests and local runs
//!
//! Topics follow AMQP-style dotted names (`auxWorkflow.grantEthOst`);
//! subscription patterns support `*` for one segment and `#` for zero or
//! more, so one worker subscription (`auxWorkflow.#`) serves every
//! auxiliary-chain workflow family.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use vaultflow_core::{CoreError, MessagePublisher, StepMessage};

use crate::WorkerResult;

/// One message handed to a worker
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Topic the message arrived on
    pub topic: String,

    /// The step message
    pub message: StepMessage,
}

/// Broker seam; production deployments back this with a real broker
///
/// Delivery is at-least-once: a consumer that dies mid-handling gets
/// the message again, which the engine tolerates by step idempotency.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish a step message on a topic
    async fn publish(&self, topic: &str, message: &StepMessage) -> WorkerResult<()>;

    /// Subscribe to every topic matching the pattern
    async fn subscribe(&self, pattern: &str) -> WorkerResult<mpsc::UnboundedReceiver<Delivery>>;

    /// Hand a delivery back for another attempt
    async fn requeue(&self, delivery: &Delivery) -> WorkerResult<()> {
        self.publish(&delivery.topic, &delivery.message).await
    }
}

/// Whether a dotted topic matches a subscription pattern
///
/// `*` matches exactly one segment, `#` matches zero or more.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    fn matches(pattern: &[&str], topic: &[&str]) -> bool {
        match (pattern.first(), topic.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], topic)
                    || (!topic.is_empty() && matches(pattern, &topic[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &topic[1..]),
            (Some(&seg), Some(&t)) if seg == t => matches(&pattern[1..], &topic[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let topic: Vec<&str> = topic.split('.').collect();
    matches(&pattern, &topic)
}

/// In-process broker backed by unbounded channels
///
/// Delivery is at-least-once from the consumer's point of view only in
/// the sense that the engine tolerates duplicates; the channel itself
/// delivers each message once per matching subscription.
#[derive(Default)]
pub struct MemoryBroker {
    subscriptions: DashMap<String, Vec<mpsc::UnboundedSender<Delivery>>>,
}

impl MemoryBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn publish(&self, topic: &str, message: &StepMessage) -> WorkerResult<()> {
        let mut delivered = 0usize;
        for mut entry in self.subscriptions.iter_mut() {
            if !topic_matches(entry.key(), topic) {
                continue;
            }
            entry.value_mut().retain(|tx| {
                tx.send(Delivery {
                    topic: topic.to_string(),
                    message: message.clone(),
                })
                .is_ok()
            });
            delivered += entry.value().len();
        }
        debug!(topic, delivered, "Published step message");
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> WorkerResult<mpsc::UnboundedReceiver<Delivery>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions
            .entry(pattern.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

/// Adapter exposing a broker through the engine's publisher seam
pub struct BrokerPublisher {
    broker: Arc<dyn MessageBroker>,
}

impl BrokerPublisher {
    /// Wrap a broker as a [`MessagePublisher`]
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl MessagePublisher for BrokerPublisher {
    async fn publish(&self, topic: &str, message: &StepMessage) -> Result<(), CoreError> {
        self.broker
            .publish(topic, message)
            .await
            .map_err(|e| CoreError::BrokerError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vaultflow_core::{StepPayload, WorkflowId, WorkflowKind};

    fn message() -> StepMessage {
        StepMessage::initial(
            WorkflowId::new(),
            WorkflowKind::GrantEthOst,
            StepPayload::new(json!({"address": "0xabc"})),
        )
    }

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("auxWorkflow.#", "auxWorkflow.grantEthOst"));
        assert!(topic_matches("auxWorkflow.#", "auxWorkflow"));
        assert!(topic_matches("auxWorkflow.*", "auxWorkflow.logoutSessions"));
        assert!(topic_matches("#", "originWorkflow.stakeAndMint"));
        assert!(topic_matches(
            "originWorkflow.stakeAndMint",
            "originWorkflow.stakeAndMint"
        ));

        assert!(!topic_matches("auxWorkflow.*", "auxWorkflow"));
        assert!(!topic_matches("auxWorkflow.#", "originWorkflow.stakeAndMint"));
        assert!(!topic_matches("auxWorkflow.grantEthOst", "auxWorkflow"));
    }

    #[tokio::test]
    async fn test_wildcard_subscription_receives_matching_topics() {
        let broker = MemoryBroker::new();
        let mut rx = broker.subscribe("auxWorkflow.#").await.unwrap();

        broker
            .publish("auxWorkflow.grantEthOst", &message())
            .await
            .unwrap();
        broker
            .publish("originWorkflow.stakeAndMint", &message())
            .await
            .unwrap();

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.topic, "auxWorkflow.grantEthOst");
        assert!(rx.try_recv().is_err(), "origin topic must not be delivered");
    }

    #[tokio::test]
    async fn test_each_subscriber_gets_a_copy() {
        let broker = MemoryBroker::new();
        let mut a = broker.subscribe("auxWorkflow.#").await.unwrap();
        let mut b = broker.subscribe("#").await.unwrap();

        broker
            .publish("auxWorkflow.grantEthOst", &message())
            .await
            .unwrap();

        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let broker = MemoryBroker::new();
        let rx = broker.subscribe("auxWorkflow.#").await.unwrap();
        drop(rx);

        broker
            .publish("auxWorkflow.grantEthOst", &message())
            .await
            .unwrap();
        assert!(broker
            .subscriptions
            .get("auxWorkflow.#")
            .unwrap()
            .is_empty());
    }
}
