//! Mocks for the messaging seams

use async_trait::async_trait;
use mockall::mock;

use vaultflow_core::{CoreError, MessagePublisher, StepMessage};

mock! {
    pub MessagePublisher {}

    #[async_trait]
    impl MessagePublisher for MessagePublisher {
        async fn publish(&self, topic: &str, message: &StepMessage) -> Result<(), CoreError>;
    }
}
