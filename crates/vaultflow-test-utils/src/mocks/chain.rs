//! Mocks for the chain access seams

use async_trait::async_trait;
use mockall::mock;

use vaultflow_core::chain::{
    ChainClient, MessageStatus, NonceSource, SignerResolver, TransactionReceipt,
};
use vaultflow_core::CoreError;

mock! {
    pub ChainClient {}

    #[async_trait]
    impl ChainClient for ChainClient {
        async fn transaction_receipt(
            &self,
            chain_id: u64,
            transaction_hash: &str,
        ) -> Result<Option<TransactionReceipt>, CoreError>;

        async fn message_status(
            &self,
            chain_id: u64,
            message_hash: &str,
        ) -> Result<MessageStatus, CoreError>;
    }
}

mock! {
    pub NonceSource {}

    #[async_trait]
    impl NonceSource for NonceSource {
        async fn next_nonce(&self, chain_id: u64, address: &str) -> Result<u64, CoreError>;
    }
}

mock! {
    pub SignerResolver {}

    #[async_trait]
    impl SignerResolver for SignerResolver {
        async fn resolve(&self, chain_id: u64, address_ref: &str) -> Result<String, CoreError>;
    }
}
