//! Outbound message contract.
//!
//! Delivery is fire-and-forget; the receipt exists for logging, not for
//! acknowledgement tracking.

use async_trait::async_trait;

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Ask the transport to render the reply as a quote of the message that
    /// triggered it, where the transport supports that.
    pub quote_original: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub target: String,
    pub sent_unix_ms: u64,
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send(
        &self,
        target: &str,
        text: &str,
        options: &SendOptions,
    ) -> anyhow::Result<DeliveryReceipt>;
}
