use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{ChatRequest, ProviderError, StreamEvent};

#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Stream a reply to `request`, pushing fragments into `tx` in arrival
    /// order and finishing with `Done` or `Error`.
    async fn stream_message(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError>;
}
