//! Streaming exchange with the assistant service
//!
//! A [`Transport`] opens one bidirectional exchange per turn. Requests are
//! drained concurrently with response delivery, so the caller can keep
//! feeding audio while responses are already arriving.

mod websocket;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use websocket::WebSocketTransport;

use crate::TransportError;
use crate::protocol::{AssistRequest, AssistResponse};

/// Outbound half of an exchange
pub type RequestStream = BoxStream<'static, AssistRequest>;

/// Inbound half of an exchange; ends when the remote side closes
pub type ResponseStream = BoxStream<'static, Result<AssistResponse, TransportError>>;

/// Opens exchanges with the assistant service
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open an exchange, sending `requests` while responses are consumed
    ///
    /// # Errors
    ///
    /// Returns a classified [`TransportError`] if the exchange cannot be opened
    async fn assist(&self, requests: RequestStream) -> Result<ResponseStream, TransportError>;
}
