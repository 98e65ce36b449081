//! WebSocket exchange with JSON framing

use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt, stream};
use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::{RequestStream, ResponseStream, Transport};
use crate::protocol::AssistResponse;
use crate::{TransportError, TransportStatus};

/// Sent after the last request so the service knows no more audio follows
const END_OF_INPUT: &str = r#"{"endOfInput":true}"#;

/// Exchange over a WebSocket, one connection per turn
///
/// Every request is one JSON text frame. Responses may arrive as text or
/// binary JSON frames. A normal close ends the response stream; any other
/// close code surfaces as a classified [`TransportError`].
pub struct WebSocketTransport {
    endpoint: String,
    token: SecretString,
}

impl WebSocketTransport {
    /// Create a transport for `endpoint` (a `ws://` or `wss://` URL)
    #[must_use]
    pub fn new(endpoint: impl Into<String>, token: SecretString) -> Self {
        Self {
            endpoint: endpoint.into(),
            token,
        }
    }

    /// Endpoint URL
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn assist(&self, requests: RequestStream) -> Result<ResponseStream, TransportError> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::new(TransportStatus::InvalidArgument, e.to_string()))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token.expose_secret()))
            .map_err(|e| TransportError::new(TransportStatus::Unauthenticated, e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws, response) = connect_async(request).await.map_err(classify_ws_error)?;
        tracing::debug!(endpoint = %self.endpoint, status = %response.status(), "exchange opened");

        let (mut writer, reader) = ws.split();

        tokio::spawn(async move {
            let mut requests = requests;
            while let Some(request) = requests.next().await {
                let frame = match serde_json::to_string(&request) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode request");
                        return;
                    }
                };
                if let Err(e) = writer.send(Message::Text(frame)).await {
                    tracing::debug!(error = %e, "exchange closed while sending");
                    return;
                }
            }

            if let Err(e) = writer.send(Message::Text(END_OF_INPUT.to_string())).await {
                tracing::debug!(error = %e, "exchange closed before end of input");
            }
            tracing::debug!("reached end of request stream");
        });

        Ok(responses(reader).boxed())
    }
}

/// Turn raw frames into decoded responses
///
/// The stream ends after the first error.
fn responses<S>(
    reader: S,
) -> impl Stream<Item = Result<AssistResponse, TransportError>> + Send + 'static
where
    S: Stream<Item = Result<Message, WsError>> + Unpin + Send + 'static,
{
    stream::unfold(Some(reader), |reader| async move {
        let mut reader = reader?;
        loop {
            let parsed = match reader.next().await? {
                Ok(Message::Text(text)) => serde_json::from_str::<AssistResponse>(&text),
                Ok(Message::Binary(data)) => serde_json::from_slice::<AssistResponse>(&data),
                Ok(Message::Close(frame)) => {
                    return close_error(frame.as_ref()).map(|e| (Err(e), None));
                }
                Ok(_) => continue,
                Err(e) => return Some((Err(classify_ws_error(e)), None)),
            };

            return Some(match parsed {
                Ok(response) => (Ok(response), Some(reader)),
                Err(e) => (
                    Err(TransportError::new(
                        TransportStatus::Internal,
                        format!("malformed response: {e}"),
                    )),
                    None,
                ),
            });
        }
    })
}

/// Classify a close frame; `None` means a clean end of the exchange
fn close_error(frame: Option<&CloseFrame<'_>>) -> Option<TransportError> {
    let frame = frame?;
    let status = match frame.code {
        CloseCode::Normal => return None,
        CloseCode::Away | CloseCode::Restart | CloseCode::Again => TransportStatus::Unavailable,
        CloseCode::Policy => TransportStatus::PermissionDenied,
        CloseCode::Invalid | CloseCode::Unsupported | CloseCode::Size => {
            TransportStatus::InvalidArgument
        }
        CloseCode::Error => TransportStatus::Internal,
        _ => TransportStatus::Unknown,
    };

    Some(TransportError::new(
        status,
        format!("closed with {}: {}", u16::from(frame.code), frame.reason),
    ))
}

/// Map an HTTP handshake status onto a transport status
#[must_use]
pub fn status_for_http(code: u16) -> TransportStatus {
    match code {
        502..=504 => TransportStatus::Unavailable,
        408 => TransportStatus::DeadlineExceeded,
        401 => TransportStatus::Unauthenticated,
        403 => TransportStatus::PermissionDenied,
        400 => TransportStatus::InvalidArgument,
        500..=599 => TransportStatus::Internal,
        _ => TransportStatus::Unknown,
    }
}

fn classify_ws_error(error: WsError) -> TransportError {
    let status = match &error {
        WsError::Http(response) => status_for_http(response.status().as_u16()),
        WsError::Io(_)
        | WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            TransportStatus::Unavailable
        }
        WsError::Url(_) => TransportStatus::InvalidArgument,
        _ => TransportStatus::Unknown,
    };

    TransportError::new(status, error.to_string())
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    fn frame(code: CloseCode) -> CloseFrame<'static> {
        CloseFrame {
            code,
            reason: Cow::Borrowed("bye"),
        }
    }

    #[test]
    fn http_statuses() {
        assert_eq!(status_for_http(503), TransportStatus::Unavailable);
        assert_eq!(status_for_http(502), TransportStatus::Unavailable);
        assert_eq!(status_for_http(500), TransportStatus::Internal);
        assert_eq!(status_for_http(401), TransportStatus::Unauthenticated);
        assert_eq!(status_for_http(403), TransportStatus::PermissionDenied);
        assert_eq!(status_for_http(404), TransportStatus::Unknown);
    }

    #[test]
    fn normal_close_is_clean() {
        assert!(close_error(None).is_none());
        assert!(close_error(Some(&frame(CloseCode::Normal))).is_none());
    }

    #[test]
    fn try_again_close_is_unavailable() {
        let err = close_error(Some(&frame(CloseCode::Again))).unwrap();
        assert!(err.is_unavailable());
        assert!(err.message.contains("1013"));
    }

    #[test]
    fn server_error_close_is_internal() {
        let err = close_error(Some(&frame(CloseCode::Error))).unwrap();
        assert_eq!(err.status, TransportStatus::Internal);
    }

    #[test]
    fn io_errors_are_unavailable() {
        let err = classify_ws_error(WsError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        )));
        assert!(err.is_unavailable());
    }
}
