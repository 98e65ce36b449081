//! Assist Client - push-to-talk client for a streaming voice assistant
//!
//! This library provides the pieces of a hands-free assistant device:
//! - A conversation session that streams microphone audio to the service and
//!   plays back the spoken response
//! - Trigger sources (button, signal, wake phrase) that start conversations
//! - Device actions requested by the service
//! - Audio plumbing over the default sound device or WAV files
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Triggers                          │
//! │   Button  │  SIGUSR2  │  Wake phrase (STT)           │
//! └────────────────────┬────────────────────────────────┘
//!                      │ TriggerFlag
//! ┌────────────────────▼────────────────────────────────┐
//! │                 SessionRunner                        │
//! │   ConversationSession  │  Retry  │  Device actions   │
//! └────────────────────┬────────────────────────────────┘
//!                      │ one exchange per turn
//! ┌────────────────────▼────────────────────────────────┐
//! │            Assistant service (WebSocket)             │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod actions;
pub mod audio;
pub mod config;
pub mod credentials;
pub mod display;
pub mod error;
pub mod indicator;
pub mod protocol;
pub mod retry;
pub mod runner;
pub mod session;
pub mod transport;
pub mod trigger;

pub use actions::{DeviceActionDispatcher, DeviceRequestHandler};
pub use audio::{ConversationStream, DuplexAudioStream};
pub use config::Config;
pub use error::{Error, Result, TransportError, TransportStatus};
pub use protocol::{ConversationState, MicrophoneMode, TurnRequestConfig, TurnResponseEvent};
pub use retry::RetryPolicy;
pub use runner::SessionRunner;
pub use session::{ConversationSession, SessionSettings, TurnOutcome};
pub use transport::{Transport, WebSocketTransport};
pub use trigger::TriggerFlag;
