//! Wire messages exchanged with the assistant service
//!
//! One exchange is a single bidirectional stream. The first outbound message
//! carries the full [`TurnRequestConfig`] and no audio; every later outbound
//! message carries only an audio chunk. Inbound [`AssistResponse`] messages
//! are decoded once into [`TurnResponseEvent`]s and never re-inspected field by field.

use serde::{Deserialize, Serialize};

/// Opaque dialog token issued by the service and echoed back on the next turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationState(#[serde(with = "b64")] Vec<u8>);

impl ConversationState {
    /// Wrap raw state bytes
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw state bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether the token carries no data
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Audio sample encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioEncoding {
    /// Uncompressed 16-bit signed little-endian samples
    #[default]
    Linear16,
}

/// Format of captured audio sent to the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInConfig {
    pub encoding: AudioEncoding,
    pub sample_rate_hertz: u32,
}

/// Format of synthesized audio the service should return
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutConfig {
    pub encoding: AudioEncoding,
    pub sample_rate_hertz: u32,
    /// Current output volume, 0-100
    pub volume_percentage: u8,
}

/// Dialog context sent with each turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogStateIn {
    /// BCP-47 language code, e.g. `en-US`
    pub language_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_state: Option<ConversationState>,
    /// True only for the first request of a conversation
    pub is_new_conversation: bool,
}

/// Identity of the registered device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub device_id: String,
    pub device_model_id: String,
}

/// Whether visual responses are wanted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScreenMode {
    Off,
    Playing,
}

/// Visual output configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenOutConfig {
    pub screen_mode: ScreenMode,
}

/// Per-turn configuration, built fresh at the start of every attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequestConfig {
    pub audio_in_config: AudioInConfig,
    pub audio_out_config: AudioOutConfig,
    pub dialog_state_in: DialogStateIn,
    pub device_config: DeviceConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_out_config: Option<ScreenOutConfig>,
}

/// Outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssistRequest {
    /// First message of every exchange
    Config(Box<TurnRequestConfig>),
    /// Captured audio
    AudioIn(#[serde(with = "b64")] Vec<u8>),
}

impl AssistRequest {
    /// The turn config carried by this message, if it is the first one
    #[must_use]
    pub fn config(&self) -> Option<&TurnRequestConfig> {
        match self {
            Self::Config(config) => Some(config),
            Self::AudioIn(_) => None,
        }
    }
}

/// Server-side event markers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    EventTypeUnspecified,
    /// The service detected that the user stopped speaking
    EndOfUtterance,
}

/// Microphone mode as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MicrophoneModeOut {
    MicrophoneModeUnspecified,
    CloseMicrophone,
    DialogFollowOn,
}

/// One recognized fragment of the user's request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeechRecognitionResult {
    pub transcript: String,
    pub stability: f32,
}

/// Synthesized audio fragment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioOut {
    #[serde(with = "b64")]
    pub audio_data: Vec<u8>,
}

/// Dialog state returned by the service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DialogStateOut {
    pub supplemental_display_text: String,
    pub conversation_state: Option<ConversationState>,
    pub microphone_mode: Option<MicrophoneModeOut>,
    /// 0 means "leave the volume alone"
    pub volume_percentage: u8,
}

/// Device action embedded in a response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceAction {
    pub device_request_json: String,
}

/// Visual response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScreenOut {
    pub format: String,
    #[serde(with = "b64")]
    pub data: Vec<u8>,
}

/// Inbound message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssistResponse {
    pub event_type: Option<EventType>,
    pub speech_results: Vec<SpeechRecognitionResult>,
    pub audio_out: Option<AudioOut>,
    pub dialog_state_out: Option<DialogStateOut>,
    pub device_action: Option<DeviceAction>,
    pub screen_out: Option<ScreenOut>,
}

/// Whether the service expects the user to keep talking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicrophoneMode {
    /// Re-open the microphone without a new trigger
    FollowOn,
    /// The conversation is over
    Close,
}

/// A single event decoded from an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnResponseEvent {
    EndOfUtterance,
    SpeechTranscript(String),
    AudioChunk(Vec<u8>),
    ConversationStateUpdate(ConversationState),
    VolumeUpdate(u8),
    MicrophoneModeUpdate(MicrophoneMode),
    /// Raw JSON payload; parsed by the session
    DeviceActionRequest(String),
    DisplayUpdate(Vec<u8>),
}

impl AssistResponse {
    /// Decode this message into events, in the order they must be applied
    #[must_use]
    pub fn into_events(self) -> Vec<TurnResponseEvent> {
        let mut events = Vec::new();

        if self.event_type == Some(EventType::EndOfUtterance) {
            events.push(TurnResponseEvent::EndOfUtterance);
        }

        if !self.speech_results.is_empty() {
            let transcript = self
                .speech_results
                .iter()
                .map(|r| r.transcript.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            events.push(TurnResponseEvent::SpeechTranscript(transcript));
        }

        if let Some(audio) = self.audio_out
            && !audio.audio_data.is_empty()
        {
            events.push(TurnResponseEvent::AudioChunk(audio.audio_data));
        }

        if let Some(dialog) = self.dialog_state_out {
            if let Some(state) = dialog.conversation_state
                && !state.is_empty()
            {
                events.push(TurnResponseEvent::ConversationStateUpdate(state));
            }
            if dialog.volume_percentage != 0 {
                events.push(TurnResponseEvent::VolumeUpdate(dialog.volume_percentage));
            }
            match dialog.microphone_mode {
                Some(MicrophoneModeOut::DialogFollowOn) => events.push(
                    TurnResponseEvent::MicrophoneModeUpdate(MicrophoneMode::FollowOn),
                ),
                Some(MicrophoneModeOut::CloseMicrophone) => events.push(
                    TurnResponseEvent::MicrophoneModeUpdate(MicrophoneMode::Close),
                ),
                Some(MicrophoneModeOut::MicrophoneModeUnspecified) | None => {}
            }
        }

        if let Some(action) = self.device_action
            && !action.device_request_json.is_empty()
        {
            events.push(TurnResponseEvent::DeviceActionRequest(
                action.device_request_json,
            ));
        }

        if let Some(screen) = self.screen_out
            && !screen.data.is_empty()
        {
            events.push(TurnResponseEvent::DisplayUpdate(screen.data));
        }

        events
    }
}

/// Base64 encoding for byte fields
mod b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(bytes: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_carries_config_only() {
        let config = TurnRequestConfig {
            audio_in_config: AudioInConfig {
                encoding: AudioEncoding::Linear16,
                sample_rate_hertz: 16000,
            },
            audio_out_config: AudioOutConfig {
                encoding: AudioEncoding::Linear16,
                sample_rate_hertz: 16000,
                volume_percentage: 50,
            },
            dialog_state_in: DialogStateIn {
                language_code: "en-US".to_string(),
                conversation_state: None,
                is_new_conversation: true,
            },
            device_config: DeviceConfig {
                device_id: "dev-1".to_string(),
                device_model_id: "model-1".to_string(),
            },
            screen_out_config: None,
        };

        let json = serde_json::to_value(AssistRequest::Config(Box::new(config))).unwrap();
        assert_eq!(json["config"]["audioInConfig"]["encoding"], "LINEAR16");
        assert_eq!(json["config"]["dialogStateIn"]["isNewConversation"], true);
        assert!(json["config"]["dialogStateIn"].get("conversationState").is_none());
        assert!(json["config"].get("screenOutConfig").is_none());
        assert!(json.get("audioIn").is_none());
    }

    #[test]
    fn audio_request_is_base64() {
        let json = serde_json::to_string(&AssistRequest::AudioIn(vec![1, 2, 3])).unwrap();
        assert_eq!(json, r#"{"audioIn":"AQID"}"#);
    }

    #[test]
    fn decodes_events_in_application_order() {
        let json = r#"{
            "eventType": "END_OF_UTTERANCE",
            "speechResults": [{"transcript": "turn on"}, {"transcript": "the lights"}],
            "audioOut": {"audioData": "AAE="},
            "dialogStateOut": {
                "conversationState": "c3RhdGU=",
                "microphoneMode": "DIALOG_FOLLOW_ON",
                "volumePercentage": 70
            },
            "deviceAction": {"deviceRequestJson": "{}"},
            "screenOut": {"format": "HTML", "data": "PGI+"}
        }"#;

        let response: AssistResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            response.into_events(),
            vec![
                TurnResponseEvent::EndOfUtterance,
                TurnResponseEvent::SpeechTranscript("turn on the lights".to_string()),
                TurnResponseEvent::AudioChunk(vec![0, 1]),
                TurnResponseEvent::ConversationStateUpdate(ConversationState::new(
                    b"state".to_vec()
                )),
                TurnResponseEvent::VolumeUpdate(70),
                TurnResponseEvent::MicrophoneModeUpdate(MicrophoneMode::FollowOn),
                TurnResponseEvent::DeviceActionRequest("{}".to_string()),
                TurnResponseEvent::DisplayUpdate(b"<b>".to_vec()),
            ]
        );
    }

    #[test]
    fn empty_fields_produce_no_events() {
        let json = r#"{
            "eventType": "EVENT_TYPE_UNSPECIFIED",
            "audioOut": {"audioData": ""},
            "dialogStateOut": {"volumePercentage": 0, "microphoneMode": "MICROPHONE_MODE_UNSPECIFIED"},
            "deviceAction": {}
        }"#;

        let response: AssistResponse = serde_json::from_str(json).unwrap();
        assert!(response.into_events().is_empty());
    }

    #[test]
    fn close_microphone_maps_to_close() {
        let json = r#"{"dialogStateOut": {"microphoneMode": "CLOSE_MICROPHONE"}}"#;
        let response: AssistResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            response.into_events(),
            vec![TurnResponseEvent::MicrophoneModeUpdate(MicrophoneMode::Close)]
        );
    }
}
