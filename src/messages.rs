//! Signaling wire messages.
//!
//! Text frames carry `{"event": <name>, "data": <payload>}` using the event names
//! the signaling server understands. Audio chunks are the exception: they travel
//! as binary frames (see [`AudioChunk::to_frame`]) so PCM never goes through JSON.
use serde::{Deserialize, Serialize};

/// Which half of the description exchange an SDP blob belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A local or remote session description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }
}

/// Payload of a peer-to-peer signal relayed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalData {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: IceCandidate },
}

impl SignalData {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalData::Offer { .. } => "offer",
            SignalData::Answer { .. } => "answer",
            SignalData::Candidate { .. } => "candidate",
        }
    }
}

impl From<SessionDescription> for SignalData {
    fn from(desc: SessionDescription) -> Self {
        match desc.kind {
            SdpType::Offer => SignalData::Offer { sdp: desc.sdp },
            SdpType::Answer => SignalData::Answer { sdp: desc.sdp },
        }
    }
}

impl From<IceCandidate> for SignalData {
    fn from(candidate: IceCandidate) -> Self {
        SignalData::Candidate { candidate }
    }
}

/// Downstream transcription settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageSettings {
    #[serde(
        rename = "sourceLanguage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_language: Option<String>,
    #[serde(rename = "targetLanguage")]
    pub target_language: String,
    #[serde(rename = "sttSourceLanguages")]
    pub stt_source_languages: Vec<String>,
}

/// One encoded PCM16LE frame plus the rate it was captured at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioChunk {
    pub chunk: Vec<u8>,
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Binary frame layout: `sample_rate` as u32 LE, then the PCM payload.
    pub fn to_frame(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.chunk.len());
        out.extend_from_slice(&self.sample_rate.to_le_bytes());
        out.extend_from_slice(&self.chunk);
        out
    }

    pub fn from_frame(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }
        let (rate, pcm) = bytes.split_at(4);
        let sample_rate = u32::from_le_bytes([rate[0], rate[1], rate[2], rate[3]]);
        Some(Self {
            chunk: pcm.to_vec(),
            sample_rate,
        })
    }
}

/// Transcript (or translation) fragment pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSubtitle {
    #[serde(rename = "speakerId")]
    pub speaker_id: String,
    pub text: String,
    #[serde(rename = "isFinal")]
    pub is_final: bool,
}

/// Messages this endpoint sends to the signaling server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    RegisterUsername(String),
    OutgoingCall {
        #[serde(rename = "userToCall")]
        user_to_call: String,
        #[serde(rename = "signalData")]
        signal_data: SignalData,
    },
    AnswerCall {
        to: String,
        signal: SignalData,
    },
    DisconnectCall,
    UpdateLanguageSettings(LanguageSettings),
    AudioChunk(AudioChunk),
}

impl ClientMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::RegisterUsername(_) => "registerUsername",
            ClientMessage::OutgoingCall { .. } => "outgoingCall",
            ClientMessage::AnswerCall { .. } => "answerCall",
            ClientMessage::DisconnectCall => "disconnectCall",
            ClientMessage::UpdateLanguageSettings(_) => "updateLanguageSettings",
            ClientMessage::AudioChunk(_) => "audioChunk",
        }
    }
}

/// Messages the signaling server delivers to this endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    RegistrationFailed(String),
    RegistrationSuccess(String),
    UpdateOnlineUsers(Vec<String>),
    #[serde(alias = "incomingCall")]
    CallUser {
        from: String,
        #[serde(rename = "signalData")]
        signal_data: SignalData,
    },
    CallAccepted {
        from: String,
        signal: SignalData,
    },
    CallFailed {
        user: String,
    },
    PeerDisconnected,
    LiveSubtitle(LiveSubtitle),
}
