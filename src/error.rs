use std::fmt;
use tokio_tungstenite::tungstenite::Error as WsError;
use webrtc::Error as WebRtcError;
use anyhow::Error as AnyhowError;

#[derive(Debug)]
pub enum Error {
    WebRtc(WebRtcError),
    WebSocket(WsError),
    Media(String),
    Signaling(String),
    Session(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::WebRtc(e) => write!(f, "WebRTC error: {}", e),
            Error::WebSocket(e) => write!(f, "WebSocket error: {}", e),
            Error::Media(e) => write!(f, "Media error: {}", e),
            Error::Signaling(e) => write!(f, "Signaling error: {}", e),
            Error::Session(e) => write!(f, "Session error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<WebRtcError> for Error {
    fn from(err: WebRtcError) -> Self {
        Error::WebRtc(err)
    }
}

impl From<WsError> for Error {
    fn from(err: WsError) -> Self {
        Error::WebSocket(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Signaling(err.to_string())
    }
}

impl From<AnyhowError> for Error {
    fn from(err: AnyhowError) -> Self {
        Error::Media(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
