//! Data channel message types

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Android key code, either numeric (`66`) or symbolic (`KEYCODE_ENTER`)
///
/// Only ASCII alphanumerics and `_` are accepted since the value ends up on
/// a device shell command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct KeyCode(String);

impl KeyCode {
    pub fn parse(code: &str) -> Result<Self, String> {
        let code = code.trim();
        if code.is_empty() {
            return Err("empty keycode".to_string());
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("invalid keycode: {:?}", code));
        }
        Ok(Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for KeyCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Name(String),
        }

        let code = match Raw::deserialize(deserializer)? {
            Raw::Number(n) => n.to_string(),
            Raw::Name(name) => name,
        };
        KeyCode::parse(&code).map_err(D::Error::custom)
    }
}

/// Input command decoded from the control channel
///
/// Coordinates are in the client's reference space; scaled copies are
/// derived at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputCommand {
    Tap {
        x: f64,
        y: f64,
    },
    Swipe {
        x: f64,
        y: f64,
        x2: f64,
        y2: f64,
        /// Milliseconds; missing or 0 means the configured default
        #[serde(default)]
        duration: Option<u32>,
    },
    KeyEvent {
        keycode: KeyCode,
    },
    Text {
        text: String,
    },
}

impl InputCommand {
    /// Wire name of the command
    pub fn kind(&self) -> &'static str {
        match self {
            InputCommand::Tap { .. } => "tap",
            InputCommand::Swipe { .. } => "swipe",
            InputCommand::KeyEvent { .. } => "keyevent",
            InputCommand::Text { .. } => "text",
        }
    }
}

/// One control channel message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMessage {
    #[serde(flatten)]
    pub command: InputCommand,
    /// Client send time, ms since the Unix epoch
    #[serde(default)]
    pub timestamp: i64,
}

impl InputMessage {
    pub fn decode(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }
}
