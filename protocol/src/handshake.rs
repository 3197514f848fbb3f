//! Startup handshake emitted by the worker once it is bound and ready to serve.
//!
//! The worker prints a single JSON object on its own line, e.g. `{"port":51234,"status":"ready"}`,
//! and flushes stdout before it accepts application traffic. The host treats the first line that
//! parses as a handshake as authoritative for the current worker lifecycle.

use serde::Deserialize;
use serde::Serialize;

/// Readiness marker carried by every handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeStatus {
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    /// Loopback port the worker actually bound.
    pub port: u16,
    pub status: HandshakeStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeParseError {
    #[error("line does not contain a JSON object")]
    NoObject,
    #[error("malformed handshake: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("handshake reported port 0")]
    ZeroPort,
}

impl HandshakeMessage {
    pub fn ready(port: u16) -> Self {
        Self {
            port,
            status: HandshakeStatus::Ready,
        }
    }

    /// Renders the handshake as a single line without the trailing newline.
    pub fn to_line(&self) -> String {
        format!(r#"{{"port":{},"status":"ready"}}"#, self.port)
    }

    /// Parses a line of worker output.
    ///
    /// Text around the JSON object (for example a log prefix added by a process wrapper) is
    /// ignored. The object must carry an integer `port` in `1..=65535` and `"status": "ready"`;
    /// additional fields are tolerated.
    pub fn parse_line(line: &str) -> Result<Self, HandshakeParseError> {
        let trimmed = line.trim();
        let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) else {
            return Err(HandshakeParseError::NoObject);
        };
        if end < start {
            return Err(HandshakeParseError::NoObject);
        }

        let message: HandshakeMessage = serde_json::from_str(&trimmed[start..=end])?;
        if message.port == 0 {
            return Err(HandshakeParseError::ZeroPort);
        }
        Ok(message)
    }
}
