//! Parser for the central-configuration blob body.
//!
//! The engine itself treats remote config as opaque; this extra decodes
//! the one body shape the management server is known to emit so embedders
//! do not have to. The body is UTF-8 JSON:
//!
//! ```json
//! {"recording": "true", "sampleRate": 0.3}
//! ```
//!
//! `recording` arrives as a quoted string, not a native boolean. That is
//! what the server actually sends, so the quirk is preserved here for
//! wire compatibility. Unknown keys are ignored; a missing or unreadable
//! `recording` means recording stays on.

use serde::Deserialize;

/// Decoded central configuration with defaults applied.
#[derive(Clone, Debug, PartialEq)]
pub struct CentralConfig {
    pub recording: bool,
    pub sample_rate: Option<f64>,
}

impl Default for CentralConfig {
    fn default() -> Self {
        CentralConfig {
            recording: true,
            sample_rate: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCentralConfig {
    recording: Option<String>,
    #[serde(rename = "sampleRate")]
    sample_rate: Option<f64>,
}

/// Decodes a config blob body. Never fails: anything unparseable degrades
/// to the defaults with a logged warning, because broken remote config
/// must not disturb the host application.
pub fn parse(body: &[u8]) -> CentralConfig {
    let raw: RawCentralConfig = match serde_json::from_slice(body) {
        Ok(raw) => raw,
        Err(e) => {
            log::warn!("unparseable central config body ({e}), using defaults");
            return CentralConfig::default();
        }
    };

    let recording = match raw.recording.as_deref() {
        Some(text) => match text.parse::<bool>() {
            Ok(flag) => flag,
            Err(_) => {
                log::warn!("unparseable recording flag {text:?}, defaulting to true");
                true
            }
        },
        None => true,
    };

    CentralConfig {
        recording,
        sample_rate: raw.sample_rate,
    }
}
