//! Devices, the shared credential, and the inventory file format.
//!
//! An inventory holds one device per line: the connection address followed by
//! the prompt identity the device shows at its privileged shell, e.g.
//!
//! ```text
//! 10.0.0.1 router1
//! 10.0.0.2 core-sw2
//! ```
//!
//! A device counts as finished once its output ends with `<prompt identity>#`.

use std::fmt;
use std::path::Path;

use log::trace;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::GatherError;

/// Terminal noise that may precede or decorate a prompt: leading carriage
/// returns or backspaces, and ANSI control sequences.
pub static PROMPT_NOISE: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|^[\r\u{8}]+") {
        Ok(re) => re,
        Err(err) => panic!("invalid PROMPT_NOISE regex: {err}"),
    });

/// One remote host to query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Host name or IP address to connect to.
    pub address: String,
    /// Prompt identity; the device is done when `<prompt_identity>#` reappears.
    pub prompt_identity: String,
}

impl Device {
    pub fn new(address: impl Into<String>, prompt_identity: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            prompt_identity: prompt_identity.into(),
        }
    }

    /// The full prompt that marks the end of the command batch.
    pub fn expected_prompt(&self) -> String {
        format!("{}#", self.prompt_identity)
    }

    /// Returns true when `line`, trimmed and stripped of terminal noise, is
    /// exactly this device's privileged prompt.
    pub fn is_prompt(&self, line: &str) -> bool {
        let cleaned = PROMPT_NOISE.replace_all(line, "");
        cleaned.trim().strip_suffix('#') == Some(self.prompt_identity.as_str())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.prompt_identity)
    }
}

/// Username and password applied to every device in a run.
#[derive(Clone)]
pub struct Credential {
    username: String,
    secret: Zeroizing<String>,
}

impl Credential {
    /// Builds a credential, rejecting an empty secret.
    pub fn new(
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<Self, GatherError> {
        Self::from_secret(username, Zeroizing::new(secret.into()))
    }

    /// Builds a credential from a secret that is already held in wiped memory.
    pub fn from_secret(
        username: impl Into<String>,
        secret: Zeroizing<String>,
    ) -> Result<Self, GatherError> {
        if secret.is_empty() {
            return Err(GatherError::EmptySecret);
        }
        Ok(Self {
            username: username.into(),
            secret,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Parses inventory text into devices.
///
/// Every line up to the last non-blank one must name a device; tokens past
/// the second are ignored. A blank line inside the inventory or a line with a
/// single token fails the whole inventory. Blank lines after the last device
/// are tolerated.
pub fn parse_inventory(text: &str) -> Result<Vec<Device>, GatherError> {
    let lines = text.lines().collect::<Vec<_>>();
    let used = lines
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map_or(0, |last| last + 1);

    let mut devices = Vec::with_capacity(used);
    for (idx, raw) in lines[..used].iter().enumerate() {
        let line = raw.trim();
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(address), Some(prompt_identity)) => {
                trace!("inventory line {}: {} {}", idx + 1, address, prompt_identity);
                devices.push(Device::new(address, prompt_identity));
            }
            _ => {
                return Err(GatherError::MalformedInventoryLine {
                    line: idx + 1,
                    content: line.to_string(),
                });
            }
        }
    }
    Ok(devices)
}

/// Reads and parses an inventory file.
pub fn read_inventory(path: impl AsRef<Path>) -> Result<Vec<Device>, GatherError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| GatherError::InventoryIo {
        path: path.to_path_buf(),
        source,
    })?;
    parse_inventory(&text)
}
