//! How strict a run is about the SSH transport.
//!
//! One [`SecurityLevel`] picks both the algorithm lists offered during key
//! exchange and whether host keys are checked against `~/.ssh/known_hosts`.

use std::borrow::Cow;

use async_ssh2_tokio::ServerCheckMethod;
use russh::keys::Algorithm;
use russh::{Preferred, cipher, kex, mac};
use serde::{Deserialize, Serialize};

use crate::config;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Modern algorithms only, host keys verified.
    Secure,
    /// Modern algorithms plus widely deployed SHA-1 era fallbacks, host keys verified.
    Balanced,
    /// Everything older network gear may still speak. Host keys are not checked.
    #[default]
    LegacyCompatible,
}

/// Algorithm lists offered for one security level, most preferred first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmSet {
    pub kex: &'static [kex::Name],
    pub host_keys: &'static [Algorithm],
    pub ciphers: &'static [cipher::Name],
    pub macs: &'static [mac::Name],
}

impl AlgorithmSet {
    fn to_preferred(self) -> Preferred {
        Preferred {
            kex: Cow::Borrowed(self.kex),
            key: Cow::Borrowed(self.host_keys),
            cipher: Cow::Borrowed(self.ciphers),
            mac: Cow::Borrowed(self.macs),
            compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
        }
    }
}

impl SecurityLevel {
    pub fn algorithms(self) -> AlgorithmSet {
        match self {
            Self::Secure => AlgorithmSet {
                kex: config::SECURE_KEX_ORDER,
                host_keys: config::SECURE_KEY_TYPES,
                ciphers: config::SECURE_CIPHERS,
                macs: config::SECURE_MAC_ALGORITHMS,
            },
            Self::Balanced => AlgorithmSet {
                kex: config::BALANCED_KEX_ORDER,
                host_keys: config::BALANCED_KEY_TYPES,
                ciphers: config::BALANCED_CIPHERS,
                macs: config::BALANCED_MAC_ALGORITHMS,
            },
            Self::LegacyCompatible => AlgorithmSet {
                kex: config::LEGACY_KEX_ORDER,
                host_keys: config::LEGACY_KEY_TYPES,
                ciphers: config::LEGACY_CIPHERS,
                macs: config::LEGACY_MAC_ALGORITHMS,
            },
        }
    }

    pub fn verifies_host_keys(self) -> bool {
        !matches!(self, Self::LegacyCompatible)
    }

    pub(super) fn preferred(self) -> Preferred {
        self.algorithms().to_preferred()
    }

    pub(super) fn server_check(self) -> ServerCheckMethod {
        if self.verifies_host_keys() {
            ServerCheckMethod::DefaultKnownHostsFile
        } else {
            ServerCheckMethod::NoCheck
        }
    }
}
