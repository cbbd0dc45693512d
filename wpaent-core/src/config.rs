use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Ethernet (14) + EAPOL (4) + EAP header and type (5) + EAP-TLS flags (1)
/// + TLS message length (4). Reserved in every fragment.
pub const FRAGMENT_OVERHEAD: usize = 28;

/// Longest identity or password accepted.
pub const MAX_CREDENTIAL_LEN: usize = 255;

/// EAP type carried on the outer conversation.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OuterMethod {
    Tls,
    Peap,
    Ttls,
}

impl OuterMethod {
    pub fn eap_type(self) -> u8 {
        match self {
            OuterMethod::Tls => 13,
            OuterMethod::Ttls => 21,
            OuterMethod::Peap => 25,
        }
    }

    /// PEAP and TTLS run an inner conversation after the handshake.
    pub fn is_tunneled(self) -> bool {
        !matches!(self, OuterMethod::Tls)
    }

    /// Exporter label for the keying material.
    pub fn key_label(self) -> &'static str {
        match self {
            OuterMethod::Ttls => "ttls keying material",
            OuterMethod::Tls | OuterMethod::Peap => "client EAP encryption",
        }
    }
}

/// Inner (Phase2) method run inside the tunnel.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InnerMethod {
    Mschapv2,
    Leap,
}

impl InnerMethod {
    pub fn eap_type(self) -> u8 {
        match self {
            InnerMethod::Leap => 17,
            InnerMethod::Mschapv2 => 26,
        }
    }
}

/// Network security variant. Decides which half of the MSK becomes the PMK.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityMode {
    Wpa2,
    Wpa3,
    /// Legacy 802.1X with dynamic WEP keys, keyed from the MPPE send half.
    DynamicWep,
}

impl SecurityMode {
    pub fn pmk_range(self) -> std::ops::Range<usize> {
        match self {
            SecurityMode::DynamicWep => 32..64,
            SecurityMode::Wpa2 | SecurityMode::Wpa3 => 0..32,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

// Helper functions for default values
fn default_interface() -> String { "wlan0".to_string() }
fn default_method() -> OuterMethod { OuterMethod::Peap }
fn default_phase2() -> InnerMethod { InnerMethod::Mschapv2 }
fn default_security() -> SecurityMode { SecurityMode::Wpa2 }
fn default_eapol_version() -> u8 { 1 }
fn default_frame_budget() -> usize { 1400 }
fn default_reassembly_capacity() -> usize { 16384 + 2048 }
fn default_identity_timeout_secs() -> u64 { 15 }
fn default_attempt_timeout_secs() -> u64 { 30 }
fn default_handshake_timeout_secs() -> u64 { 25 }
fn default_tunnel_wait_secs() -> u64 { 10 }
fn default_queue_depth() -> usize { 16 }
fn default_max_sessions() -> usize { 4 }
fn default_log_level() -> LogLevel { LogLevel::Info }

/// Per-interface supplicant configuration.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SupplicantConfig {
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default = "default_method")]
    pub method: OuterMethod,
    #[serde(default = "default_phase2")]
    pub phase2: InnerMethod,

    /// Outer identity, sent in clear in the EAP-Response/Identity.
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub password: String,
    /// Identity used inside the tunnel. Falls back to `identity`.
    pub inner_identity: Option<String>,
    pub inner_password: Option<String>,

    #[serde(default = "default_security")]
    pub security: SecurityMode,
    #[serde(default = "default_eapol_version")]
    pub eapol_version: u8,
    /// Largest Ethernet frame we emit, headers included.
    #[serde(default = "default_frame_budget")]
    pub frame_budget: usize,
    #[serde(default = "default_reassembly_capacity")]
    pub reassembly_capacity: usize,

    #[serde(default = "default_identity_timeout_secs")]
    pub identity_timeout_secs: u64,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_tunnel_wait_secs")]
    pub tunnel_wait_secs: u64,

    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// BSSID of the associated AP, `aa:bb:cc:dd:ee:ff`.
    pub peer_bssid: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
}

impl Default for SupplicantConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            method: default_method(),
            phase2: default_phase2(),
            identity: String::new(),
            password: String::new(),
            inner_identity: None,
            inner_password: None,
            security: default_security(),
            eapol_version: default_eapol_version(),
            frame_budget: default_frame_budget(),
            reassembly_capacity: default_reassembly_capacity(),
            identity_timeout_secs: default_identity_timeout_secs(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            tunnel_wait_secs: default_tunnel_wait_secs(),
            queue_depth: default_queue_depth(),
            max_sessions: default_max_sessions(),
            peer_bssid: None,
            log_level: default_log_level(),
        }
    }
}

impl SupplicantConfig {
    /// Reads a TOML file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: SupplicantConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.identity.is_empty() {
            return Err(Error::BadParameter("identity must not be empty".into()));
        }
        let credentials = [
            ("identity", self.identity.as_str()),
            ("password", self.password.as_str()),
            ("inner_identity", self.inner_identity()),
            ("inner_password", self.inner_password()),
        ];
        for (name, value) in credentials {
            if value.len() > MAX_CREDENTIAL_LEN {
                return Err(Error::BadParameter(format!(
                    "{} is longer than {} bytes",
                    name, MAX_CREDENTIAL_LEN
                )));
            }
        }
        if self.method.is_tunneled() && self.inner_password().is_empty() {
            return Err(Error::BadParameter(format!(
                "{:?} needs a password for the inner method",
                self.method
            )));
        }
        if self.frame_budget <= FRAGMENT_OVERHEAD {
            return Err(Error::BadParameter(format!(
                "frame_budget {} leaves no room for TLS data",
                self.frame_budget
            )));
        }
        if self.reassembly_capacity < self.fragment_budget() {
            return Err(Error::BadParameter(
                "reassembly_capacity is smaller than one fragment".into(),
            ));
        }
        if self.identity_timeout_secs == 0
            || self.attempt_timeout_secs == 0
            || self.handshake_timeout_secs == 0
            || self.tunnel_wait_secs == 0
        {
            return Err(Error::BadParameter("timeouts must be non-zero".into()));
        }
        if self.queue_depth == 0 || self.max_sessions == 0 {
            return Err(Error::BadParameter(
                "queue_depth and max_sessions must be non-zero".into(),
            ));
        }
        if let Some(bssid) = &self.peer_bssid {
            if parse_mac(bssid).is_none() {
                return Err(Error::BadParameter(format!("invalid peer_bssid {}", bssid)));
            }
        }
        Ok(())
    }

    /// TLS bytes carried by one EAP-TLS fragment.
    pub fn fragment_budget(&self) -> usize {
        self.frame_budget.saturating_sub(FRAGMENT_OVERHEAD)
    }

    pub fn inner_identity(&self) -> &str {
        self.inner_identity.as_deref().unwrap_or(&self.identity)
    }

    pub fn inner_password(&self) -> &str {
        self.inner_password.as_deref().unwrap_or(&self.password)
    }

    pub fn peer_bssid(&self) -> Option<[u8; 6]> {
        self.peer_bssid.as_deref().and_then(parse_mac)
    }

    pub fn identity_timeout(&self) -> Duration {
        Duration::from_secs(self.identity_timeout_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn tunnel_wait(&self) -> Duration {
        Duration::from_secs(self.tunnel_wait_secs)
    }
}

/// Parses `aa:bb:cc:dd:ee:ff` (or `-` separated).
pub fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = s.split(|c| c == ':' || c == '-');
    for byte in mac.iter_mut() {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}
