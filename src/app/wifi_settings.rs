//! Wi-Fi station override record.
//!
//! Persisted as a fixed 99-byte record:
//!
//! | Offset | Len | Field                                  |
//! |--------|-----|----------------------------------------|
//! | 0      | 33  | SSID, NUL terminated (1–32 bytes)      |
//! | 33     | 65  | password, NUL terminated (0–64 bytes)  |
//! | 98     | 1   | hidden network flag (0 or 1)           |
//!
//! Unused bytes are zero. Decoding validates every field instead of
//! trusting the stored bytes.

use core::fmt;

use heapless::String;

pub const SSID_FIELD_LEN: usize = 33;
pub const PASSWORD_FIELD_LEN: usize = 65;
pub const RECORD_LEN: usize = SSID_FIELD_LEN + PASSWORD_FIELD_LEN + 1;

/// Longest SSID accepted (802.11 limit).
pub const MAX_SSID_LEN: usize = SSID_FIELD_LEN - 1;
/// Longest passphrase accepted (WPA2 limit).
pub const MAX_PASSWORD_LEN: usize = PASSWORD_FIELD_LEN - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiSettingsError {
    WrongLength(usize),
    EmptySsid,
    SsidTooLong,
    PasswordTooLong,
    /// Field contains a NUL byte or is not NUL terminated.
    BadTerminator,
    InvalidUtf8,
    BadHiddenFlag(u8),
}

impl fmt::Display for WifiSettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongLength(n) => write!(f, "record is {} bytes, expected {}", n, RECORD_LEN),
            Self::EmptySsid => write!(f, "SSID is empty"),
            Self::SsidTooLong => write!(f, "SSID longer than {} bytes", MAX_SSID_LEN),
            Self::PasswordTooLong => {
                write!(f, "password longer than {} bytes", MAX_PASSWORD_LEN)
            }
            Self::BadTerminator => write!(f, "field is not NUL terminated"),
            Self::InvalidUtf8 => write!(f, "field is not valid UTF-8"),
            Self::BadHiddenFlag(b) => write!(f, "hidden flag {} is not 0 or 1", b),
        }
    }
}

/// Station override credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiSettings {
    pub ssid: String<MAX_SSID_LEN>,
    pub password: String<MAX_PASSWORD_LEN>,
    pub hidden: bool,
}

impl WifiSettings {
    pub fn new(ssid: &str, password: &str, hidden: bool) -> Result<Self, WifiSettingsError> {
        if ssid.is_empty() {
            return Err(WifiSettingsError::EmptySsid);
        }
        if ssid.contains('\0') || password.contains('\0') {
            return Err(WifiSettingsError::BadTerminator);
        }
        let ssid = String::try_from(ssid).map_err(|()| WifiSettingsError::SsidTooLong)?;
        let password =
            String::try_from(password).map_err(|()| WifiSettingsError::PasswordTooLong)?;
        Ok(Self {
            ssid,
            password,
            hidden,
        })
    }

    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[..self.ssid.len()].copy_from_slice(self.ssid.as_bytes());
        let pw = &mut out[SSID_FIELD_LEN..SSID_FIELD_LEN + PASSWORD_FIELD_LEN];
        pw[..self.password.len()].copy_from_slice(self.password.as_bytes());
        out[RECORD_LEN - 1] = u8::from(self.hidden);
        out
    }

    pub fn decode(raw: &[u8]) -> Result<Self, WifiSettingsError> {
        if raw.len() != RECORD_LEN {
            return Err(WifiSettingsError::WrongLength(raw.len()));
        }
        let ssid = c_field(&raw[..SSID_FIELD_LEN])?;
        if ssid.is_empty() {
            return Err(WifiSettingsError::EmptySsid);
        }
        let password = c_field(&raw[SSID_FIELD_LEN..SSID_FIELD_LEN + PASSWORD_FIELD_LEN])?;
        let hidden = match raw[RECORD_LEN - 1] {
            0 => false,
            1 => true,
            other => return Err(WifiSettingsError::BadHiddenFlag(other)),
        };
        Self::new(ssid, password, hidden)
    }

    /// The record written to clear an override.
    pub const fn cleared_record() -> [u8; RECORD_LEN] {
        [0u8; RECORD_LEN]
    }
}

/// Text up to the first NUL; the field must contain one.
fn c_field(field: &[u8]) -> Result<&str, WifiSettingsError> {
    let end = field
        .iter()
        .position(|&b| b == 0)
        .ok_or(WifiSettingsError::BadTerminator)?;
    core::str::from_utf8(&field[..end]).map_err(|_| WifiSettingsError::InvalidUtf8)
}

// ── Preference keys ───────────────────────────────────────────

/// 32-bit FNV-1 hash used to derive preference keys from names.
pub fn fnv1_hash(s: &str) -> u32 {
    s.bytes().fold(2_166_136_261_u32, |hash, b| {
        hash.wrapping_mul(16_777_619) ^ u32::from(b)
    })
}

/// Preference key of the override record. Salted with the build
/// timestamp so a freshly flashed image ignores older overrides.
pub fn preference_key(build_timestamp: &str) -> u32 {
    let mut name = std::string::String::from("wifi_settings#");
    name.push_str(build_timestamp);
    fnv1_hash(&name)
}
