//! Time-based one-time passwords (RFC 6238) on top of HOTP truncation
//! (RFC 4226). Secrets travel as unpadded RFC 4648 Base32, the form
//! authenticator apps expect inside an `otpauth://` URI.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
use thiserror::Error;

pub const DEFAULT_DIGITS: u32 = 6;
pub const DEFAULT_PERIOD: u64 = 30;
/// Largest clock-skew window, in steps on each side, a deployment may configure.
pub const MAX_WINDOW: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TotpError {
    #[error("secret length must be > 0")]
    EmptySecretLength,
    #[error("digits must be between 6 and 10, got {0}")]
    InvalidDigits(u32),
    #[error("period must be > 0")]
    InvalidPeriod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    /// Name used in the `algorithm` parameter of an otpauth URI.
    pub fn uri_name(self) -> &'static str {
        match self {
            Algorithm::Sha1 => "SHA1",
            Algorithm::Sha256 => "SHA256",
            Algorithm::Sha512 => "SHA512",
        }
    }

    fn mac(self, key: &[u8], message: &[u8]) -> Vec<u8> {
        match self {
            Algorithm::Sha1 => {
                let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key)
                    .expect("HMAC accepts keys of any length");
                mac.update(message);
                mac.finalize().into_bytes().to_vec()
            }
            Algorithm::Sha256 => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
                    .expect("HMAC accepts keys of any length");
                mac.update(message);
                mac.finalize().into_bytes().to_vec()
            }
            Algorithm::Sha512 => {
                let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(key)
                    .expect("HMAC accepts keys of any length");
                mac.update(message);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotpParams {
    pub digits: u32,
    pub period: u64,
    pub algorithm: Algorithm,
}

impl Default for TotpParams {
    fn default() -> Self {
        Self {
            digits: DEFAULT_DIGITS,
            period: DEFAULT_PERIOD,
            algorithm: Algorithm::Sha1,
        }
    }
}

impl TotpParams {
    fn validate(&self) -> Result<(), TotpError> {
        if !(6..=10).contains(&self.digits) {
            return Err(TotpError::InvalidDigits(self.digits));
        }
        if self.period == 0 {
            return Err(TotpError::InvalidPeriod);
        }
        Ok(())
    }
}

/// Generate a random Base32 secret from `num_bytes` CSPRNG bytes (20 is customary).
pub fn generate_secret(num_bytes: usize) -> Result<String, TotpError> {
    if num_bytes == 0 {
        return Err(TotpError::EmptySecretLength);
    }
    let mut bytes = vec![0u8; num_bytes];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    Ok(data_encoding::BASE32_NOPAD.encode(&bytes))
}

/// Compute the code for `secret` at Unix time `unix_seconds`.
pub fn code_at(secret: &str, unix_seconds: u64, params: &TotpParams) -> Result<String, TotpError> {
    params.validate()?;
    let key = decode_secret(secret);
    let counter = unix_seconds / params.period;
    let hash = params.algorithm.mac(&key, &counter.to_be_bytes());

    // Dynamic truncation
    let offset = (hash[hash.len() - 1] & 0x0f) as usize;
    let binary = (u64::from(hash[offset] & 0x7f) << 24)
        | (u64::from(hash[offset + 1]) << 16)
        | (u64::from(hash[offset + 2]) << 8)
        | u64::from(hash[offset + 3]);

    let otp = binary % 10u64.pow(params.digits);
    Ok(format!("{:0width$}", otp, width = params.digits as usize))
}

/// Current code with default parameters.
pub fn current_code(secret: &str) -> Result<String, TotpError> {
    code_at(secret, unix_now(), &TotpParams::default())
}

/// Check `code` against the current time, tolerating `window` steps of clock skew.
pub fn verify_code(secret: &str, code: &str, window: u32) -> bool {
    verify_code_at(secret, code, window, unix_now(), &TotpParams::default())
}

pub fn verify_code_at(
    secret: &str,
    code: &str,
    window: u32,
    unix_seconds: u64,
    params: &TotpParams,
) -> bool {
    let code = code.trim();
    if code.is_empty() || params.validate().is_err() {
        return false;
    }
    let window = i64::from(window);
    let period = i64::try_from(params.period).unwrap_or(i64::MAX);
    let mut matched = false;
    for step in -window..=window {
        let Some(offset) = step.checked_mul(period) else {
            continue;
        };
        let Some(t) = unix_seconds.checked_add_signed(offset) else {
            continue;
        };
        if let Ok(candidate) = code_at(secret, t, params) {
            // keep scanning after a hit so timing does not reveal which step matched
            matched |= bool::from(candidate.as_bytes().ct_eq(code.as_bytes()));
        }
    }
    matched
}

/// Build the Key URI that authenticator apps scan.
pub fn otpauth_uri(issuer: &str, account: &str, secret: &str, params: &TotpParams) -> String {
    let label = if issuer.is_empty() {
        urlencoding::encode(account).into_owned()
    } else {
        urlencoding::encode(&format!("{issuer}:{account}")).into_owned()
    };
    format!(
        "otpauth://totp/{label}?secret={secret}&issuer={issuer}&period={period}&digits={digits}&algorithm={algorithm}",
        issuer = urlencoding::encode(issuer),
        period = params.period,
        digits = params.digits,
        algorithm = params.algorithm.uri_name(),
    )
}

/// Lenient Base32 decode: case-insensitive, ignores padding, whitespace, dashes
/// and anything else outside the alphabet. Trailing partial bits are dropped.
fn decode_secret(secret: &str) -> Vec<u8> {
    let cleaned: String = secret
        .chars()
        .filter_map(|c| {
            let c = c.to_ascii_uppercase();
            matches!(c, 'A'..='Z' | '2'..='7').then_some(c)
        })
        .collect();

    let mut spec = data_encoding::BASE32_NOPAD.specification();
    spec.check_trailing_bits = false;
    let Ok(encoding) = spec.encoding() else {
        return Vec::new();
    };

    // Lengths that cannot come from whole bytes are rejected; trim the
    // trailing chars that only carry leftover bits.
    let mut end = cleaned.len();
    while end > 0 {
        if let Ok(bytes) = encoding.decode(cleaned[..end].as_bytes()) {
            return bytes;
        }
        end -= 1;
    }
    Vec::new()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
