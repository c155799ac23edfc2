use std::fmt;
use std::time::Duration;

use anyhow::{Result, anyhow};

/// Default lifetime of an issued access token.
pub const DEFAULT_TOKEN_TTL_MINUTES: u64 = 20;

/// Default upper bound on a credential store lookup.
pub const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 5;

/// Minimum accepted length of the signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Process-wide token signing secret.
///
/// Loaded once at startup. `Debug` never prints the value.
#[derive(Clone)]
pub struct SecretKey(Vec<u8>);

impl SecretKey {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LEN {
            return Err(anyhow!(
                "Secret key must be at least {} bytes (got {})",
                MIN_SECRET_LEN,
                secret.len()
            ));
        }
        Ok(Self(secret))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey(<{} bytes redacted>)", self.0.len())
    }
}

/// Settings for the auth core, built once at startup and injected.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub secret_key: SecretKey,
    pub token_ttl: Duration,
    pub lookup_timeout: Duration,
}

impl AuthSettings {
    /// Settings with default ttl and lookup timeout.
    pub fn new(secret_key: SecretKey) -> Self {
        Self {
            secret_key,
            token_ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_MINUTES * 60),
            lookup_timeout: Duration::from_secs(DEFAULT_LOOKUP_TIMEOUT_SECS),
        }
    }

    /// Set the token ttl from a whole number of minutes.
    ///
    /// Zero is rejected, as is anything that does not fit a claim timestamp.
    pub fn with_token_ttl_minutes(self, minutes: u64) -> Result<Self> {
        if minutes == 0 {
            return Err(anyhow!("Token ttl must be at least one minute"));
        }

        let ttl = minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .filter(|ttl| chrono::Duration::from_std(*ttl).is_ok())
            .ok_or_else(|| anyhow!("Token ttl of {} minutes is out of range", minutes))?;

        Ok(self.with_token_ttl(ttl))
    }

    /// Set the lookup timeout from a whole number of seconds. Zero is rejected.
    pub fn with_lookup_timeout_secs(self, secs: u64) -> Result<Self> {
        if secs == 0 {
            return Err(anyhow!("Lookup timeout must be at least one second"));
        }
        Ok(self.with_lookup_timeout(Duration::from_secs(secs)))
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Token ttl as a signed duration for claim arithmetic.
    pub fn token_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.token_ttl)
            .unwrap_or_else(|_| chrono::Duration::minutes(DEFAULT_TOKEN_TTL_MINUTES as i64))
    }
}
