//! Caller identity for the HTTP API
//!
//! Provides:
//! - Reader and author credentials loaded from a JSON file
//! - Password verification using PBKDF2-HMAC-SHA256
//! - Bearer token issue and validation using HMAC-SHA256
//!
//! With authentication disabled the bearer value itself is the caller's
//! username, which keeps local development free of a login step.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::{hmac, pbkdf2, rand as ring_rand};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use storyfork_config::config::AuthConfig;

const PBKDF2_ITERATIONS: NonZeroU32 = match NonZeroU32::new(100_000) {
    Some(n) => n,
    None => panic!("iteration count must be non-zero"),
};

const SALT_LENGTH: usize = 16;
const CREDENTIAL_LENGTH: usize = 32;

/// Usernames accepted as development bearer values
const MAX_USERNAME_CHARS: usize = 64;

/// One entry of the credentials file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCredential {
    pub username: String,
    /// base64(salt + derived key)
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenPayload {
    sub: String,
    iat: u64,
    exp: u64,
    jti: String,
}

#[derive(Clone)]
pub struct AuthService {
    credentials: Arc<HashMap<String, UserCredential>>,
    signing_key: Arc<hmac::Key>,
    token_expiry_secs: u64,
    enabled: bool,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("credentials_count", &self.credentials.len())
            .field("token_expiry_secs", &self.token_expiry_secs)
            .field("enabled", &self.enabled)
            .finish()
    }
}

fn now_secs() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("System time before Unix epoch")?
        .as_secs())
}

impl AuthService {
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        Self::new(
            config.credentials_file.as_deref(),
            config.token_secret.as_deref(),
            config.token_expiry_secs,
            config.enabled,
        )
    }

    /// A missing `token_secret` gets a random key, so tokens do not survive
    /// a restart.
    pub fn new(
        credentials_file: Option<&Path>,
        token_secret: Option<&str>,
        token_expiry_secs: u64,
        enabled: bool,
    ) -> Result<Self> {
        let credentials = match credentials_file {
            Some(path) => Self::load_credentials(path)?,
            None => HashMap::new(),
        };
        if enabled && credentials.is_empty() {
            tracing::warn!("Authentication enabled without credentials; no one can obtain a token");
        }

        let signing_key = match token_secret {
            Some(secret) => hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
            None => {
                let rng = ring_rand::SystemRandom::new();
                hmac::Key::generate(hmac::HMAC_SHA256, &rng)
                    .map_err(|_| anyhow::anyhow!("Failed to generate signing key"))?
            }
        };

        Ok(Self {
            credentials: Arc::new(credentials),
            signing_key: Arc::new(signing_key),
            token_expiry_secs,
            enabled,
        })
    }

    /// Development mode: every bearer value is taken as a username.
    pub fn disabled() -> Self {
        Self {
            credentials: Arc::new(HashMap::new()),
            signing_key: Arc::new(hmac::Key::new(hmac::HMAC_SHA256, b"storyfork-auth-disabled")),
            token_expiry_secs: 0,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn token_expiry_secs(&self) -> u64 {
        self.token_expiry_secs
    }

    fn load_credentials(path: &Path) -> Result<HashMap<String, UserCredential>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file: {}", path.display()))?;
        let credentials: Vec<UserCredential> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse credentials file: {}", path.display()))?;

        let map: HashMap<_, _> = credentials
            .into_iter()
            .map(|cred| (cred.username.clone(), cred))
            .collect();
        tracing::info!("Loaded {} user credentials", map.len());
        Ok(map)
    }

    /// Resolve the caller behind a bearer value.
    pub fn authenticate(&self, bearer: &str) -> Option<String> {
        let bearer = bearer.trim();
        if bearer.is_empty() {
            return None;
        }
        if self.enabled {
            return self.validate_token(bearer);
        }
        (bearer.chars().count() <= MAX_USERNAME_CHARS).then(|| bearer.to_string())
    }

    pub fn verify_password(&self, username: &str, password: &str) -> bool {
        let Some(credential) = self.credentials.get(username) else {
            return false;
        };
        let Ok(stored) = URL_SAFE_NO_PAD.decode(&credential.password_hash) else {
            tracing::warn!(username, "Invalid base64 in password hash");
            return false;
        };
        if stored.len() != SALT_LENGTH + CREDENTIAL_LENGTH {
            tracing::warn!(username, "Invalid password hash length");
            return false;
        }
        let (salt, stored_hash) = stored.split_at(SALT_LENGTH);
        pbkdf2::verify(
            pbkdf2::PBKDF2_HMAC_SHA256,
            PBKDF2_ITERATIONS,
            salt,
            password.as_bytes(),
            stored_hash,
        )
        .is_ok()
    }

    /// Token format: `base64(payload).base64(signature)`
    pub fn generate_token(&self, username: &str) -> Result<String> {
        let now = now_secs()?;
        let payload = TokenPayload {
            sub: username.to_string(),
            iat: now,
            exp: now + self.token_expiry_secs,
            jti: uuid::Uuid::new_v4().to_string(),
        };
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?);
        let signature = hmac::sign(&self.signing_key, payload_b64.as_bytes());
        Ok(format!("{}.{}", payload_b64, URL_SAFE_NO_PAD.encode(signature.as_ref())))
    }

    /// Username of a correctly signed, unexpired token
    pub fn validate_token(&self, token: &str) -> Option<String> {
        let (payload_b64, signature_b64) = token.split_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature_b64).ok()?;
        hmac::verify(&self.signing_key, payload_b64.as_bytes(), &signature).ok()?;

        let payload_json = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
        let payload: TokenPayload = serde_json::from_slice(&payload_json).ok()?;
        if now_secs().ok()? > payload.exp {
            return None;
        }
        Some(payload.sub)
    }

    pub fn hash_password(password: &str) -> Result<String> {
        let rng = ring_rand::SystemRandom::new();
        let mut salt = [0u8; SALT_LENGTH];
        ring_rand::SecureRandom::fill(&rng, &mut salt)
            .map_err(|_| anyhow::anyhow!("Failed to generate salt"))?;

        let mut derived_key = [0u8; CREDENTIAL_LENGTH];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            PBKDF2_ITERATIONS,
            &salt,
            password.as_bytes(),
            &mut derived_key,
        );

        let mut combined = Vec::with_capacity(SALT_LENGTH + CREDENTIAL_LENGTH);
        combined.extend_from_slice(&salt);
        combined.extend_from_slice(&derived_key);
        Ok(URL_SAFE_NO_PAD.encode(&combined))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    /// Always "Bearer"
    pub token_type: String,
    pub expires_in: u64,
}
