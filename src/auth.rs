use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use rand::Rng;

use crate::error::AdmissionError;
use crate::state::{AppState, API_KEY_PREFIX_LEN};
use crate::types::Application;

/// Generates a fresh, opaque API key. 32 bytes of randomness, hex-encoded,
/// prefixed so leaked keys are recognizable in logs and support tickets.
pub fn generate_api_key() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    format!("frn_{}", hex::encode(bytes))
}

pub fn hash_api_key(key: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(key, bcrypt::DEFAULT_COST)
}

pub fn key_prefix(key: &str) -> String {
    key.chars().take(API_KEY_PREFIX_LEN).collect()
}

/// Extractor for the calling `Application`, resolved from the bearer token
/// via the cleartext-prefix index and verified against the stored bcrypt
/// hash. Every handler behind `/v1` except the health check takes this.
pub struct AuthApp(pub Application);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthApp {
    type Rejection = AdmissionError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AdmissionError::Validation("missing Authorization header".to_string()))?;

        if !header.to_ascii_lowercase().starts_with("bearer ") {
            return Err(AdmissionError::Validation("Authorization header is not a bearer token".to_string()));
        }
        let token = header[7..].trim();
        if token.is_empty() {
            return Err(AdmissionError::Validation("empty bearer token".to_string()));
        }

        let prefix = key_prefix(token);
        let app_id = state
            .api_key_index
            .get(&prefix)
            .map(|entry| entry.clone())
            .ok_or(AdmissionError::Validation("invalid api key".to_string()))?;

        let application = state
            .store
            .get_application(&app_id)
            .await?
            .ok_or(AdmissionError::Validation("invalid api key".to_string()))?;

        let verified = bcrypt::verify(token, &application.api_key_hash)
            .map_err(|e| AdmissionError::Validation(format!("api key verification failed: {e}")))?;
        if !verified {
            return Err(AdmissionError::Validation("invalid api key".to_string()));
        }

        Ok(AuthApp(application))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_verify_against_their_own_hash() {
        let key = generate_api_key();
        let hash = hash_api_key(&key).unwrap();
        assert!(bcrypt::verify(&key, &hash).unwrap());
    }

    #[test]
    fn prefix_is_stable_and_bounded() {
        let key = generate_api_key();
        assert_eq!(key_prefix(&key).len(), API_KEY_PREFIX_LEN);
    }
}
