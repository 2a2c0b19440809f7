//! Kalshi API request signing.
//!
//! Every authenticated request carries three headers: the API key id, a
//! millisecond timestamp, and an RSA-PSS (SHA-256, MGF1-SHA256,
//! digest-length salt) signature over `"<ms><METHOD><path>"`, base64
//! encoded. Header providers call [`KalshiAuth::build_headers`] per
//! connection attempt so the timestamp is always current.

use crate::infrastructure::config::KalshiApiConfig;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::pss::SigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::RsaPrivateKey;
use sha2::Sha256;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Failed to read private key: {0}")]
    KeyRead(#[from] std::io::Error),

    #[error("Failed to parse private key: {0}")]
    KeyParse(String),
}

/// Request signer holding the parsed private key
pub struct KalshiAuth {
    key_id: String,
    signing_key: SigningKey<Sha256>,
}

impl KalshiAuth {
    /// Build a signer from configured credentials. The key material may be
    /// a filesystem path or inline PEM (with literal `\n` escapes).
    pub fn from_config(config: &KalshiApiConfig) -> Result<Self, AuthError> {
        if config.api_key_id.trim().is_empty() {
            return Err(AuthError::MissingCredentials(
                "KALSHI_API_KEY_ID is not set".to_string(),
            ));
        }
        let material = config.private_key_material.trim();
        if material.is_empty() {
            return Err(AuthError::MissingCredentials(
                "set KALSHI_PRIVATE_KEY_PATH or KALSHI_API_KEY_SECRET".to_string(),
            ));
        }
        let pem = if Path::new(material).is_file() {
            std::fs::read_to_string(material)?
        } else {
            material.to_string()
        };
        let pem = if pem.contains("\\n") && pem.contains("-----BEGIN") {
            pem.replace("\\n", "\n")
        } else {
            pem
        };
        let private_key = parse_private_key(&pem)?;
        Ok(Self {
            key_id: config.api_key_id.trim().to_string(),
            signing_key: SigningKey::<Sha256>::new(private_key),
        })
    }

    /// Sign `"<timestamp_ms><METHOD><path>"` and return the base64 text.
    pub fn sign(&self, timestamp_ms: i64, method: &str, path: &str) -> String {
        let message = format!("{timestamp_ms}{}{path}", method.to_uppercase());
        let mut rng = rand::thread_rng();
        let signature = self
            .signing_key
            .sign_with_rng(&mut rng, message.as_bytes());
        BASE64.encode(signature.to_bytes())
    }

    /// Headers for one request (or WebSocket upgrade) signed at call time.
    pub fn build_headers(&self, method: &str, path: &str) -> HashMap<String, String> {
        let timestamp_ms = Utc::now().timestamp_millis();
        let signature = self.sign(timestamp_ms, method, path);
        HashMap::from([
            ("KALSHI-ACCESS-KEY".to_string(), self.key_id.clone()),
            (
                "KALSHI-ACCESS-TIMESTAMP".to_string(),
                timestamp_ms.to_string(),
            ),
            ("KALSHI-ACCESS-SIGNATURE".to_string(), signature),
        ])
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, AuthError> {
    if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
        return Ok(key);
    }
    RsaPrivateKey::from_pkcs1_pem(pem)
        .map_err(|e| AuthError::KeyParse(format!("neither PKCS#8 nor PKCS#1 PEM: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::EncodePrivateKey;

    fn test_config(material: String) -> KalshiApiConfig {
        KalshiApiConfig {
            api_key_id: "test-key-id".to_string(),
            private_key_material: material,
            ..KalshiApiConfig::default()
        }
    }

    fn generate_pem() -> String {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        key.to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap()
            .to_string()
    }

    #[test]
    fn signs_with_inline_pem() {
        let auth = KalshiAuth::from_config(&test_config(generate_pem())).unwrap();
        let headers = auth.build_headers("GET", "/trade-api/ws/v2");
        assert_eq!(headers.get("KALSHI-ACCESS-KEY").unwrap(), "test-key-id");
        assert!(headers.contains_key("KALSHI-ACCESS-TIMESTAMP"));
        let signature = headers.get("KALSHI-ACCESS-SIGNATURE").unwrap();
        assert!(BASE64.decode(signature).is_ok());
    }

    #[test]
    fn signatures_differ_per_timestamp() {
        let auth = KalshiAuth::from_config(&test_config(generate_pem())).unwrap();
        let first = auth.sign(1_700_000_000_000, "GET", "/trade-api/v2/markets");
        let second = auth.sign(1_700_000_000_001, "GET", "/trade-api/v2/markets");
        assert_ne!(first, second);
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let config = KalshiApiConfig::default();
        assert!(matches!(
            KalshiAuth::from_config(&config),
            Err(AuthError::MissingCredentials(_))
        ));
        let config = test_config(String::new());
        assert!(KalshiAuth::from_config(&config).is_err());
    }

    #[test]
    fn key_from_file_path() {
        let pem = generate_pem();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kalshi.pem");
        std::fs::write(&path, pem).unwrap();
        let auth =
            KalshiAuth::from_config(&test_config(path.to_string_lossy().to_string())).unwrap();
        assert_eq!(auth.key_id(), "test-key-id");
    }
}
