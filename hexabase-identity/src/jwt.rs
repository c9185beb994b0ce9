//! RS256 signing/verification and key rotation (spec §4.2 "Signing"):
//! "RSA ≥ 2048 (RS256). JWKS exposes all currently valid `kid`s; key
//! rotation requires overlap windows of at least 24h."

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::RwLock;

/// Minimum key size spec §4.2 requires.
const RSA_BITS: usize = 2048;
/// Minimum overlap a retired key stays valid for verification after a new
/// signing key takes over (spec §4.2).
pub const KEY_ROTATION_OVERLAP: Duration = Duration::hours(24);

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("key generation failed: {0}")]
    KeyGen(String),
    #[error("signing failed: {0}")]
    Sign(String),
    #[error("token is malformed or its signature did not verify")]
    Invalid,
    #[error("token has expired")]
    Expired,
    #[error("no signing key is currently available")]
    NoActiveKey,
}

/// One generation of RSA keypair, identified by `kid`. Kept alive for
/// verification until `retire_after` even once superseded as the active
/// signer, so tokens minted just before a rotation keep verifying.
struct KeyGeneration {
    kid: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    modulus_b64: String,
    exponent_b64: String,
    created_at: DateTime<Utc>,
    retire_after: DateTime<Utc>,
}

#[derive(Clone, Serialize)]
pub struct JwkEntry {
    pub kty: &'static str,
    pub alg: &'static str,
    #[serde(rename = "use")]
    pub usage: &'static str,
    pub kid: String,
    pub n: String,
    pub e: String,
}

#[derive(Serialize)]
pub struct Jwks {
    pub keys: Vec<JwkEntry>,
}

/// The broker's signing key material (spec §4.2). A single active signer
/// plus any number of still-valid-for-verification retired generations.
pub struct KeyRing {
    generations: RwLock<Vec<KeyGeneration>>,
}

impl KeyRing {
    /// Generates the first signing key. Real deployments would instead
    /// load/persist keys across restarts; this control plane keeps key
    /// material in-process per the same "never invent a secrets store"
    /// boundary `hexabase-cache` documents for its own trust model.
    pub fn generate() -> Result<Self, JwtError> {
        let ring = Self {
            generations: RwLock::new(Vec::new()),
        };
        ring.rotate()?;
        Ok(ring)
    }

    /// Mints a new signing key, keeping prior generations valid for
    /// verification through [`KEY_ROTATION_OVERLAP`].
    pub fn rotate(&self) -> Result<(), JwtError> {
        let mut rng = rand::rng();
        let private_key =
            RsaPrivateKey::new(&mut rng, RSA_BITS).map_err(|e| JwtError::KeyGen(e.to_string()))?;
        let public_key = private_key.to_public_key();

        let private_pem = private_key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map_err(|e| JwtError::KeyGen(e.to_string()))?;
        let public_pem = public_key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map_err(|e| JwtError::KeyGen(e.to_string()))?;

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::KeyGen(e.to_string()))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| JwtError::KeyGen(e.to_string()))?;

        let now = Utc::now();
        let generation = KeyGeneration {
            kid: uuid::Uuid::new_v4().to_string(),
            encoding_key,
            decoding_key,
            modulus_b64: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            exponent_b64: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
            created_at: now,
            retire_after: now + KEY_ROTATION_OVERLAP,
        };

        let mut generations = self.generations.write().expect("keyring lock poisoned");
        generations.retain(|g| g.retire_after > now);
        generations.push(generation);
        Ok(())
    }

    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        let generations = self.generations.read().expect("keyring lock poisoned");
        let generation = generations.iter().max_by_key(|g| g.created_at).ok_or(JwtError::NoActiveKey)?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(generation.kid.clone());
        jsonwebtoken::encode(&header, claims, &generation.encoding_key).map_err(|e| JwtError::Sign(e.to_string()))
    }

    pub fn verify<T: DeserializeOwned>(&self, token: &str, audience: &str) -> Result<T, JwtError> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| JwtError::Invalid)?;
        let kid = header.kid.ok_or(JwtError::Invalid)?;
        let generations = self.generations.read().expect("keyring lock poisoned");
        let generation = generations
            .iter()
            .find(|g| g.kid == kid && g.retire_after > Utc::now())
            .ok_or(JwtError::Invalid)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[audience]);
        let data = jsonwebtoken::decode::<T>(token, &generation.decoding_key, &validation).map_err(|err| {
            use jsonwebtoken::errors::ErrorKind;
            match err.kind() {
                ErrorKind::ExpiredSignature => JwtError::Expired,
                _ => JwtError::Invalid,
            }
        })?;
        Ok(data.claims)
    }

    /// Every `kid` still valid for verification (spec §4.2 "JWKS exposes
    /// all currently valid `kid`s").
    pub fn jwks(&self) -> Jwks {
        let generations = self.generations.read().expect("keyring lock poisoned");
        let now = Utc::now();
        Jwks {
            keys: generations
                .iter()
                .filter(|g| g.retire_after > now)
                .map(|g| JwkEntry {
                    kty: "RSA",
                    alg: "RS256",
                    usage: "sig",
                    kid: g.kid.clone(),
                    n: g.modulus_b64.clone(),
                    e: g.exponent_b64.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use test_r::test;

    #[derive(Serialize, Deserialize)]
    struct Claims {
        sub: String,
        aud: String,
        exp: i64,
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let ring = KeyRing::generate().unwrap();
        let claims = Claims {
            sub: "user-1".to_string(),
            aud: "hexabase-platform".to_string(),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        };
        let token = ring.sign(&claims).unwrap();
        let decoded: Claims = ring.verify(&token, "hexabase-platform").unwrap();
        assert_eq!(decoded.sub, "user-1");
    }

    #[test]
    fn verify_rejects_wrong_audience() {
        let ring = KeyRing::generate().unwrap();
        let claims = Claims {
            sub: "user-1".to_string(),
            aud: "hexabase-platform".to_string(),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        };
        let token = ring.sign(&claims).unwrap();
        let decoded: Result<Claims, JwtError> = ring.verify(&token, "some-other-audience");
        assert!(matches!(decoded, Err(JwtError::Invalid)));
    }

    #[test]
    fn rotate_keeps_old_key_valid_for_verification() {
        let ring = KeyRing::generate().unwrap();
        let claims = Claims {
            sub: "user-1".to_string(),
            aud: "hexabase-platform".to_string(),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        };
        let token = ring.sign(&claims).unwrap();

        ring.rotate().unwrap();
        // the token signed under the retired key still verifies inside
        // the 24h overlap window.
        let decoded: Claims = ring.verify(&token, "hexabase-platform").unwrap();
        assert_eq!(decoded.sub, "user-1");

        // jwks() reports both the new and the retired-but-overlapping key.
        assert_eq!(ring.jwks().keys.len(), 2);
    }
}
