//! Signing and verification of the JWTs making up an SD-JWT.
//!
//! The engine never holds keys itself: every operation that signs or verifies takes
//! a provider. [`JwkCryptoProvider`] covers the common case of a single [`JWK`].
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use ssi_jwk::{Algorithm, JWK};
use ssi_jws::Header;

use crate::Error;

/// Header parameters set by the caller when signing. `alg` is chosen by the provider.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JwsHeaderParams {
    /// `kid`
    pub key_id: Option<String>,

    /// `typ`
    pub type_: Option<String>,

    pub additional_parameters: BTreeMap<String, Value>,
}

impl JwsHeaderParams {
    pub fn with_type(type_: &str) -> Self {
        JwsHeaderParams {
            type_: Some(type_.to_owned()),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct JwtVerificationResult {
    pub verified: bool,

    /// Why verification failed
    pub message: Option<String>,

    /// Decoded payload of a verified JWT
    pub payload: Option<Value>,
}

impl JwtVerificationResult {
    pub fn success(payload: Option<Value>) -> Self {
        JwtVerificationResult {
            verified: true,
            message: None,
            payload,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        JwtVerificationResult {
            verified: false,
            message: Some(message.into()),
            payload: None,
        }
    }
}

pub trait JwtCryptoProvider {
    /// Sign `payload` (JSON text) and return the compact JWS
    fn sign(&self, payload: &str, header: &JwsHeaderParams) -> Result<String, Error>;

    /// Verify a compact JWS, optionally with the key named `key_id`
    fn verify(&self, jws: &str, key_id: Option<&str>) -> JwtVerificationResult;
}

/// Provider backed by a remote signer or any other suspending key store
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait AsyncJwtCryptoProvider: Sync {
    async fn sign(&self, payload: &str, header: &JwsHeaderParams) -> Result<String, Error>;

    async fn verify(&self, jws: &str, key_id: Option<&str>) -> JwtVerificationResult;
}

/// Provider signing and verifying with a single JWK
#[derive(Clone, Debug)]
pub struct JwkCryptoProvider {
    pub key: JWK,

    /// Overrides the `alg` of the key
    pub algorithm: Option<Algorithm>,
}

impl JwkCryptoProvider {
    pub fn new(key: JWK) -> Self {
        JwkCryptoProvider {
            key,
            algorithm: None,
        }
    }

    pub fn with_algorithm(key: JWK, algorithm: Algorithm) -> Self {
        JwkCryptoProvider {
            key,
            algorithm: Some(algorithm),
        }
    }

    fn algorithm(&self) -> Result<Algorithm, Error> {
        self.algorithm
            .or_else(|| self.key.get_algorithm())
            .ok_or(Error::MissingAlgorithm)
    }
}

impl JwtCryptoProvider for JwkCryptoProvider {
    fn sign(&self, payload: &str, header: &JwsHeaderParams) -> Result<String, Error> {
        let header = Header {
            algorithm: self.algorithm()?,
            key_id: header.key_id.clone().or_else(|| self.key.key_id.clone()),
            type_: header.type_.clone(),
            additional_parameters: header.additional_parameters.clone(),
            ..Default::default()
        };
        Ok(ssi_jws::encode_sign_custom_header(payload, &self.key, &header)?)
    }

    fn verify(&self, jws: &str, key_id: Option<&str>) -> JwtVerificationResult {
        if let (Some(expected), Some(actual)) = (key_id, self.key.key_id.as_deref()) {
            if expected != actual {
                return JwtVerificationResult::failure(format!("unknown key id {expected}"));
            }
        }

        match ssi_jws::decode_verify(jws, &self.key) {
            Ok((header, payload)) => {
                if let Some(algorithm) = self.algorithm {
                    if header.algorithm != algorithm {
                        return JwtVerificationResult::failure("algorithm mismatch");
                    }
                }
                JwtVerificationResult::success(serde_json::from_slice(&payload).ok())
            }
            Err(e) => JwtVerificationResult::failure(e.to_string()),
        }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl AsyncJwtCryptoProvider for JwkCryptoProvider {
    async fn sign(&self, payload: &str, header: &JwsHeaderParams) -> Result<String, Error> {
        JwtCryptoProvider::sign(self, payload, header)
    }

    async fn verify(&self, jws: &str, key_id: Option<&str>) -> JwtVerificationResult {
        JwtCryptoProvider::verify(self, jws, key_id)
    }
}
