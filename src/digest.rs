use base64::URL_SAFE_NO_PAD;
use rand::{CryptoRng, Rng};
use serde_json::{Map, Value};
use sha2::Digest;

use crate::disclosure::generate_salt;
use crate::{Error, SD_ALG_CLAIM_NAME};

/// Hash algorithm used to digest disclosures, named by the `_sd_alg` claim
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SdAlg {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl SdAlg {
    const SHA256_STR: &'static str = "sha-256";
    const SHA384_STR: &'static str = "sha-384";
    const SHA512_STR: &'static str = "sha-512";
}

impl SdAlg {
    pub fn to_str(&self) -> &'static str {
        match self {
            SdAlg::Sha256 => Self::SHA256_STR,
            SdAlg::Sha384 => Self::SHA384_STR,
            SdAlg::Sha512 => Self::SHA512_STR,
        }
    }

    /// Read the algorithm from the `_sd_alg` claim of an undisclosed payload.
    ///
    /// A payload without `_sd_alg` uses SHA-256.
    pub fn from_claims(claims: &Map<String, Value>) -> Result<Self, Error> {
        match claims.get(SD_ALG_CLAIM_NAME) {
            None => Ok(SdAlg::default()),
            Some(Value::String(name)) => SdAlg::try_from(name.as_str()),
            Some(_) => Err(Error::SdAlgWrongType),
        }
    }

    /// Base64url (unpadded) digest of arbitrary bytes
    pub fn digest_b64(&self, data: &[u8]) -> String {
        let digest = match self {
            SdAlg::Sha256 => sha2::Sha256::digest(data).to_vec(),
            SdAlg::Sha384 => sha2::Sha384::digest(data).to_vec(),
            SdAlg::Sha512 => sha2::Sha512::digest(data).to_vec(),
        };
        base64::encode_config(digest, URL_SAFE_NO_PAD)
    }
}

impl TryFrom<&str> for SdAlg {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ok(match value {
            Self::SHA256_STR => SdAlg::Sha256,
            Self::SHA384_STR => SdAlg::Sha384,
            Self::SHA512_STR => SdAlg::Sha512,
            other => return Err(Error::UnknownSdAlg(other.to_owned())),
        })
    }
}

impl From<SdAlg> for &'static str {
    fn from(value: SdAlg) -> Self {
        value.to_str()
    }
}

impl std::fmt::Display for SdAlg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_str())
    }
}

/// Digest of an encoded disclosure, computed over its ASCII bytes exactly as they
/// appear on the wire.
pub fn hash_encoded_disclosure(digest_algo: SdAlg, disclosure: &str) -> String {
    digest_algo.digest_b64(disclosure.as_bytes())
}

/// `sd_hash` of a presentation: the digest of the issuer JWT and the selected
/// disclosures, including the trailing `~`.
pub fn hash_presentation(digest_algo: SdAlg, presentation: &str) -> String {
    digest_algo.digest_b64(presentation.as_bytes())
}

/// A digest with no disclosure behind it, indistinguishable from a real one.
pub fn decoy_digest<Rand: Rng + CryptoRng>(rng: &mut Rand, digest_algo: SdAlg) -> String {
    digest_algo.digest_b64(generate_salt(rng).as_bytes())
}
