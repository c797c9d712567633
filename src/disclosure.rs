use base64::URL_SAFE_NO_PAD;
use rand::{CryptoRng, Rng};
use serde_json::Value;

use crate::digest::{hash_encoded_disclosure, SdAlg};
use crate::{Error, ARRAY_CLAIM_ITEM_PROPERTY_NAME, SD_CLAIM_NAME};

const DEFAULT_SALT_SIZE: usize = 128 / 8;

/// A salted claim, as appended to the SD-JWT, together with its digest.
#[derive(Clone, Debug, PartialEq)]
pub struct Disclosure {
    pub salt: String,
    pub kind: DisclosureKind,

    /// Base 64 of disclosure array
    pub encoded: String,

    /// Base 64 of hash of `encoded`
    pub hash: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DisclosureKind {
    Property { name: String, value: Value },
    ArrayItem(Value),
}

impl DisclosureKind {
    pub fn claim_name(&self) -> Option<&str> {
        match self {
            DisclosureKind::Property { name, .. } => Some(name),
            DisclosureKind::ArrayItem(_) => None,
        }
    }

    pub fn claim_value(&self) -> &Value {
        match self {
            DisclosureKind::Property { value, .. } => value,
            DisclosureKind::ArrayItem(value) => value,
        }
    }
}

impl Disclosure {
    /// Create a property style disclosure with a fresh salt
    pub fn new_property(sd_alg: SdAlg, name: &str, value: Value) -> Result<Self, Error> {
        Self::with_rng(&mut rand::rngs::OsRng {}, sd_alg, Some(name), value)
    }

    /// Create an array style disclosure with a fresh salt
    pub fn new_array_item(sd_alg: SdAlg, value: Value) -> Result<Self, Error> {
        Self::with_rng(&mut rand::rngs::OsRng {}, sd_alg, None, value)
    }

    pub fn with_rng<Rand: Rng + CryptoRng>(
        rng: &mut Rand,
        sd_alg: SdAlg,
        claim_name: Option<&str>,
        value: Value,
    ) -> Result<Self, Error> {
        let salt = generate_salt(rng);
        Self::with_salt(sd_alg, salt, claim_name, value)
    }

    /// Build a disclosure from a caller chosen salt. Only meant for reproducing
    /// known vectors: salts must otherwise be fresh and random.
    pub fn with_salt(
        sd_alg: SdAlg,
        salt: String,
        claim_name: Option<&str>,
        value: Value,
    ) -> Result<Self, Error> {
        let encoded = encode_disclosure_with_salt(&salt, claim_name, &value)?;
        let hash = hash_encoded_disclosure(sd_alg, &encoded);
        let kind = match claim_name {
            Some(name) => DisclosureKind::Property {
                name: name.to_owned(),
                value,
            },
            None => DisclosureKind::ArrayItem(value),
        };

        Ok(Disclosure {
            salt,
            kind,
            encoded,
            hash,
        })
    }

    /// Decode a disclosure as found on the wire. The digest is taken over `encoded`
    /// verbatim, never over a re-encoding.
    pub fn parse(encoded: &str, sd_alg: SdAlg) -> Result<Self, Error> {
        let bytes = base64::decode_config(encoded, URL_SAFE_NO_PAD)
            .map_err(|_| Error::MalformedDisclosure("not base64url"))?;
        let json: Value = serde_json::from_slice(&bytes)
            .map_err(|_| Error::MalformedDisclosure("not JSON"))?;

        let (salt, kind) = match json {
            Value::Array(values) => match values.as_slice() {
                [salt, name, value] => validate_property_disclosure(salt, name, value)?,
                [salt, value] => validate_array_item_disclosure(salt, value)?,
                _ => return Err(Error::MalformedDisclosure("array must have 2 or 3 items")),
            },
            _ => return Err(Error::MalformedDisclosure("not a JSON array")),
        };

        Ok(Disclosure {
            salt,
            kind,
            encoded: encoded.to_owned(),
            hash: hash_encoded_disclosure(sd_alg, encoded),
        })
    }

    pub fn claim_name(&self) -> Option<&str> {
        self.kind.claim_name()
    }

    pub fn claim_value(&self) -> &Value {
        self.kind.claim_value()
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl std::fmt::Display for Disclosure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encoded)
    }
}

/// 128 bits from `rng`, base64url encoded
pub fn generate_salt<Rand: Rng + CryptoRng>(rng: &mut Rand) -> String {
    let mut salt_bytes = [0u8; DEFAULT_SALT_SIZE];

    rng.fill_bytes(&mut salt_bytes);

    base64::encode_config(salt_bytes, URL_SAFE_NO_PAD)
}

fn encode_disclosure_with_salt(
    salt: &str,
    claim_name: Option<&str>,
    claim_value: &Value,
) -> Result<String, serde_json::Error> {
    let disclosure = match claim_name {
        Some(claim_name) => serde_json::json!([salt, claim_name, claim_value]),
        None => serde_json::json!([salt, claim_value]),
    };

    let json_string = serde_json::to_string(&disclosure)?;

    Ok(base64::encode_config(json_string, URL_SAFE_NO_PAD))
}

fn validate_property_disclosure(
    salt: &Value,
    name: &Value,
    value: &Value,
) -> Result<(String, DisclosureKind), Error> {
    let salt = salt
        .as_str()
        .ok_or(Error::MalformedDisclosure("salt is not a string"))?;

    let name = name
        .as_str()
        .ok_or(Error::MalformedDisclosure("claim name is not a string"))?;

    if name == SD_CLAIM_NAME || name == ARRAY_CLAIM_ITEM_PROPERTY_NAME {
        return Err(Error::MalformedDisclosure("reserved claim name"));
    }

    Ok((
        salt.to_owned(),
        DisclosureKind::Property {
            name: name.to_owned(),
            value: value.clone(),
        },
    ))
}

fn validate_array_item_disclosure(
    salt: &Value,
    value: &Value,
) -> Result<(String, DisclosureKind), Error> {
    let salt = salt
        .as_str()
        .ok_or(Error::MalformedDisclosure("salt is not a string"))?;

    Ok((salt.to_owned(), DisclosureKind::ArrayItem(value.clone())))
}
