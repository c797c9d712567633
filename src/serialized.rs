use base64::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};

use crate::Error;

const SEPARATOR: char = '~';

/// Segments of an SD-JWT in compact serialization
#[derive(Debug, PartialEq)]
pub struct SerializedSdJwt<'a> {
    /// Issuer signed JWT
    pub jwt: &'a str,

    /// Encoded disclosures, in order of appearance
    pub disclosures: Vec<&'a str>,

    /// Key binding JWT, the segment after the last `~`
    pub key_binding_jwt: Option<&'a str>,

    /// Everything preceding the key binding JWT, trailing `~` included
    pub sd_jwt_prefix: Option<&'a str>,
}

/// Join an SD-JWT into its compact serialization.
///
/// Only an issued token without disclosures, not meant as a presentation, is emitted
/// as the bare JWT. Everything else ends in `~`, followed by the key binding JWT if any.
pub fn serialize_string_format(
    jwt: &str,
    disclosures: &[&str],
    key_binding_jwt: Option<&str>,
    is_presentation: bool,
) -> String {
    if disclosures.is_empty() && key_binding_jwt.is_none() && !is_presentation {
        return jwt.to_owned();
    }

    let mut serialized = String::from(jwt);
    serialized.push(SEPARATOR);
    for disclosure in disclosures {
        serialized.push_str(disclosure);
        serialized.push(SEPARATOR);
    }
    if let Some(key_binding_jwt) = key_binding_jwt {
        serialized.push_str(key_binding_jwt);
    }
    serialized
}

/// Split a compact serialization into its segments.
///
/// A non-empty last segment is the key binding JWT when it has the shape of a JWT, and
/// an unterminated disclosure otherwise.
pub fn deserialize_string_format(serialized: &str) -> Result<SerializedSdJwt<'_>, Error> {
    let mut segments = serialized.split(SEPARATOR);

    let jwt = match segments.next() {
        Some(jwt) if !jwt.is_empty() => jwt,
        _ => return Err(Error::InvalidWireFormat("missing issuer JWT".to_owned())),
    };

    let mut disclosures: Vec<&str> = segments.collect();
    let mut key_binding_jwt = None;
    let mut sd_jwt_prefix = None;

    match disclosures.pop() {
        None | Some("") => {}
        Some(last) if last.contains('.') => {
            key_binding_jwt = Some(last);
            sd_jwt_prefix = Some(&serialized[..serialized.len() - last.len()]);
        }
        Some(last) => {
            log::debug!("SD-JWT is missing its terminating separator");
            disclosures.push(last);
        }
    }

    if disclosures.iter().any(|disclosure| disclosure.is_empty()) {
        return Err(Error::InvalidWireFormat("empty disclosure".to_owned()));
    }

    Ok(SerializedSdJwt {
        jwt,
        disclosures,
        key_binding_jwt,
        sd_jwt_prefix,
    })
}

/// Decode the header and payload of a compact JWS without checking its signature.
///
/// The signature part may only be empty or absent if `allow_missing_signature` is set.
pub(crate) fn decode_jws_unverified(
    jws: &str,
    allow_missing_signature: bool,
) -> Result<(Map<String, Value>, Map<String, Value>), Error> {
    let parts: Vec<&str> = jws.split('.').collect();
    let (header, payload) = match parts.as_slice() {
        [header, payload, signature] if allow_missing_signature || !signature.is_empty() => {
            (header, payload)
        }
        [header, payload] if allow_missing_signature => (header, payload),
        _ => {
            return Err(Error::InvalidWireFormat(format!(
                "expected a signed JWT, found {} parts",
                parts.len()
            )))
        }
    };

    Ok((decode_json_object(header)?, decode_json_object(payload)?))
}

fn decode_json_object(encoded: &str) -> Result<Map<String, Value>, Error> {
    let bytes = base64::decode_config(encoded, URL_SAFE_NO_PAD)
        .map_err(|e| Error::InvalidWireFormat(e.to_string()))?;
    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err(Error::InvalidWireFormat("not a JSON object".to_owned())),
        Err(e) => Err(Error::InvalidWireFormat(e.to_string())),
    }
}
