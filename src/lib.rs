//! Selective Disclosure JWTs.
//!
//! Issue an SD-JWT from a full claim set and an [`SdMap`], present a subset of its
//! disclosures (optionally with a key binding JWT), and verify a received SD-JWT,
//! reporting signature and disclosure integrity separately.
pub mod crypto;
pub(crate) mod decode;
pub(crate) mod digest;
pub(crate) mod disclosure;
pub(crate) mod encode;
mod error;
pub mod key_binding;
pub(crate) mod present;
pub(crate) mod sd_jwt;
pub(crate) mod sd_map;
pub(crate) mod serialized;

pub use crypto::{
    AsyncJwtCryptoProvider, JwkCryptoProvider, JwsHeaderParams, JwtCryptoProvider,
    JwtVerificationResult,
};
pub use decode::{decode_claims, reconstruct_full_payload, DecodeReport};
pub use digest::{decoy_digest, hash_encoded_disclosure, hash_presentation, SdAlg};
pub use disclosure::{generate_salt, Disclosure, DisclosureKind};
pub use encode::SdPayload;
pub use error::Error;
pub use key_binding::{KeyBindingClaims, KeyBindingJwt};
pub use sd_jwt::{SdJwt, ValidityClaims, VerificationOptions, VerificationResult};
pub use sd_map::{parse_path, DecoyMode, PathSegment, SdField, SdMap};
pub use serialized::{deserialize_string_format, serialize_string_format, SerializedSdJwt};

/// Object property holding the digests of an object's concealed properties
pub const SD_CLAIM_NAME: &str = "_sd";
/// Top level property naming the digest algorithm
pub const SD_ALG_CLAIM_NAME: &str = "_sd_alg";
/// Key of the single-property object standing in for a concealed array element
pub const ARRAY_CLAIM_ITEM_PROPERTY_NAME: &str = "...";
