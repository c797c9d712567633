/// Errors raised while issuing, presenting, parsing or verifying SD-JWTs
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A disclosure is malformed (bad base64url, JSON or arity)
    #[error("A disclosure is malformed: {0}")]
    MalformedDisclosure(&'static str),

    /// The compact serialization does not have the expected shape
    #[error("Invalid SD-JWT wire format: {0}")]
    InvalidWireFormat(String),

    /// The JWS signature could not be verified
    #[error("Signature could not be verified: {0}")]
    SignatureInvalid(String),

    /// A presented disclosure is not referenced anywhere in the payload
    #[error("Disclosure with digest {0} is not referenced by the payload")]
    DisclosureDigestMismatch(String),

    /// A single disclosure was used multiple times
    #[error("Disclosure with digest {0} was used multiple times")]
    DisclosureUsedMultipleTimes(String),

    /// Multiple disclosures given with the same hash
    #[error("Multiple disclosures given with the same hash")]
    MultipleDisclosuresWithSameHash,

    /// Found an array item disclosure when expecting a property type
    #[error("Found an array item disclosure when expecting a property type")]
    ArrayDisclosureWhenExpectingProperty,

    /// Found a property type disclosure when expecting an array item
    #[error("Found a property type disclosure when expecting an array item")]
    PropertyDisclosureWhenExpectingArray,

    /// A disclosure claim would collide with an existing JWT claim
    #[error("Disclosed claim {0} collides with an existing JWT claim")]
    DisclosureClaimCollidesWithJwtClaim(String),

    /// An _sd property was not an array type
    #[error("An _sd property was not an array type")]
    SdPropertyNotArray,

    /// An _sd claim wasn't a string
    #[error("An _sd claim wasn't a string")]
    SdClaimNotString,

    /// The key binding JWT does not match the presentation it was attached to
    #[error("Key binding JWT mismatch: {0}")]
    KeyBindingMismatch(String),

    /// A key binding JWT was required but none was presented
    #[error("Missing key binding JWT")]
    MissingKeyBinding,

    /// Two disclosures of one payload share a salt or digest
    #[error("Duplicate salt or digest generated: {0}")]
    DuplicateSalt(String),

    /// A claim path does not designate a single claim
    #[error("Ambiguous claim path: {0}")]
    AmbiguousPath(String),

    /// The claims contain a property reserved by SD-JWT
    #[error("The claims contain the property {0} reserved by SD-JWT")]
    ReservedClaimName(String),

    /// The claims to encode did not become a JSON object
    #[error("The claims to encode did not become a JSON object")]
    EncodedAsNonObject,

    /// Unknown value of _sd_alg
    #[error("Unknown value of _sd_alg {0}")]
    UnknownSdAlg(String),

    /// Type of _sd_alg was not string
    #[error("Type of _sd_alg was not string")]
    SdAlgWrongType,

    /// The signing key has no algorithm and none was configured
    #[error("No signature algorithm configured for the key")]
    MissingAlgorithm,

    /// Bubbled up error from ssi_jws
    #[error(transparent)]
    JWS(#[from] ssi_jws::Error),

    /// A timestamp claim is out of range
    #[error(transparent)]
    NumericDate(#[from] ssi_jwt::NumericDateConversionError),

    /// Bubbled up error from serde_json
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
