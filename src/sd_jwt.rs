use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};
use ssi_jwk::JWK;
use ssi_jwt::NumericDate;

use crate::decode::{array_item_digest, decode_claims};
use crate::present::select_disclosures;
use crate::serialized::decode_jws_unverified;
use crate::*;

/// `typ` of issued SD-JWTs unless the caller sets one
const DEFAULT_TYPE: &str = "JWT";

#[derive(Debug, Deserialize, PartialEq)]
pub struct ValidityClaims {
    pub nbf: Option<NumericDate>,
    pub iat: Option<NumericDate>,
    pub exp: Option<NumericDate>,
}

/// Run-time options of [`SdJwt::verify_and_parse_with`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerificationOptions {
    /// Accept an issuer JWT with an empty or absent signature part
    pub allow_missing_signature: bool,

    /// Return failed verifications as a result instead of an error
    pub permissive: bool,
}

/// An issued or presented SD-JWT
#[derive(Clone, Debug, PartialEq)]
pub struct SdJwt {
    jwt: String,
    header: Map<String, Value>,
    sd_payload: SdPayload,
    key_binding_jwt: Option<KeyBindingJwt>,
    is_presentation: bool,

    /// Serialization preceding the key binding JWT, exactly as received or signed over
    sd_jwt_prefix: Option<String>,
}

/// Outcome of [`SdJwt::verify`]. Signature and disclosures are judged independently.
#[derive(Clone, Debug, PartialEq)]
pub struct VerificationResult {
    pub sd_jwt: SdJwt,
    pub signature_verified: bool,
    pub disclosures_verified: bool,

    /// Reasons for failed checks
    pub message: Option<String>,

    /// Claims revealed by the disclosures, unless the payload could not be walked
    pub reconstructed_payload: Option<Map<String, Value>>,
}

impl VerificationResult {
    pub fn verified(&self) -> bool {
        self.signature_verified && self.disclosures_verified
    }
}

impl SdJwt {
    /// Sign the undisclosed payload of `sd_payload` as the issuer
    pub fn sign(
        sd_payload: SdPayload,
        provider: &dyn JwtCryptoProvider,
        header: JwsHeaderParams,
    ) -> Result<Self, Error> {
        let payload = serde_json::to_string(&sd_payload.undisclosed_payload)?;
        let jwt = provider.sign(&payload, &with_default_type(header))?;
        Self::from_signed(jwt, sd_payload)
    }

    pub async fn sign_async(
        sd_payload: SdPayload,
        provider: &dyn AsyncJwtCryptoProvider,
        header: JwsHeaderParams,
    ) -> Result<Self, Error> {
        let payload = serde_json::to_string(&sd_payload.undisclosed_payload)?;
        let jwt = provider.sign(&payload, &with_default_type(header)).await?;
        Self::from_signed(jwt, sd_payload)
    }

    fn from_signed(jwt: String, sd_payload: SdPayload) -> Result<Self, Error> {
        let (header, _) = decode_jws_unverified(&jwt, false)?;
        log::debug!(
            "Signed SD-JWT with {} disclosures",
            sd_payload.disclosures.len()
        );
        Ok(SdJwt {
            jwt,
            header,
            sd_payload,
            key_binding_jwt: None,
            is_presentation: false,
            sd_jwt_prefix: None,
        })
    }

    /// Parse the compact serialization of an SD-JWT. Nothing is verified.
    pub fn parse(serialized: &str, allow_missing_signature: bool) -> Result<Self, Error> {
        let deserialized = deserialize_string_format(serialized)?;
        let (header, undisclosed_payload) =
            decode_jws_unverified(deserialized.jwt, allow_missing_signature)?;
        let sd_alg = SdAlg::from_claims(&undisclosed_payload)?;

        let disclosures = deserialized
            .disclosures
            .iter()
            .map(|disclosure| Disclosure::parse(disclosure, sd_alg))
            .collect::<Result<Vec<_>, _>>()?;

        let key_binding_jwt = deserialized
            .key_binding_jwt
            .map(KeyBindingJwt::parse)
            .transpose()?;

        log::debug!(
            "Parsed SD-JWT with {} disclosures{}",
            disclosures.len(),
            if key_binding_jwt.is_some() {
                " and a key binding JWT"
            } else {
                ""
            }
        );

        Ok(SdJwt {
            jwt: deserialized.jwt.to_owned(),
            header,
            sd_payload: SdPayload {
                undisclosed_payload,
                disclosures,
                sd_alg,
            },
            key_binding_jwt,
            is_presentation: serialized.contains('~'),
            sd_jwt_prefix: deserialized.sd_jwt_prefix.map(str::to_owned),
        })
    }

    /// Whether `value` parses as an SD-JWT. With `sd_only`, it must also carry
    /// disclosures or digest references.
    pub fn is_sd_jwt(value: &str, sd_only: bool) -> bool {
        match Self::parse(value, true) {
            Ok(sd_jwt) => {
                !sd_only
                    || !sd_jwt.disclosures().is_empty()
                    || has_digest_references(&Value::Object(sd_jwt.undisclosed_payload().clone()))
            }
            Err(_) => false,
        }
    }

    /// Issuer signed JWT
    pub fn jwt(&self) -> &str {
        &self.jwt
    }

    pub fn header(&self) -> &Map<String, Value> {
        &self.header
    }

    pub fn sd_payload(&self) -> &SdPayload {
        &self.sd_payload
    }

    pub fn undisclosed_payload(&self) -> &Map<String, Value> {
        &self.sd_payload.undisclosed_payload
    }

    pub fn disclosures(&self) -> &[Disclosure] {
        &self.sd_payload.disclosures
    }

    pub fn sd_alg(&self) -> SdAlg {
        self.sd_payload.sd_alg
    }

    pub fn key_binding_jwt(&self) -> Option<&KeyBindingJwt> {
        self.key_binding_jwt.as_ref()
    }

    /// Claims revealed by the disclosures, without any verification
    pub fn full_payload(&self) -> Result<Map<String, Value>, Error> {
        self.sd_payload.full_payload()
    }

    pub fn sd_map(&self) -> SdMap {
        self.sd_payload.sd_map()
    }

    pub fn algorithm(&self) -> Option<&str> {
        self.header_str("alg")
    }

    pub fn key_id(&self) -> Option<&str> {
        self.header_str("kid")
    }

    pub fn type_(&self) -> Option<&str> {
        self.header_str("typ")
    }

    pub fn x5c(&self) -> Option<Vec<&str>> {
        self.header
            .get("x5c")?
            .as_array()?
            .iter()
            .map(Value::as_str)
            .collect()
    }

    pub fn jwk(&self) -> Option<JWK> {
        serde_json::from_value(self.header.get("jwk")?.clone()).ok()
    }

    /// Holder key bound to the credential by its `cnf` claim
    pub fn holder_key(&self) -> Option<JWK> {
        let jwk = self.undisclosed_payload().get("cnf")?.get("jwk")?;
        serde_json::from_value(jwk.clone()).ok()
    }

    pub fn validity_claims(&self) -> Result<ValidityClaims, Error> {
        Ok(serde_json::from_value(Value::Object(
            self.undisclosed_payload().clone(),
        ))?)
    }

    fn header_str(&self, name: &str) -> Option<&str> {
        self.header.get(name).and_then(Value::as_str)
    }

    /// Presentation with every disclosure, or with none
    pub fn present_all(&self, disclose_all: bool) -> SdJwt {
        let sd_payload = if disclose_all {
            self.sd_payload.clone()
        } else {
            self.sd_payload.without_disclosures()
        };
        self.presentation(sd_payload)
    }

    /// Presentation with the disclosures reachable through `selection`
    pub fn present(&self, selection: &SdMap) -> SdJwt {
        let disclosures = select_disclosures(self.undisclosed_payload(), self.disclosures(), selection);
        log::debug!(
            "Presenting {} of {} disclosures",
            disclosures.len(),
            self.disclosures().len()
        );
        self.presentation(SdPayload {
            undisclosed_payload: self.undisclosed_payload().clone(),
            disclosures,
            sd_alg: self.sd_alg(),
        })
    }

    /// Presentation with the disclosures reachable through the claim paths
    pub fn present_paths<S: AsRef<str>>(&self, paths: &[S]) -> Result<SdJwt, Error> {
        let selection = SdMap::generate_from_paths(paths, DecoyMode::None, 0)?;
        Ok(self.present(&selection))
    }

    pub fn present_with_key_binding(
        &self,
        selection: &SdMap,
        provider: &dyn JwtCryptoProvider,
        header: JwsHeaderParams,
        audience: &str,
        nonce: &str,
    ) -> Result<SdJwt, Error> {
        let presented = self.present(selection);
        let prefix = presented.to_string();
        let key_binding_jwt =
            KeyBindingJwt::sign(provider, header, audience, nonce, &prefix, self.sd_alg())?;
        Ok(presented.with_key_binding(key_binding_jwt, prefix))
    }

    pub async fn present_with_key_binding_async(
        &self,
        selection: &SdMap,
        provider: &dyn AsyncJwtCryptoProvider,
        header: JwsHeaderParams,
        audience: &str,
        nonce: &str,
    ) -> Result<SdJwt, Error> {
        let presented = self.present(selection);
        let prefix = presented.to_string();
        let key_binding_jwt =
            KeyBindingJwt::sign_async(provider, header, audience, nonce, &prefix, self.sd_alg())
                .await?;
        Ok(presented.with_key_binding(key_binding_jwt, prefix))
    }

    pub fn present_all_with_key_binding(
        &self,
        disclose_all: bool,
        provider: &dyn JwtCryptoProvider,
        header: JwsHeaderParams,
        audience: &str,
        nonce: &str,
    ) -> Result<SdJwt, Error> {
        let presented = self.present_all(disclose_all);
        let prefix = presented.to_string();
        let key_binding_jwt =
            KeyBindingJwt::sign(provider, header, audience, nonce, &prefix, self.sd_alg())?;
        Ok(presented.with_key_binding(key_binding_jwt, prefix))
    }

    fn presentation(&self, sd_payload: SdPayload) -> SdJwt {
        SdJwt {
            jwt: self.jwt.clone(),
            header: self.header.clone(),
            sd_payload,
            key_binding_jwt: None,
            is_presentation: true,
            sd_jwt_prefix: None,
        }
    }

    fn with_key_binding(mut self, key_binding_jwt: KeyBindingJwt, prefix: String) -> SdJwt {
        self.key_binding_jwt = Some(key_binding_jwt);
        self.sd_jwt_prefix = Some(prefix);
        self
    }

    /// Verify the issuer signature and the disclosures.
    ///
    /// Never fails: the outcome of both checks is reported in the result.
    pub fn verify(&self, provider: &dyn JwtCryptoProvider) -> VerificationResult {
        let signature = provider.verify(&self.jwt, self.key_id());
        self.verification_result(signature)
    }

    pub async fn verify_async(&self, provider: &dyn AsyncJwtCryptoProvider) -> VerificationResult {
        let signature = provider.verify(&self.jwt, self.key_id()).await;
        self.verification_result(signature)
    }

    fn verification_result(&self, signature: JwtVerificationResult) -> VerificationResult {
        let mut messages = vec![];

        if !signature.verified {
            let message = signature
                .message
                .unwrap_or_else(|| "signature could not be verified".to_owned());
            log::warn!("SD-JWT signature rejected: {message}");
            messages.push(message);
        }

        let (reconstructed_payload, disclosure_error) = self.check_disclosures();
        if let Some(e) = &disclosure_error {
            log::warn!("SD-JWT disclosures rejected: {e}");
            messages.push(e.to_string());
        }

        VerificationResult {
            sd_jwt: self.clone(),
            signature_verified: signature.verified,
            disclosures_verified: disclosure_error.is_none(),
            message: (!messages.is_empty()).then(|| messages.join("; ")),
            reconstructed_payload,
        }
    }

    /// Every disclosure must be referenced exactly once by the payload
    fn check_disclosures(&self) -> (Option<Map<String, Value>>, Option<Error>) {
        match decode_claims(self.undisclosed_payload(), self.disclosures()) {
            Ok(report) if report.unused_digests.is_empty() => (Some(report.claims), None),
            Ok(report) => (
                Some(report.claims),
                Some(Error::DisclosureDigestMismatch(report.unused_digests.join(", "))),
            ),
            Err(e) => (None, Some(e)),
        }
    }

    /// Parse and verify, failing unless both signature and disclosures hold
    pub fn verify_and_parse(
        serialized: &str,
        provider: &dyn JwtCryptoProvider,
    ) -> Result<VerificationResult, Error> {
        Self::verify_and_parse_with(serialized, provider, VerificationOptions::default())
    }

    pub fn verify_and_parse_with(
        serialized: &str,
        provider: &dyn JwtCryptoProvider,
        options: VerificationOptions,
    ) -> Result<VerificationResult, Error> {
        let sd_jwt = Self::parse(serialized, options.allow_missing_signature)?;
        sd_jwt.verify(provider).enforce(options)
    }

    pub async fn verify_and_parse_async(
        serialized: &str,
        provider: &dyn AsyncJwtCryptoProvider,
        options: VerificationOptions,
    ) -> Result<VerificationResult, Error> {
        let sd_jwt = Self::parse(serialized, options.allow_missing_signature)?;
        sd_jwt.verify_async(provider).await.enforce(options)
    }

    /// Verify the key binding JWT against the presentation it came with
    pub fn verify_key_binding(
        &self,
        provider: &dyn JwtCryptoProvider,
        audience: &str,
        nonce: &str,
    ) -> Result<(), Error> {
        let key_binding_jwt = self.key_binding_jwt.as_ref().ok_or(Error::MissingKeyBinding)?;
        key_binding_jwt.verify(provider, audience, nonce, &self.presented_prefix(), self.sd_alg())
    }

    pub async fn verify_key_binding_async(
        &self,
        provider: &dyn AsyncJwtCryptoProvider,
        audience: &str,
        nonce: &str,
    ) -> Result<(), Error> {
        let key_binding_jwt = self.key_binding_jwt.as_ref().ok_or(Error::MissingKeyBinding)?;
        key_binding_jwt
            .verify_async(provider, audience, nonce, &self.presented_prefix(), self.sd_alg())
            .await
    }

    fn presented_prefix(&self) -> String {
        match &self.sd_jwt_prefix {
            Some(prefix) => prefix.clone(),
            None => {
                let disclosures: Vec<&str> = self.disclosures().iter().map(Disclosure::as_str).collect();
                serialize_string_format(&self.jwt, &disclosures, None, true)
            }
        }
    }
}

impl VerificationResult {
    fn enforce(self, options: VerificationOptions) -> Result<Self, Error> {
        if options.permissive || self.verified() {
            return Ok(self);
        }
        if !self.signature_verified {
            return Err(Error::SignatureInvalid(
                self.message.unwrap_or_default(),
            ));
        }
        match self.sd_jwt.check_disclosures() {
            (_, Some(e)) => Err(e),
            (_, None) => Ok(self),
        }
    }
}

impl fmt::Display for SdJwt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let disclosures: Vec<&str> = self.disclosures().iter().map(Disclosure::as_str).collect();
        f.write_str(&serialize_string_format(
            &self.jwt,
            &disclosures,
            self.key_binding_jwt.as_ref().map(|kb| kb.jwt.as_str()),
            self.is_presentation,
        ))
    }
}

fn with_default_type(mut header: JwsHeaderParams) -> JwsHeaderParams {
    header.type_.get_or_insert_with(|| DEFAULT_TYPE.to_owned());
    header
}

fn has_digest_references(value: &Value) -> bool {
    match value {
        Value::Object(object) => {
            object.contains_key(SD_CLAIM_NAME) || object.values().any(has_digest_references)
        }
        Value::Array(array) => array
            .iter()
            .any(|item| array_item_digest(item).is_some() || has_digest_references(item)),
        _ => false,
    }
}
