//! Key binding JWTs: holder signed proofs tying a presentation to an audience and a nonce.
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ssi_jwt::NumericDate;

use crate::crypto::{AsyncJwtCryptoProvider, JwsHeaderParams, JwtCryptoProvider};
use crate::digest::{hash_presentation, SdAlg};
use crate::serialized::decode_jws_unverified;
use crate::Error;

/// `typ` of a key binding JWT
pub const KB_JWT_TYPE: &str = "kb+jwt";

/// How far in the future `iat` may lie before the key binding JWT is rejected
const MAX_CLOCK_SKEW_MINUTES: i64 = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyBindingClaims {
    pub aud: String,
    pub nonce: String,
    pub iat: NumericDate,

    /// Digest of the presentation the key binding JWT is appended to
    pub sd_hash: String,
}

impl KeyBindingClaims {
    /// Claims binding `presentation` (issuer JWT and disclosures, trailing `~` included)
    pub fn new(
        audience: &str,
        nonce: &str,
        presentation: &str,
        sd_alg: SdAlg,
    ) -> Result<Self, Error> {
        Ok(KeyBindingClaims {
            aud: audience.to_owned(),
            nonce: nonce.to_owned(),
            iat: NumericDate::try_from_seconds(Utc::now().timestamp() as f64)?,
            sd_hash: hash_presentation(sd_alg, presentation),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyBindingJwt {
    /// Compact JWS as signed by the holder
    pub jwt: String,
    pub header: Map<String, Value>,
    pub claims: KeyBindingClaims,
}

impl KeyBindingJwt {
    pub fn sign(
        provider: &dyn JwtCryptoProvider,
        header: JwsHeaderParams,
        audience: &str,
        nonce: &str,
        presentation: &str,
        sd_alg: SdAlg,
    ) -> Result<Self, Error> {
        let claims = KeyBindingClaims::new(audience, nonce, presentation, sd_alg)?;
        let jwt = provider.sign(
            &serde_json::to_string(&claims)?,
            &with_key_binding_type(header),
        )?;
        Self::parse(&jwt)
    }

    pub async fn sign_async(
        provider: &dyn AsyncJwtCryptoProvider,
        header: JwsHeaderParams,
        audience: &str,
        nonce: &str,
        presentation: &str,
        sd_alg: SdAlg,
    ) -> Result<Self, Error> {
        let claims = KeyBindingClaims::new(audience, nonce, presentation, sd_alg)?;
        let jwt = provider
            .sign(&serde_json::to_string(&claims)?, &with_key_binding_type(header))
            .await?;
        Self::parse(&jwt)
    }

    pub fn parse(jwt: &str) -> Result<Self, Error> {
        let (header, payload) = decode_jws_unverified(jwt, false)?;
        let claims = serde_json::from_value(Value::Object(payload))
            .map_err(|e| Error::InvalidWireFormat(format!("key binding claims: {e}")))?;
        Ok(KeyBindingJwt {
            jwt: jwt.to_owned(),
            header,
            claims,
        })
    }

    /// Check the claims against the presentation as received, without the signature.
    ///
    /// `presented_prefix` is the SD-JWT preceding this key binding JWT, trailing `~`
    /// included, byte for byte.
    pub fn check_claims(
        &self,
        audience: &str,
        nonce: &str,
        presented_prefix: &str,
        sd_alg: SdAlg,
    ) -> Result<(), Error> {
        let reject = |reason: &str| {
            log::warn!("Rejecting key binding JWT: {reason}");
            Err(Error::KeyBindingMismatch(reason.to_owned()))
        };

        if self.header.get("typ").and_then(Value::as_str) != Some(KB_JWT_TYPE) {
            return reject("typ is not kb+jwt");
        }
        if DateTime::<Utc>::from(self.claims.iat)
            > Utc::now() + Duration::minutes(MAX_CLOCK_SKEW_MINUTES)
        {
            return reject("iat lies in the future");
        }
        if self.claims.sd_hash != hash_presentation(sd_alg, presented_prefix) {
            return reject("sd_hash does not match the presentation");
        }
        if self.claims.aud != audience {
            return reject("unexpected audience");
        }
        if self.claims.nonce != nonce {
            return reject("unexpected nonce");
        }
        Ok(())
    }

    /// Check the claims, then the signature with the holder's key
    pub fn verify(
        &self,
        provider: &dyn JwtCryptoProvider,
        audience: &str,
        nonce: &str,
        presented_prefix: &str,
        sd_alg: SdAlg,
    ) -> Result<(), Error> {
        self.check_claims(audience, nonce, presented_prefix, sd_alg)?;
        let result = provider.verify(&self.jwt, self.key_id());
        if !result.verified {
            return Err(signature_rejected(result.message));
        }
        Ok(())
    }

    pub async fn verify_async(
        &self,
        provider: &dyn AsyncJwtCryptoProvider,
        audience: &str,
        nonce: &str,
        presented_prefix: &str,
        sd_alg: SdAlg,
    ) -> Result<(), Error> {
        self.check_claims(audience, nonce, presented_prefix, sd_alg)?;
        let result = provider.verify(&self.jwt, self.key_id()).await;
        if !result.verified {
            return Err(signature_rejected(result.message));
        }
        Ok(())
    }

    fn key_id(&self) -> Option<&str> {
        self.header.get("kid").and_then(Value::as_str)
    }
}

fn with_key_binding_type(mut header: JwsHeaderParams) -> JwsHeaderParams {
    header.type_ = Some(KB_JWT_TYPE.to_owned());
    header
}

fn signature_rejected(message: Option<String>) -> Error {
    let message = message.unwrap_or_else(|| "invalid signature".to_owned());
    log::warn!("Rejecting key binding JWT: {message}");
    Error::KeyBindingMismatch(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Issuer JWT and disclosures of a holder presentation, as received by the verifier
    const PRESENTATION: &str = concat!(
        "eyJhbGciOiAiRVMyNTYiLCAidHlwIjogImV4YW1wbGUrc2Qtand0In0.",
        "eyJfc2QiOiBbIkNyUWU3UzVrcUJBSHQtbk1ZWGdjNmJkdDJTSDVhVFkxc1VfTS1QZ2tqUEkiLCAiSnpZakg0c3ZsaUgwUjNQeUVNZmVadTZKdDY5dTVxZWhabzdGN0VQWWxTRSIsICJQb3JGYnBLdVZ1Nnh5bUphZ3ZrRnNGWEFiUm9jMkpHbEFVQTJCQTRvN2NJIiwgIlRHZjRvTGJnd2Q1SlFhSHlLVlFaVTlVZEdFMHc1cnREc3JaemZVYW9tTG8iLCAiWFFfM2tQS3QxWHlYN0tBTmtxVlI2eVoyVmE1TnJQSXZQWWJ5TXZSS0JNTSIsICJYekZyendzY002R242Q0pEYzZ2Vks4QmtNbmZHOHZPU0tmcFBJWmRBZmRFIiwgImdiT3NJNEVkcTJ4Mkt3LXc1d1BFemFrb2I5aFYxY1JEMEFUTjNvUUw5Sk0iLCAianN1OXlWdWx3UVFsaEZsTV8zSmx6TWFTRnpnbGhRRzBEcGZheVF3TFVLNCJdLCAiaXNzIjogImh0dHBzOi8vaXNzdWVyLmV4YW1wbGUuY29tIiwgImlhdCI6IDE2ODMwMDAwMDAsICJleHAiOiAxODgzMDAwMDAwLCAic3ViIjogInVzZXJfNDIiLCAibmF0aW9uYWxpdGllcyI6IFt7Ii4uLiI6ICJwRm5kamtaX1ZDem15VGE2VWpsWm8zZGgta284YUlLUWM5RGxHemhhVllvIn0sIHsiLi4uIjogIjdDZjZKa1B1ZHJ5M2xjYndIZ2VaOGtoQXYxVTFPU2xlclAwVmtCSnJXWjAifV0sICJfc2RfYWxnIjogInNoYS0yNTYiLCAiY25mIjogeyJqd2siOiB7Imt0eSI6ICJFQyIsICJjcnYiOiAiUC0yNTYiLCAieCI6ICJUQ0FFUjE5WnZ1M09IRjRqNFc0dmZTVm9ISVAxSUxpbERsczd2Q2VHZW1jIiwgInkiOiAiWnhqaVdXYlpNUUdIVldLVlE0aGJTSWlyc1ZmdWVjQ0U2dDRqVDlGMkhaUSJ9fX0.",
        "Ds6Agd3LwQJuQW0V7EZLaX-ed2CpEvA7gFrVjuVJaPCzIAvLXhDzcmEzDzXJxx27iPs91uodf0wGVrpe529ZmQ",
        "~WyJlbHVWNU9nM2dTTklJOEVZbnN4QV9BIiwgImZhbWlseV9uYW1lIiwgIkRvZSJd",
        "~WyJBSngtMDk1VlBycFR0TjRRTU9xUk9BIiwgImFkZHJlc3MiLCB7InN0cmVldF9hZGRyZXNzIjogIjEyMyBNYWluIFN0IiwgImxvY2FsaXR5IjogIkFueXRvd24iLCAicmVnaW9uIjogIkFueXN0YXRlIiwgImNvdW50cnkiOiAiVVMifV0",
        "~WyIyR0xDNDJzS1F2ZUNmR2ZyeU5STjl3IiwgImdpdmVuX25hbWUiLCAiSm9obiJd",
        "~WyJsa2x4RjVqTVlsR1RQVW92TU5JdkNBIiwgIlVTIl0~",
    );

    const KB_JWT: &str = concat!(
        "eyJhbGciOiAiRVMyNTYiLCAidHlwIjogImtiK2p3dCJ9.",
        "eyJub25jZSI6ICIxMjM0NTY3ODkwIiwgImF1ZCI6ICJodHRwczovL3ZlcmlmaWVyLmV4YW1wbGUub3JnIiwgImlhdCI6IDE3MTU3ODMyOTksICJzZF9oYXNoIjogIlFMbWYtQk1QUjhzY2RrckhVOGF5aTFqSk85WjdJcDEwVnJmV2VCTDd0MHMifQ.",
        "_rLO1DtTo_OtJbLzNYSPGAYEwc11X67o-lAKBYux__oWRcLMV_o999VaJADaSc6UetudXNTkk_fAw65xz1F0Cw",
    );

    const SD_HASH: &str = "QLmf-BMPR8scdkrHU8ayi1jJO9Z7Ip10VrfWeBL7t0s";

    #[test]
    fn parse_key_binding_jwt() {
        let kb = KeyBindingJwt::parse(KB_JWT).unwrap();
        assert_eq!(kb.header["typ"], KB_JWT_TYPE);
        assert_eq!(
            kb.claims,
            KeyBindingClaims {
                aud: "https://verifier.example.org".to_owned(),
                nonce: "1234567890".to_owned(),
                iat: NumericDate::try_from_seconds(1715783299.0).unwrap(),
                sd_hash: SD_HASH.to_owned(),
            }
        );
    }

    #[test]
    fn sd_hash_covers_presentation() {
        assert_eq!(hash_presentation(SdAlg::Sha256, PRESENTATION), SD_HASH);
        assert_eq!(
            KeyBindingClaims::new("aud", "nonce", PRESENTATION, SdAlg::Sha256)
                .unwrap()
                .sd_hash,
            SD_HASH
        );
    }

    #[test]
    fn claims_are_checked() {
        let kb = KeyBindingJwt::parse(KB_JWT).unwrap();
        kb.check_claims(
            "https://verifier.example.org",
            "1234567890",
            PRESENTATION,
            SdAlg::Sha256,
        )
        .unwrap();

        let cases = [
            ("https://verifier.example.org", "0987654321", PRESENTATION),
            ("https://attacker.example.org", "1234567890", PRESENTATION),
            (
                "https://verifier.example.org",
                "1234567890",
                PRESENTATION.trim_end_matches('~'),
            ),
        ];
        for (audience, nonce, presentation) in cases {
            assert!(matches!(
                kb.check_claims(audience, nonce, presentation, SdAlg::Sha256),
                Err(Error::KeyBindingMismatch(_))
            ));
        }
    }

    #[test]
    fn plain_jwt_is_not_a_key_binding() {
        let check = |kb: &KeyBindingJwt| {
            kb.check_claims(
                "https://verifier.example.org",
                "1234567890",
                PRESENTATION,
                SdAlg::Sha256,
            )
        };

        let mut plain = KeyBindingJwt::parse(KB_JWT).unwrap();
        plain.header.insert("typ".to_owned(), Value::from("JWT"));
        assert!(matches!(check(&plain), Err(Error::KeyBindingMismatch(_))));
        plain.header.remove("typ");
        assert!(matches!(check(&plain), Err(Error::KeyBindingMismatch(_))));

        let mut postdated = KeyBindingJwt::parse(KB_JWT).unwrap();
        postdated.claims.iat =
            NumericDate::try_from_seconds((Utc::now().timestamp() + 3600) as f64).unwrap();
        assert!(matches!(check(&postdated), Err(Error::KeyBindingMismatch(_))));
    }

    #[test]
    fn claims_serialization() {
        let json = serde_json::to_value(KeyBindingJwt::parse(KB_JWT).unwrap().claims).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "aud": "https://verifier.example.org",
                "nonce": "1234567890",
                "iat": 1715783299,
                "sd_hash": SD_HASH
            })
        );
    }
}
