use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use rand::{CryptoRng, Rng};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::decode::reconstruct_full_payload;
use crate::present::select_disclosures;
use crate::*;

/// Undisclosed payload of an SD-JWT together with the disclosures issued for it
#[derive(Clone, Debug, PartialEq)]
pub struct SdPayload {
    /// Claims with every disclosable claim replaced by a digest reference
    pub undisclosed_payload: Map<String, Value>,

    /// Disclosures, nested ones before the disclosure embedding their digest
    pub disclosures: Vec<Disclosure>,

    pub sd_alg: SdAlg,
}

impl SdPayload {
    /// Conceal the claims of `full_payload` marked in `sd_map`, hashing with SHA-256
    pub fn create(full_payload: &Map<String, Value>, sd_map: &SdMap) -> Result<Self, Error> {
        Self::create_with_alg(full_payload, sd_map, SdAlg::Sha256)
    }

    pub fn create_with_alg(
        full_payload: &Map<String, Value>,
        sd_map: &SdMap,
        sd_alg: SdAlg,
    ) -> Result<Self, Error> {
        Self::create_with_rng(&mut rand::rngs::OsRng {}, full_payload, sd_map, sd_alg)
    }

    pub fn create_with_rng<Rand: Rng + CryptoRng>(
        rng: &mut Rand,
        full_payload: &Map<String, Value>,
        sd_map: &SdMap,
        sd_alg: SdAlg,
    ) -> Result<Self, Error> {
        let mut encoder = Encoder {
            rng,
            sd_alg,
            disclosures: vec![],
            salts: BTreeSet::new(),
            digests: BTreeSet::new(),
        };

        let mut undisclosed_payload = encoder.conceal_object(full_payload, Some(sd_map))?;
        undisclosed_payload.insert(
            SD_ALG_CLAIM_NAME.to_owned(),
            Value::String(sd_alg.to_str().to_owned()),
        );

        log::debug!(
            "Concealed {} claims with {}",
            encoder.disclosures.len(),
            sd_alg
        );

        Ok(SdPayload {
            undisclosed_payload,
            disclosures: encoder.disclosures,
            sd_alg,
        })
    }

    /// Serialize `claims` and conceal the claims marked in `sd_map`
    pub fn from_claims<Claims: Serialize>(claims: &Claims, sd_map: &SdMap) -> Result<Self, Error> {
        match serde_json::to_value(claims)? {
            Value::Object(full_payload) => Self::create(&full_payload, sd_map),
            _ => Err(Error::EncodedAsNonObject),
        }
    }

    /// Conceal every property of `full_payload` that is missing from `undisclosed_payload`
    pub fn from_payloads(
        full_payload: &Map<String, Value>,
        undisclosed_payload: &Map<String, Value>,
        decoy_mode: DecoyMode,
        decoys: usize,
    ) -> Result<Self, Error> {
        let sd_map =
            SdMap::generate_from_payloads(full_payload, undisclosed_payload, decoy_mode, decoys);
        Self::create(full_payload, &sd_map)
    }

    /// Claims as revealed by the disclosures at hand
    pub fn full_payload(&self) -> Result<Map<String, Value>, Error> {
        reconstruct_full_payload(&self.undisclosed_payload, &self.disclosures)
    }

    /// Disclosure map of the claims that can be revealed with the disclosures at hand
    pub fn sd_map(&self) -> SdMap {
        SdMap::regenerate(&self.undisclosed_payload, &self.disclosures)
    }

    /// Same payload keeping only the disclosures selected by `selection`
    pub fn with_selective_disclosures(&self, selection: &SdMap) -> SdPayload {
        SdPayload {
            undisclosed_payload: self.undisclosed_payload.clone(),
            disclosures: select_disclosures(&self.undisclosed_payload, &self.disclosures, selection),
            sd_alg: self.sd_alg,
        }
    }

    pub fn without_disclosures(&self) -> SdPayload {
        SdPayload {
            undisclosed_payload: self.undisclosed_payload.clone(),
            disclosures: vec![],
            sd_alg: self.sd_alg,
        }
    }
}

struct Encoder<'a, Rand> {
    rng: &'a mut Rand,
    sd_alg: SdAlg,
    disclosures: Vec<Disclosure>,
    salts: BTreeSet<String>,
    digests: BTreeSet<String>,
}

impl<Rand: Rng + CryptoRng> Encoder<'_, Rand> {
    fn conceal_value(&mut self, value: &Value, sd_map: Option<&SdMap>) -> Result<Value, Error> {
        Ok(match value {
            Value::Object(object) => Value::Object(self.conceal_object(object, sd_map)?),
            Value::Array(array) => Value::Array(self.conceal_array(array, sd_map)?),
            other => other.clone(),
        })
    }

    fn conceal_object(
        &mut self,
        object: &Map<String, Value>,
        sd_map: Option<&SdMap>,
    ) -> Result<Map<String, Value>, Error> {
        let mut concealed = Map::new();
        let mut sd_claim = vec![];

        for (name, value) in object {
            if is_reserved(name) {
                return Err(Error::ReservedClaimName(name.clone()));
            }

            let field = sd_map.and_then(|map| map.property(name));
            // Nested claims are concealed first so that their digests end up inside
            // the disclosure of the enclosing claim.
            let value = self.conceal_value(value, field.and_then(|f| f.children.as_ref()))?;

            if field.map_or(false, |f| f.sd) {
                sd_claim.push(self.disclose(Some(name), value)?);
            } else {
                concealed.insert(name.clone(), value);
            }
        }

        if !sd_claim.is_empty() {
            let decoys = sd_map.map_or(0, |map| map.decoy_count(self.rng));
            for _ in 0..decoys {
                let decoy = decoy_digest(self.rng, self.sd_alg);
                if !self.digests.insert(decoy.clone()) {
                    return Err(Error::DuplicateSalt(decoy));
                }
                sd_claim.push(decoy);
            }
            sd_claim.shuffle(self.rng);

            concealed.insert(
                SD_CLAIM_NAME.to_owned(),
                Value::Array(sd_claim.into_iter().map(Value::String).collect()),
            );
        }

        Ok(concealed)
    }

    fn conceal_array(
        &mut self,
        array: &[Value],
        sd_map: Option<&SdMap>,
    ) -> Result<Vec<Value>, Error> {
        let mut concealed = Vec::with_capacity(array.len());

        for (index, item) in array.iter().enumerate() {
            let field = sd_map.and_then(|map| map.element(index));
            let item = self.conceal_value(item, field.and_then(|f| f.children.as_ref()))?;

            if field.map_or(false, |f| f.sd) {
                let hash = self.disclose(None, item)?;
                concealed.push(serde_json::json!({ ARRAY_CLAIM_ITEM_PROPERTY_NAME: hash }));
            } else {
                concealed.push(item);
            }
        }

        Ok(concealed)
    }

    /// Create the disclosure for a claim and return its digest
    fn disclose(&mut self, claim_name: Option<&str>, value: Value) -> Result<String, Error> {
        let disclosure = Disclosure::with_rng(self.rng, self.sd_alg, claim_name, value)?;

        if !self.salts.insert(disclosure.salt.clone()) {
            return Err(Error::DuplicateSalt(disclosure.salt));
        }
        if !self.digests.insert(disclosure.hash.clone()) {
            return Err(Error::DuplicateSalt(disclosure.hash));
        }

        let hash = disclosure.hash.clone();
        self.disclosures.push(disclosure);
        Ok(hash)
    }
}

fn is_reserved(name: &str) -> bool {
    name == SD_CLAIM_NAME || name == SD_ALG_CLAIM_NAME || name == ARRAY_CLAIM_ITEM_PROPERTY_NAME
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(object) => object,
            _ => unreachable!(),
        }
    }

    #[test]
    fn conceal_top_level_claim() {
        let full = object(json!({"sub": "123", "aud": "456"}));
        let sd_map = SdMap::generate_from_paths(&["sub"], DecoyMode::None, 0).unwrap();

        let payload = SdPayload::create(&full, &sd_map).unwrap();

        assert_eq!(payload.disclosures.len(), 1);
        assert_eq!(payload.undisclosed_payload["aud"], json!("456"));
        assert!(!payload.undisclosed_payload.contains_key("sub"));
        assert_eq!(payload.undisclosed_payload[SD_ALG_CLAIM_NAME], json!("sha-256"));
        assert_eq!(
            payload.undisclosed_payload[SD_CLAIM_NAME],
            json!([payload.disclosures[0].hash])
        );
        assert_eq!(payload.disclosures[0].claim_name(), Some("sub"));
        assert_eq!(payload.full_payload().unwrap(), full);
    }

    #[test]
    fn conceal_array_elements() {
        let full = object(json!({"nationalities": ["US", "DE"]}));
        let sd_map = SdMap::generate_from_paths(&["nationalities[1]"], DecoyMode::None, 0).unwrap();

        let payload = SdPayload::create(&full, &sd_map).unwrap();

        assert_eq!(
            payload.undisclosed_payload["nationalities"],
            json!(["US", {"...": payload.disclosures[0].hash}])
        );
        assert_eq!(payload.disclosures[0].claim_value(), &json!("DE"));
        assert_eq!(payload.full_payload().unwrap(), full);
    }

    #[test]
    fn nested_disclosures_precede_their_parent() {
        let full = object(json!({
            "address": {"street": "Main St", "country": "DE"}
        }));
        let sd_map =
            SdMap::generate_from_paths(&["address", "address.street"], DecoyMode::None, 0).unwrap();

        let payload = SdPayload::create(&full, &sd_map).unwrap();

        let [street, address] = payload.disclosures.as_slice() else {
            panic!("expected two disclosures");
        };
        assert_eq!(street.claim_name(), Some("street"));
        assert_eq!(address.claim_name(), Some("address"));
        assert_eq!(
            address.claim_value(),
            &json!({"country": "DE", "_sd": [street.hash]})
        );
        let serialized = serde_json::to_string(&payload.undisclosed_payload).unwrap();
        assert!(!serialized.contains("Main St"));
        assert!(!serialized.contains("country"));
        assert_eq!(payload.full_payload().unwrap(), full);
    }

    #[test]
    fn fixed_decoys_are_added_to_concealing_objects_only() {
        let full = object(json!({
            "sub": "123",
            "address": {"country": "DE"}
        }));
        let sd_map = SdMap::generate_from_paths(&["sub"], DecoyMode::Fixed, 5).unwrap();

        let payload = SdPayload::create(&full, &sd_map).unwrap();

        let sd_claim = payload.undisclosed_payload[SD_CLAIM_NAME].as_array().unwrap();
        assert_eq!(sd_claim.len(), 6);
        assert!(sd_claim.contains(&json!(payload.disclosures[0].hash)));
        assert!(!payload.undisclosed_payload["address"]
            .as_object()
            .unwrap()
            .contains_key(SD_CLAIM_NAME));
        assert_eq!(payload.full_payload().unwrap(), full);
    }

    #[test]
    fn missing_claims_are_ignored() {
        let full = object(json!({"sub": "123"}));
        let sd_map =
            SdMap::generate_from_paths(&["given_name", "address.street"], DecoyMode::Fixed, 2)
                .unwrap();

        let payload = SdPayload::create(&full, &sd_map).unwrap();

        assert!(payload.disclosures.is_empty());
        assert_eq!(
            payload.undisclosed_payload,
            object(json!({"sub": "123", "_sd_alg": "sha-256"}))
        );
    }

    #[test]
    fn reserved_claims_are_rejected() {
        for full in [
            json!({"_sd": []}),
            json!({"_sd_alg": "sha-256"}),
            json!({"nested": {"...": "abc"}}),
        ] {
            assert!(matches!(
                SdPayload::create(&object(full), &SdMap::new()),
                Err(Error::ReservedClaimName(_))
            ));
        }
    }

    #[test]
    fn payload_from_two_documents() {
        let full = object(json!({"sub": "123", "iss": "issuer", "address": {"street": "Main St", "country": "DE"}}));
        let undisclosed = object(json!({"iss": "issuer", "address": {"country": "DE"}}));

        let payload = SdPayload::from_payloads(&full, &undisclosed, DecoyMode::None, 0).unwrap();

        assert_eq!(payload.disclosures.len(), 2);
        assert_eq!(payload.undisclosed_payload["iss"], json!("issuer"));
        assert_eq!(payload.full_payload().unwrap(), full);
        assert!(payload.sd_map().property("sub").unwrap().sd);
    }

    #[test]
    fn without_disclosures_hides_everything() {
        let full = object(json!({"sub": "123", "aud": "456"}));
        let sd_map = SdMap::generate_from_paths(&["sub"], DecoyMode::None, 0).unwrap();
        let payload = SdPayload::create(&full, &sd_map).unwrap().without_disclosures();

        assert!(payload.disclosures.is_empty());
        assert_eq!(
            payload.full_payload().unwrap(),
            object(json!({"aud": "456"}))
        );
    }

    #[test]
    fn alternative_digest_algorithm() {
        let full = object(json!({"sub": "123"}));
        let sd_map = SdMap::generate_from_paths(&["sub"], DecoyMode::None, 0).unwrap();
        let payload = SdPayload::create_with_alg(&full, &sd_map, SdAlg::Sha512).unwrap();

        assert_eq!(payload.undisclosed_payload[SD_ALG_CLAIM_NAME], json!("sha-512"));
        assert_eq!(payload.disclosures[0].hash.len(), 86);
    }

    /// Hands out the same bytes on every draw.
    struct RepeatingRng;

    impl rand::RngCore for RepeatingRng {
        fn next_u32(&mut self) -> u32 {
            7
        }

        fn next_u64(&mut self) -> u64 {
            7
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(7)
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    impl CryptoRng for RepeatingRng {}

    #[test]
    fn repeated_salt_is_rejected() {
        let full = object(json!({"given_name": "John", "family_name": "Doe"}));
        let sd_map =
            SdMap::generate_from_paths(&["given_name", "family_name"], DecoyMode::None, 0).unwrap();

        let salt = generate_salt(&mut RepeatingRng);
        match SdPayload::create_with_rng(&mut RepeatingRng, &full, &sd_map, SdAlg::Sha256) {
            Err(Error::DuplicateSalt(repeated)) => assert_eq!(repeated, salt),
            other => panic!("unexpected outcome {other:?}"),
        }

        let single = SdMap::generate_from_paths(&["given_name"], DecoyMode::None, 0).unwrap();
        let payload =
            SdPayload::create_with_rng(&mut RepeatingRng, &full, &single, SdAlg::Sha256).unwrap();
        assert_eq!(payload.disclosures[0].salt, salt);
    }

    #[test]
    fn repeated_decoy_is_rejected() {
        let full = object(json!({"given_name": "John"}));
        let sd_map = SdMap::generate_from_paths(&["given_name"], DecoyMode::Fixed, 2).unwrap();

        assert!(matches!(
            SdPayload::create_with_rng(&mut RepeatingRng, &full, &sd_map, SdAlg::Sha256),
            Err(Error::DuplicateSalt(_))
        ));
    }
}
