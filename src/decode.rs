use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::*;

/// Outcome of resolving the digest references of an undisclosed payload
#[derive(Clone, Debug, PartialEq)]
pub struct DecodeReport {
    /// Claims with every resolvable reference replaced by its disclosed value
    pub claims: Map<String, Value>,

    /// Digests of the disclosures that no reference in the payload points to
    pub unused_digests: Vec<String>,
}

/// Rebuild the claims revealed by `disclosures`. References without a matching
/// disclosure stay hidden; disclosures matching no reference are ignored.
pub fn reconstruct_full_payload(
    undisclosed_payload: &Map<String, Value>,
    disclosures: &[Disclosure],
) -> Result<Map<String, Value>, Error> {
    decode_claims(undisclosed_payload, disclosures).map(|report| report.claims)
}

/// Rebuild the claims revealed by `disclosures` and report the disclosures that no
/// reference points to.
pub fn decode_claims(
    undisclosed_payload: &Map<String, Value>,
    disclosures: &[Disclosure],
) -> Result<DecodeReport, Error> {
    let mut disclosures = translate_to_in_progress_disclosures(disclosures)?;

    let mut claims = undisclosed_payload.clone();
    claims.remove(SD_ALG_CLAIM_NAME);
    visit_object(&mut claims, &mut disclosures)?;

    let unused_digests = disclosures
        .into_iter()
        .filter(|(_, disclosure)| !disclosure.found)
        .map(|(hash, _)| hash.to_owned())
        .collect();

    Ok(DecodeReport {
        claims,
        unused_digests,
    })
}

fn translate_to_in_progress_disclosures(
    disclosures: &[Disclosure],
) -> Result<BTreeMap<&str, InProgressDisclosure<'_>>, Error> {
    let mut disclosure_map = BTreeMap::new();
    for disclosure in disclosures {
        let prev = disclosure_map.insert(
            disclosure.hash.as_str(),
            InProgressDisclosure {
                decoded: disclosure,
                found: false,
            },
        );

        if prev.is_some() {
            return Err(Error::MultipleDisclosuresWithSameHash);
        }
    }

    Ok(disclosure_map)
}

#[derive(Debug)]
struct InProgressDisclosure<'a> {
    decoded: &'a Disclosure,
    found: bool,
}

impl<'a> InProgressDisclosure<'a> {
    fn mark_found(&mut self) -> Result<&'a DisclosureKind, Error> {
        if self.found {
            return Err(Error::DisclosureUsedMultipleTimes(self.decoded.hash.clone()));
        }
        self.found = true;
        Ok(&self.decoded.kind)
    }
}

fn visit_claims(
    claim: &mut Value,
    disclosures: &mut BTreeMap<&str, InProgressDisclosure>,
) -> Result<(), Error> {
    match claim {
        Value::Object(object) => visit_object(object, disclosures),
        Value::Array(array) => {
            let mut new_array_items = decode_array_claims(array, disclosures)?;

            for item in new_array_items.iter_mut() {
                visit_claims(item, disclosures)?;
            }

            *array = new_array_items;
            Ok(())
        }
        _ => Ok(()),
    }
}

fn visit_object(
    object: &mut Map<String, Value>,
    disclosures: &mut BTreeMap<&str, InProgressDisclosure>,
) -> Result<(), Error> {
    // Visit children
    for (name, child_claim) in object.iter_mut() {
        if name != SD_CLAIM_NAME {
            visit_claims(child_claim, disclosures)?
        }
    }

    // Process _sd claim
    let new_claims = match object.remove(SD_CLAIM_NAME) {
        Some(sd_claims) => decode_sd_claims(&sd_claims, disclosures)?,
        None => vec![],
    };

    for (new_claim_name, mut new_claim_value) in new_claims {
        visit_claims(&mut new_claim_value, disclosures)?;

        if object.contains_key(&new_claim_name) {
            return Err(Error::DisclosureClaimCollidesWithJwtClaim(new_claim_name));
        }
        object.insert(new_claim_name, new_claim_value);
    }

    Ok(())
}

fn decode_sd_claims(
    sd_claims: &Value,
    disclosures: &mut BTreeMap<&str, InProgressDisclosure>,
) -> Result<Vec<(String, Value)>, Error> {
    let sd_claims = sd_claims.as_array().ok_or(Error::SdPropertyNotArray)?;
    let mut found_disclosures = vec![];
    for disclosure_hash in sd_claims {
        let disclosure_hash = disclosure_hash.as_str().ok_or(Error::SdClaimNotString)?;

        match disclosures.get_mut(disclosure_hash) {
            Some(in_progress_disclosure) => match in_progress_disclosure.mark_found()? {
                DisclosureKind::ArrayItem(_) => {
                    return Err(Error::ArrayDisclosureWhenExpectingProperty)
                }
                DisclosureKind::Property { name, value } => {
                    found_disclosures.push((name.clone(), value.clone()))
                }
            },
            None => log::trace!("Digest {disclosure_hash} left undisclosed"),
        }
    }

    Ok(found_disclosures)
}

fn decode_array_claims(
    array: &[Value],
    disclosures: &mut BTreeMap<&str, InProgressDisclosure>,
) -> Result<Vec<Value>, Error> {
    let mut new_items = vec![];
    for item in array.iter() {
        match array_item_digest(item) {
            Some(hash) => match disclosures.get_mut(hash) {
                Some(in_progress_disclosure) => match in_progress_disclosure.mark_found()? {
                    DisclosureKind::ArrayItem(value) => new_items.push(value.clone()),
                    DisclosureKind::Property { .. } => {
                        return Err(Error::PropertyDisclosureWhenExpectingArray)
                    }
                },
                None => log::trace!("Array element {hash} left undisclosed"),
            },
            None => new_items.push(item.clone()),
        }
    }

    Ok(new_items)
}

/// Digest held by an array element standing in for a concealed element
pub(crate) fn array_item_digest(item: &Value) -> Option<&str> {
    let obj = item.as_object()?;

    if obj.len() != 1 {
        return None;
    }

    obj.get(ARRAY_CLAIM_ITEM_PROPERTY_NAME)?.as_str()
}
