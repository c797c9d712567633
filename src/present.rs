use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::decode::array_item_digest;
use crate::*;

/// Keep the disclosures reachable through `selection`, in their original order.
///
/// A disclosure is kept when its entry in `selection` is marked `sd`, or when a claim
/// selected below it is only reachable through it. Entries naming plain claims,
/// missing claims or unknown digests select nothing.
pub(crate) fn select_disclosures(
    undisclosed_payload: &Map<String, Value>,
    disclosures: &[Disclosure],
    selection: &SdMap,
) -> Vec<Disclosure> {
    let mut selector = Selector {
        by_hash: disclosures
            .iter()
            .map(|disclosure| (disclosure.hash.as_str(), disclosure))
            .collect(),
        selected: BTreeSet::new(),
    };

    selector.visit_object(undisclosed_payload, selection);

    disclosures
        .iter()
        .filter(|disclosure| selector.selected.contains(disclosure.hash.as_str()))
        .cloned()
        .collect()
}

struct Selector<'a> {
    by_hash: BTreeMap<&'a str, &'a Disclosure>,
    selected: BTreeSet<&'a str>,
}

impl<'a> Selector<'a> {
    /// Returns whether anything below `value` was selected
    fn visit_value(&mut self, value: &'a Value, selection: Option<&SdMap>) -> bool {
        match (value, selection) {
            (Value::Object(object), Some(selection)) => self.visit_object(object, selection),
            (Value::Array(array), Some(selection)) => self.visit_array(array, selection),
            _ => false,
        }
    }

    fn visit_object(&mut self, object: &'a Map<String, Value>, selection: &SdMap) -> bool {
        let mut any_selected = false;

        if let Some(Value::Array(digests)) = object.get(SD_CLAIM_NAME) {
            for digest in digests.iter().filter_map(Value::as_str) {
                let Some(disclosure) = self.by_hash.get(digest).copied() else {
                    continue;
                };
                let DisclosureKind::Property { name, value } = &disclosure.kind else {
                    continue;
                };
                let Some(field) = selection.property(name) else {
                    continue;
                };

                let below = self.visit_value(value, field.children.as_ref());
                if field.sd || below {
                    self.selected.insert(disclosure.hash.as_str());
                    any_selected = true;
                }
            }
        }

        for (name, value) in object {
            if name == SD_CLAIM_NAME {
                continue;
            }
            if let Some(field) = selection.property(name) {
                any_selected |= self.visit_value(value, field.children.as_ref());
            }
        }

        any_selected
    }

    fn visit_array(&mut self, array: &'a [Value], selection: &SdMap) -> bool {
        let mut any_selected = false;

        for (index, item) in array.iter().enumerate() {
            let Some(field) = selection.element(index) else {
                continue;
            };

            match array_item_digest(item) {
                Some(digest) => {
                    let Some(disclosure) = self.by_hash.get(digest).copied() else {
                        continue;
                    };
                    let DisclosureKind::ArrayItem(value) = &disclosure.kind else {
                        continue;
                    };

                    let below = self.visit_value(value, field.children.as_ref());
                    if field.sd || below {
                        self.selected.insert(disclosure.hash.as_str());
                        any_selected = true;
                    }
                }
                None => any_selected |= self.visit_value(item, field.children.as_ref()),
            }
        }

        any_selected
    }
}
