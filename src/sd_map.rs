use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::decode::array_item_digest;
use crate::disclosure::{Disclosure, DisclosureKind};
use crate::{Error, ARRAY_CLAIM_ITEM_PROPERTY_NAME, SD_ALG_CLAIM_NAME, SD_CLAIM_NAME};

/// How many decoy digests to mix into each `_sd` array of a level
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecoyMode {
    /// No decoys
    #[default]
    None,
    /// Exactly `decoys` decoys
    Fixed,
    /// A uniformly chosen count in `0..=decoys`, drawn per object
    Random,
}

/// Selective disclosure map.
///
/// Describes, level by level, which claims are selectively disclosable (at issuance)
/// or selected for disclosure (at presentation). Object properties and array elements
/// are kept apart, so a walk over a claim set never has to guess which one a map entry
/// refers to.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdMap {
    /// Entries for the properties of an object
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, SdField>,

    /// Entries for the elements of an array, by position
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub elements: BTreeMap<usize, SdField>,

    #[serde(default)]
    pub decoy_mode: DecoyMode,

    /// Number (fixed mode) or maximum number (random mode) of decoys for this level
    #[serde(default)]
    pub decoys: usize,
}

/// Entry of an [`SdMap`]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SdField {
    /// Whether the claim itself is selectively disclosable / selected
    pub sd: bool,

    /// Map for the claim's own properties or elements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<SdMap>,
}

impl SdField {
    pub fn new(sd: bool, children: Option<SdMap>) -> Self {
        SdField { sd, children }
    }

    /// A leaf claim that is selectively disclosable as a whole
    pub fn disclosable() -> Self {
        SdField::new(true, None)
    }

    /// Non-disclosable claim whose nested claims are described by `children`
    pub fn nested(children: SdMap) -> Self {
        SdField::new(false, Some(children))
    }

    fn has_children(&self) -> bool {
        self.children.as_ref().map_or(false, |c| !c.is_empty())
    }
}

/// One segment of a claim path
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathSegment {
    /// Object property
    Key(String),
    /// Array element, written `[n]`
    Index(usize),
    /// Bare numeric segment: an array element at that position, or a property of that name
    KeyOrIndex(String, usize),
}

impl SdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decoys(mut self, decoy_mode: DecoyMode, decoys: usize) -> Self {
        self.decoy_mode = decoy_mode;
        self.decoys = decoys;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.elements.is_empty()
    }

    /// Add (or replace) the entry for an object property
    pub fn add_field(
        &mut self,
        name: impl Into<String>,
        sd: bool,
        children: Option<SdMap>,
    ) -> &mut Self {
        self.fields.insert(name.into(), SdField::new(sd, children));
        self
    }

    /// Add (or replace) the entry for an array element
    pub fn add_element(&mut self, index: usize, sd: bool, children: Option<SdMap>) -> &mut Self {
        self.elements.insert(index, SdField::new(sd, children));
        self
    }

    pub fn property(&self, name: &str) -> Option<&SdField> {
        self.fields.get(name)
    }

    pub fn element(&self, index: usize) -> Option<&SdField> {
        self.elements.get(&index)
    }

    pub(crate) fn decoy_count<Rand: Rng>(&self, rng: &mut Rand) -> usize {
        match self.decoy_mode {
            DecoyMode::None => 0,
            DecoyMode::Fixed => self.decoys,
            DecoyMode::Random => rng.gen_range(0..=self.decoys),
        }
    }

    /// Generate an SdMap from claim paths such as `credentialSubject.firstName`,
    /// `nationalities[1]` or `/address/street_address`.
    ///
    /// The last segment of every path is marked disclosable; intermediate segments are
    /// pass-through unless listed as paths of their own.
    pub fn generate_from_paths<S: AsRef<str>>(
        paths: &[S],
        decoy_mode: DecoyMode,
        decoys: usize,
    ) -> Result<SdMap, Error> {
        let mut map = SdMap::new().with_decoys(decoy_mode, decoys);
        for path in paths {
            let segments = parse_path(path.as_ref())?;
            map.insert_path(&segments);
        }
        Ok(map)
    }

    fn insert_path(&mut self, segments: &[PathSegment]) {
        let (first, rest) = match segments.split_first() {
            Some(split) => split,
            None => return,
        };

        let (decoy_mode, decoys) = (self.decoy_mode, self.decoys);
        let mut slots = Vec::with_capacity(2);
        match first {
            PathSegment::Key(name) => slots.push(self.fields.entry(name.clone()).or_default()),
            PathSegment::Index(index) => slots.push(self.elements.entry(*index).or_default()),
            PathSegment::KeyOrIndex(name, index) => {
                slots.push(self.fields.entry(name.clone()).or_default());
                slots.push(self.elements.entry(*index).or_default());
            }
        }

        for field in slots {
            if rest.is_empty() {
                field.sd = true;
            } else {
                field
                    .children
                    .get_or_insert_with(|| SdMap::new().with_decoys(decoy_mode, decoys))
                    .insert_path(rest);
            }
        }
    }

    /// Generate an SdMap by comparing a full payload with the payload that should remain
    /// when nothing is disclosed: every property missing from `undisclosed_payload` is
    /// disclosable.
    pub fn generate_from_payloads(
        full_payload: &Map<String, Value>,
        undisclosed_payload: &Map<String, Value>,
        decoy_mode: DecoyMode,
        decoys: usize,
    ) -> SdMap {
        let mut map = SdMap::new().with_decoys(decoy_mode, decoys);
        for (name, value) in full_payload {
            let field = match (value, undisclosed_payload.get(name)) {
                (_, None) => SdField::disclosable(),
                (Value::Object(full), Some(Value::Object(undisclosed))) => SdField::nested(
                    Self::generate_from_payloads(full, undisclosed, decoy_mode, decoys),
                ),
                _ => SdField::new(false, None),
            };
            map.fields.insert(name.clone(), field);
        }
        map
    }

    /// Rebuild the SdMap of an issued SD-JWT from its undisclosed payload and the
    /// disclosures at hand. Claims whose disclosure is missing do not appear.
    pub fn regenerate(
        undisclosed_payload: &Map<String, Value>,
        disclosures: &[Disclosure],
    ) -> SdMap {
        let by_hash: BTreeMap<&str, &Disclosure> = disclosures
            .iter()
            .map(|disclosure| (disclosure.hash.as_str(), disclosure))
            .collect();
        regenerate_object(undisclosed_payload, &by_hash)
    }

    /// Indented, human readable rendering of the map
    pub fn pretty_print(&self, indent_by: usize) -> String {
        let indentation = " ".repeat(indent_by);
        let mut lines = vec![format!(
            "{indentation}+ with decoys: {:?} ({})",
            self.decoy_mode, self.decoys
        )];
        let entries = self
            .fields
            .iter()
            .map(|(name, field)| (name.clone(), field))
            .chain(
                self.elements
                    .iter()
                    .map(|(index, field)| (format!("[{index}]"), field)),
            );
        for (name, field) in entries {
            lines.push(format!("{indentation}- {name}: {}", field.sd));
            if let Some(children) = &field.children {
                lines.push(children.pretty_print(indent_by + 2));
            }
        }
        lines.join("\n")
    }
}

fn regenerate_value(value: &Value, by_hash: &BTreeMap<&str, &Disclosure>) -> Option<SdMap> {
    match value {
        Value::Object(object) => Some(regenerate_object(object, by_hash)),
        Value::Array(array) => {
            let map = regenerate_array(array, by_hash);
            (!map.is_empty()).then_some(map)
        }
        _ => None,
    }
}

fn regenerate_object(object: &Map<String, Value>, by_hash: &BTreeMap<&str, &Disclosure>) -> SdMap {
    let mut map = SdMap::new();

    if let Some(Value::Array(digests)) = object.get(SD_CLAIM_NAME) {
        for digest in digests.iter().filter_map(Value::as_str) {
            if let Some(Disclosure {
                kind: DisclosureKind::Property { name, value },
                ..
            }) = by_hash.get(digest).copied()
            {
                map.fields.insert(
                    name.clone(),
                    SdField::new(true, regenerate_value(value, by_hash)),
                );
            }
        }
    }

    for (name, value) in object {
        if name == SD_CLAIM_NAME || name == SD_ALG_CLAIM_NAME {
            continue;
        }
        map.fields.insert(
            name.clone(),
            SdField::new(false, regenerate_value(value, by_hash)),
        );
    }

    map
}

fn regenerate_array(array: &[Value], by_hash: &BTreeMap<&str, &Disclosure>) -> SdMap {
    let mut map = SdMap::new();
    for (index, item) in array.iter().enumerate() {
        let field = match array_item_digest(item) {
            Some(digest) => match by_hash.get(digest).copied() {
                Some(Disclosure {
                    kind: DisclosureKind::ArrayItem(value),
                    ..
                }) => SdField::new(true, regenerate_value(value, by_hash)),
                _ => continue,
            },
            None => SdField::new(false, regenerate_value(item, by_hash)),
        };
        if field.sd || field.has_children() {
            map.elements.insert(index, field);
        }
    }
    map
}

/// Split a claim path into segments.
///
/// Paths starting with `/` are read as JSON Pointers (`~1` and `~0` unescaped), others
/// as dot separated names. In dotted paths `name[2]` and `[2]` designate array elements.
/// A purely numeric segment designates an array element or an object property of that
/// name, whichever the claim set has, so a name reused at several nesting levels is
/// resolved by position rather than reported.
///
/// Fails with [`Error::AmbiguousPath`] only for malformed paths: empty segments and
/// unclosed or non-numeric `[n]` indices.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, Error> {
    let ambiguous = || Error::AmbiguousPath(path.to_owned());

    let mut segments = vec![];
    if let Some(pointer) = path.strip_prefix('/') {
        for token in pointer.split('/') {
            let token = token.replace("~1", "/").replace("~0", "~");
            if token.is_empty() {
                return Err(ambiguous());
            }
            segments.push(numeric_or_key(token));
        }
    } else {
        for token in path.split('.') {
            let (name, indices) = match token.find('[') {
                Some(open) => (&token[..open], &token[open..]),
                None => (token, ""),
            };
            if name.is_empty() && indices.is_empty() {
                return Err(ambiguous());
            }
            if !name.is_empty() {
                segments.push(numeric_or_key(name.to_owned()));
            }
            let mut rest = indices;
            while !rest.is_empty() {
                let close = rest.find(']').ok_or_else(ambiguous)?;
                let index = rest[1..close].parse().map_err(|_| ambiguous())?;
                segments.push(PathSegment::Index(index));
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(ambiguous());
                }
            }
        }
    }

    if let Some(PathSegment::Key(name)) = segments.last() {
        if [SD_CLAIM_NAME, SD_ALG_CLAIM_NAME, ARRAY_CLAIM_ITEM_PROPERTY_NAME].contains(&name.as_str())
        {
            return Err(Error::ReservedClaimName(name.clone()));
        }
    }

    Ok(segments)
}

fn numeric_or_key(token: String) -> PathSegment {
    match token.parse::<usize>() {
        Ok(index) if token.bytes().all(|b| b.is_ascii_digit()) => {
            PathSegment::KeyOrIndex(token, index)
        }
        _ => PathSegment::Key(token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sd_map_from_json_paths() {
        let map = SdMap::generate_from_paths(
            &["credentialSubject", "credentialSubject.firstName"],
            DecoyMode::None,
            0,
        )
        .unwrap();
        let subject = map.property("credentialSubject").unwrap();
        assert!(subject.sd);
        assert!(subject.children.as_ref().unwrap().property("firstName").unwrap().sd);

        let map =
            SdMap::generate_from_paths(&["credentialSubject.firstName"], DecoyMode::None, 0).unwrap();
        let subject = map.property("credentialSubject").unwrap();
        assert!(!subject.sd);
        assert!(subject.children.as_ref().unwrap().property("firstName").unwrap().sd);
    }

    #[test]
    fn decoy_settings_propagate_to_children() {
        let map = SdMap::generate_from_paths(&["address.street"], DecoyMode::Fixed, 3).unwrap();
        let children = map.property("address").unwrap().children.as_ref().unwrap();
        assert_eq!(children.decoy_mode, DecoyMode::Fixed);
        assert_eq!(children.decoys, 3);
    }

    #[test]
    fn paths_with_array_indices() {
        assert_eq!(
            parse_path("nationalities[1]").unwrap(),
            vec![
                PathSegment::Key("nationalities".to_owned()),
                PathSegment::Index(1)
            ]
        );
        assert_eq!(
            parse_path("matrix[0][2].value").unwrap(),
            vec![
                PathSegment::Key("matrix".to_owned()),
                PathSegment::Index(0),
                PathSegment::Index(2),
                PathSegment::Key("value".to_owned()),
            ]
        );
        assert_eq!(
            parse_path("/address/street~1nr").unwrap(),
            vec![
                PathSegment::Key("address".to_owned()),
                PathSegment::Key("street/nr".to_owned()),
            ]
        );

        let map = SdMap::generate_from_paths(&["nationalities.0"], DecoyMode::None, 0).unwrap();
        let children = map.property("nationalities").unwrap().children.as_ref().unwrap();
        assert!(children.element(0).unwrap().sd);
        assert!(children.property("0").unwrap().sd);
    }

    #[test]
    fn malformed_paths() {
        for path in ["", "a..b", "a.", "/", "/a//b", "a[", "a[x]", "a[1]b"] {
            assert!(
                matches!(parse_path(path), Err(Error::AmbiguousPath(_))),
                "{path} should be rejected"
            );
        }
        assert!(matches!(
            parse_path("address._sd"),
            Err(Error::ReservedClaimName(_))
        ));
    }

    #[test]
    fn sd_map_from_payloads() {
        let full = json!({
            "sub": "1234",
            "iss": "issuer",
            "address": {"street": "Main St", "country": "DE"}
        });
        let undisclosed = json!({
            "iss": "issuer",
            "address": {"country": "DE"}
        });
        let map = SdMap::generate_from_payloads(
            full.as_object().unwrap(),
            undisclosed.as_object().unwrap(),
            DecoyMode::None,
            0,
        );
        assert!(map.property("sub").unwrap().sd);
        assert!(!map.property("iss").unwrap().sd);
        let address = map.property("address").unwrap();
        assert!(!address.sd);
        let children = address.children.as_ref().unwrap();
        assert!(children.property("street").unwrap().sd);
        assert!(!children.property("country").unwrap().sd);
    }

    #[test]
    fn sd_map_json_form() {
        let mut map = SdMap::new().with_decoys(DecoyMode::Random, 4);
        map.add_field("sub", true, None)
            .add_field("address", false, Some({
                let mut children = SdMap::new();
                children.add_field("street", true, None);
                children
            }))
            .add_element(2, true, None);

        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(
            json,
            json!({
                "fields": {
                    "sub": {"sd": true},
                    "address": {
                        "sd": false,
                        "children": {
                            "fields": {"street": {"sd": true}},
                            "decoyMode": "NONE",
                            "decoys": 0
                        }
                    }
                },
                "elements": {"2": {"sd": true}},
                "decoyMode": "RANDOM",
                "decoys": 4
            })
        );
        let parsed: SdMap = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, map);
    }

    #[test]
    fn pretty_print_lists_entries() {
        let map = SdMap::generate_from_paths(&["sub", "address.street"], DecoyMode::Fixed, 2)
            .unwrap();
        let printed = map.pretty_print(0);
        assert!(printed.contains("- sub: true"));
        assert!(printed.contains("- address: false"));
        assert!(printed.contains("  - street: true"));
        assert!(printed.starts_with("+ with decoys: Fixed (2)"));
    }

    #[test]
    fn random_decoys_stay_in_range() {
        let map = SdMap::new().with_decoys(DecoyMode::Random, 3);
        let mut rng = rand::rngs::OsRng {};
        for _ in 0..50 {
            assert!(map.decoy_count(&mut rng) <= 3);
        }
        assert_eq!(SdMap::new().with_decoys(DecoyMode::None, 3).decoy_count(&mut rng), 0);
        assert_eq!(SdMap::new().with_decoys(DecoyMode::Fixed, 3).decoy_count(&mut rng), 3);
    }
}
