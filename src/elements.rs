//! Element symbols and the delimiter-joined element list stored on samples.
//!
//! The service records a sample's elements as one string with every symbol
//! surrounded by `-`, for example `-Pt-Pd-`. Decoding splits on the delimiter
//! and drops empty tokens, so leading, trailing and doubled delimiters are
//! harmless. Symbols are canonicalized on the way in (`pt`, `PT` -> `Pt`), which
//! makes every element comparison in the crate case-insensitive.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

pub const ELEMENT_DELIMITER: char = '-';

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ElementName(String);

impl ElementName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ElementName {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|ch| ch.is_ascii_alphabetic()) {
            return Err(HarvestError::InvalidCriteria(format!(
                "invalid element symbol: {value:?}"
            )));
        }
        let mut chars = trimmed.chars();
        let mut canonical = String::with_capacity(trimmed.len());
        if let Some(first) = chars.next() {
            canonical.push(first.to_ascii_uppercase());
        }
        canonical.extend(chars.map(|ch| ch.to_ascii_lowercase()));
        Ok(Self(canonical))
    }
}

impl TryFrom<String> for ElementName {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ElementName> for String {
    fn from(value: ElementName) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ElementSet(BTreeSet<ElementName>);

impl ElementSet {
    /// Decodes a stored element list. Tokens that are not element symbols
    /// (numbers, stray punctuation) are skipped.
    pub fn decode(encoded: &str) -> Self {
        let names = encoded
            .split(ELEMENT_DELIMITER)
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .filter_map(|token| token.parse::<ElementName>().ok())
            .collect();
        Self(names)
    }

    /// Encodes in the stored form, `-A-B-`; the empty set encodes to `""`.
    pub fn encode(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let mut encoded = String::from(ELEMENT_DELIMITER);
        for name in &self.0 {
            encoded.push_str(name.as_str());
            encoded.push(ELEMENT_DELIMITER);
        }
        encoded
    }

    pub fn contains(&self, name: &ElementName) -> bool {
        self.0.contains(name)
    }

    pub fn intersects(&self, required: &BTreeSet<ElementName>) -> bool {
        self.0.iter().any(|name| required.contains(name))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ElementName> {
        self.0.iter()
    }
}

impl FromIterator<ElementName> for ElementSet {
    fn from_iter<T: IntoIterator<Item = ElementName>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(set: &ElementSet) -> Vec<&str> {
        set.iter().map(ElementName::as_str).collect()
    }

    #[test]
    fn element_symbol_is_canonicalized() {
        let upper: ElementName = "PT".parse().unwrap();
        let lower: ElementName = " pt ".parse().unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.as_str(), "Pt");
    }

    #[test]
    fn element_symbol_rejects_non_letters() {
        assert!("P1".parse::<ElementName>().is_err());
        assert!("".parse::<ElementName>().is_err());
    }

    #[test]
    fn decode_strips_outer_delimiters() {
        let set = ElementSet::decode("-Pt-Pd-");
        assert_eq!(names(&set), vec!["Pd", "Pt"]);
        assert!(set.contains(&"pd".parse().unwrap()));
        assert!(!set.contains(&"Ag".parse().unwrap()));
    }

    #[test]
    fn decode_single_element_without_delimiters() {
        let set = ElementSet::decode("Ag");
        assert_eq!(names(&set), vec!["Ag"]);
    }

    #[test]
    fn decode_empty_and_delimiter_only() {
        assert!(ElementSet::decode("").is_empty());
        assert!(ElementSet::decode("---").is_empty());
    }

    #[test]
    fn decode_skips_doubled_delimiters_and_case() {
        let set = ElementSet::decode("--cu--AU-");
        assert_eq!(names(&set), vec!["Au", "Cu"]);
    }

    #[test]
    fn encode_matches_stored_form() {
        let set = ElementSet::decode("Pt-Pd");
        assert_eq!(set.encode(), "-Pd-Pt-");
        assert_eq!(ElementSet::default().encode(), "");
    }
}
