use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::elements::ElementName;
use crate::error::HarvestError;

pub const MIN_PERCENT: f64 = 0.0;
pub const MAX_PERCENT: f64 = 100.0;

/// Inclusive percentage window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentRange {
    pub min: f64,
    pub max: f64,
}

impl PercentRange {
    pub fn new(min: f64, max: f64) -> Result<Self, HarvestError> {
        if !min.is_finite() || !max.is_finite() {
            return Err(HarvestError::InvalidCriteria(format!(
                "percentage bounds must be finite, got {min}..{max}"
            )));
        }
        if min > max {
            return Err(HarvestError::InvalidCriteria(format!(
                "minimum {min} is greater than maximum {max}"
            )));
        }
        if min < MIN_PERCENT || max > MAX_PERCENT {
            return Err(HarvestError::InvalidCriteria(format!(
                "percentage range {min}..{max} is outside 0..100"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Criterion {
    Presence {
        element: ElementName,
    },
    Range {
        element: ElementName,
        #[serde(flatten)]
        range: PercentRange,
    },
}

impl Criterion {
    pub fn element(&self) -> &ElementName {
        match self {
            Criterion::Presence { element } | Criterion::Range { element, .. } => element,
        }
    }

    pub fn range(&self) -> Option<PercentRange> {
        match self {
            Criterion::Presence { .. } => None,
            Criterion::Range { range, .. } => Some(*range),
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::Presence { element } => write!(f, "{element}"),
            Criterion::Range { element, range } => {
                write!(f, "{element}={}:{}", range.min, range.max)
            }
        }
    }
}

/// Command-line form: `Pt` for presence, `Pt=10:20` for a range. Either bound
/// may be left empty (`Pt=:20`, `Pt=10:`).
impl FromStr for Criterion {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let Some((name, bounds)) = value.split_once('=') else {
            return Ok(Criterion::Presence {
                element: value.parse()?,
            });
        };
        let element: ElementName = name.parse()?;
        let (min, max) = bounds.split_once(':').ok_or_else(|| {
            HarvestError::InvalidCriteria(format!("expected ELEMENT=MIN:MAX, got {value:?}"))
        })?;
        let min = parse_bound(min, MIN_PERCENT, value)?;
        let max = parse_bound(max, MAX_PERCENT, value)?;
        Ok(Criterion::Range {
            element,
            range: PercentRange::new(min, max)?,
        })
    }
}

fn parse_bound(raw: &str, default: f64, whole: &str) -> Result<f64, HarvestError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(default);
    }
    raw.parse::<f64>()
        .map_err(|_| HarvestError::InvalidCriteria(format!("invalid percentage in {whole:?}")))
}

/// Element filter, at most one criterion per element.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ElementCriteria {
    criteria: Vec<Criterion>,
}

impl ElementCriteria {
    pub fn new(criteria: Vec<Criterion>) -> Result<Self, HarvestError> {
        let mut seen = BTreeSet::new();
        for criterion in &criteria {
            if !seen.insert(criterion.element().clone()) {
                return Err(HarvestError::InvalidCriteria(format!(
                    "element {} is listed more than once",
                    criterion.element()
                )));
            }
        }
        Ok(Self { criteria })
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn has_ranges(&self) -> bool {
        self.criteria.iter().any(|criterion| criterion.range().is_some())
    }

    /// Every named element, whatever its criterion kind.
    pub fn element_names(&self) -> BTreeSet<ElementName> {
        self.criteria
            .iter()
            .map(|criterion| criterion.element().clone())
            .collect()
    }

    pub fn ranges(&self) -> impl Iterator<Item = (&ElementName, PercentRange)> {
        self.criteria
            .iter()
            .filter_map(|criterion| criterion.range().map(|range| (criterion.element(), range)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Criterion> {
        self.criteria.iter()
    }
}

/// Loose shapes accepted from config files and request bodies.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CriteriaInput {
    Elements(Vec<String>),
    Ranges(BTreeMap<String, Option<RangeInput>>),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RangeInput {
    Pair(f64, f64),
    Bounds {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
}

impl TryFrom<CriteriaInput> for ElementCriteria {
    type Error = HarvestError;

    fn try_from(input: CriteriaInput) -> Result<Self, Self::Error> {
        let criteria = match input {
            CriteriaInput::Elements(names) => names
                .iter()
                .map(|name| {
                    Ok(Criterion::Presence {
                        element: name.parse()?,
                    })
                })
                .collect::<Result<Vec<_>, HarvestError>>()?,
            CriteriaInput::Ranges(entries) => entries
                .into_iter()
                .map(|(name, range)| {
                    let element: ElementName = name.parse()?;
                    Ok(match range {
                        None => Criterion::Presence { element },
                        Some(RangeInput::Pair(min, max)) => Criterion::Range {
                            element,
                            range: PercentRange::new(min, max)?,
                        },
                        Some(RangeInput::Bounds { min, max }) => Criterion::Range {
                            element,
                            range: PercentRange::new(
                                min.unwrap_or(MIN_PERCENT),
                                max.unwrap_or(MAX_PERCENT),
                            )?,
                        },
                    })
                })
                .collect::<Result<Vec<_>, HarvestError>>()?,
        };
        ElementCriteria::new(criteria)
    }
}

/// How range criteria combine when several are given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CompositionMatch {
    /// A linked object qualifies if any one range criterion matches.
    #[default]
    Any,
    /// A linked object qualifies only if every range criterion matches.
    All,
}

impl fmt::Display for CompositionMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompositionMatch::Any => write!(f, "any"),
            CompositionMatch::All => write!(f, "all"),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_presence_and_range() {
        let presence: Criterion = "pd".parse().unwrap();
        assert_eq!(presence.element().as_str(), "Pd");
        assert_eq!(presence.range(), None);

        let range: Criterion = "Pt=10:20".parse().unwrap();
        assert_eq!(range.range(), Some(PercentRange { min: 10.0, max: 20.0 }));

        let open: Criterion = "Cu=:35".parse().unwrap();
        assert_eq!(open.range(), Some(PercentRange { min: 0.0, max: 35.0 }));
    }

    #[test]
    fn parse_rejects_inverted_range() {
        let err = "Pt=20:10".parse::<Criterion>().unwrap_err();
        assert_matches!(err, HarvestError::InvalidCriteria(_));
    }

    #[test]
    fn duplicate_elements_are_rejected_case_insensitively() {
        let err = ElementCriteria::new(vec![
            "Pt".parse().unwrap(),
            "PT=1:2".parse().unwrap(),
        ])
        .unwrap_err();
        assert_matches!(err, HarvestError::InvalidCriteria(_));
    }

    #[test]
    fn convert_loose_map_shapes() {
        let input: CriteriaInput = serde_json::from_str(
            r#"{"Pt": [10, 20], "pd": null, "Cu": {"max": 30}}"#,
        )
        .unwrap();
        let criteria = ElementCriteria::try_from(input).unwrap();
        assert_eq!(criteria.len(), 3);
        assert!(criteria.has_ranges());

        let ranges: Vec<_> = criteria
            .ranges()
            .map(|(name, range)| (name.as_str().to_string(), range.min, range.max))
            .collect();
        assert_eq!(
            ranges,
            vec![("Cu".to_string(), 0.0, 30.0), ("Pt".to_string(), 10.0, 20.0)]
        );
    }

    #[test]
    fn convert_plain_list_is_presence_only() {
        let input: CriteriaInput = serde_json::from_str(r#"["Pt", "Pd"]"#).unwrap();
        let criteria = ElementCriteria::try_from(input).unwrap();
        assert!(!criteria.has_ranges());
        assert_eq!(criteria.element_names().len(), 2);
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let range = PercentRange::new(10.0, 20.0).unwrap();
        assert!(range.contains(10.0));
        assert!(range.contains(20.0));
        assert!(!range.contains(20.0001));
    }
}
