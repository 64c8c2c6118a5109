use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info};

use crate::criteria::ElementCriteria;
use crate::domain::ObjectId;
use crate::elements::{ElementName, ElementSet};
use crate::error::HarvestError;
use crate::query::sample_elements_query;
use crate::remote::{RemoteExecutor, Row, column_id, column_text};

/// Element attributes recorded on one sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleElements {
    pub sample_id: ObjectId,
    pub element_count: Option<i64>,
    pub elements: ElementSet,
}

impl SampleElements {
    pub fn from_row(row: &Row) -> Result<Self, HarvestError> {
        Ok(Self {
            sample_id: column_id(row, "sampleid")?,
            element_count: column_text(row, "elemnumber").and_then(|value| value.parse().ok()),
            elements: column_text(row, "elements")
                .map(|value| ElementSet::decode(&value))
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PresenceOutcome {
    pub sample_ids: Vec<ObjectId>,
    pub rows: Vec<SampleElements>,
}

impl PresenceOutcome {
    pub fn sample_id_set(&self) -> BTreeSet<ObjectId> {
        self.sample_ids.iter().copied().collect()
    }
}

/// Keeps samples carrying at least one of the `required` elements.
pub fn retain_matching(
    samples: Vec<SampleElements>,
    required: &BTreeSet<ElementName>,
) -> PresenceOutcome {
    let rows: Vec<SampleElements> = samples
        .into_iter()
        .filter(|sample| sample.elements.intersects(required))
        .collect();
    PresenceOutcome {
        sample_ids: rows.iter().map(|sample| sample.sample_id).collect(),
        rows,
    }
}

pub fn filter_by_presence<E: RemoteExecutor>(
    executor: &E,
    object_ids: &[ObjectId],
    criteria: &ElementCriteria,
) -> Result<PresenceOutcome, HarvestError> {
    let unique: BTreeSet<ObjectId> = object_ids.iter().copied().collect();
    let Some(sql) = sample_elements_query(&unique) else {
        info!("no objects from the previous stage, skipping element presence query");
        return Ok(PresenceOutcome::default());
    };
    debug!(sql = %sql, "querying sample elements");
    let rows = executor.execute(&sql)?;
    if rows.is_empty() {
        info!("element presence query returned no rows");
        return Ok(PresenceOutcome::default());
    }
    let samples = rows
        .iter()
        .map(SampleElements::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    let outcome = retain_matching(samples, &criteria.element_names());
    info!(
        candidates = unique.len(),
        retained = outcome.sample_ids.len(),
        "element presence filter applied"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: i64, elements: &str) -> SampleElements {
        SampleElements {
            sample_id: ObjectId::new(id),
            element_count: None,
            elements: ElementSet::decode(elements),
        }
    }

    #[test]
    fn retains_on_any_shared_element() {
        let required: BTreeSet<ElementName> =
            ["pt", "Ru"].iter().map(|name| name.parse().unwrap()).collect();
        let outcome = retain_matching(
            vec![sample(1, "-Pt-Pd-"), sample(2, "-Ag-"), sample(3, "-RU-")],
            &required,
        );
        assert_eq!(outcome.sample_ids, vec![ObjectId::new(1), ObjectId::new(3)]);
    }

    #[test]
    fn missing_element_list_never_matches() {
        let required: BTreeSet<ElementName> = ["Pt".parse().unwrap()].into_iter().collect();
        let outcome = retain_matching(vec![sample(1, "")], &required);
        assert!(outcome.sample_ids.is_empty());
    }
}
