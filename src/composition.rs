use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info};

use crate::criteria::{CompositionMatch, ElementCriteria};
use crate::domain::ObjectId;
use crate::elements::ElementName;
use crate::error::HarvestError;
use crate::links::LinkMapping;
use crate::query::composition_query;
use crate::remote::{RemoteExecutor, Row, column_f64, column_id, column_text, require_column};

/// One element percentage recorded against an object. The `sample_id` is the
/// id the composition table keys on, which is the linked composition object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositionRow {
    pub sample_id: ObjectId,
    pub element_name: ElementName,
    pub value_percent: f64,
}

impl CompositionRow {
    /// `Ok(None)` for rows with an empty name or value cell, or whose name is
    /// not an element symbol. A missing column is still an error.
    pub fn from_row(row: &Row) -> Result<Option<Self>, HarvestError> {
        let sample_id = column_id(row, "sampleid")?;
        require_column(row, "elementname")?;
        require_column(row, "valuepercent")?;
        let (Some(raw_name), Some(_)) = (
            column_text(row, "elementname"),
            column_text(row, "valuepercent"),
        ) else {
            debug!(sample = %sample_id, "skipping composition row with an empty cell");
            return Ok(None);
        };
        let value_percent = column_f64(row, "valuepercent")?;
        let Ok(element_name) = raw_name.parse::<ElementName>() else {
            debug!(sample = %sample_id, name = %raw_name, "skipping non-element composition row");
            return Ok(None);
        };
        Ok(Some(Self {
            sample_id,
            element_name,
            value_percent,
        }))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompositionOutcome {
    /// Composition rows that satisfied a range criterion.
    pub rows: Vec<CompositionRow>,
    pub matched_ids: BTreeSet<ObjectId>,
    pub mapping: LinkMapping,
}

/// Rows within a range criterion for their element.
pub fn matching_rows<'a>(
    rows: &'a [CompositionRow],
    criteria: &ElementCriteria,
) -> Vec<&'a CompositionRow> {
    rows.iter()
        .filter(|row| {
            criteria
                .ranges()
                .any(|(element, range)| *element == row.element_name && range.contains(row.value_percent))
        })
        .collect()
}

/// Ids whose composition satisfies the range criteria under `mode`.
pub fn matched_ids(
    rows: &[CompositionRow],
    criteria: &ElementCriteria,
    mode: CompositionMatch,
) -> BTreeSet<ObjectId> {
    let hits = matching_rows(rows, criteria);
    match mode {
        CompositionMatch::Any => hits.iter().map(|row| row.sample_id).collect(),
        CompositionMatch::All => {
            let wanted: BTreeSet<&ElementName> =
                criteria.ranges().map(|(element, _)| element).collect();
            let candidates: BTreeSet<ObjectId> = hits.iter().map(|row| row.sample_id).collect();
            candidates
                .into_iter()
                .filter(|id| {
                    let found: BTreeSet<&ElementName> = hits
                        .iter()
                        .filter(|row| row.sample_id == *id)
                        .map(|row| &row.element_name)
                        .collect();
                    wanted.is_subset(&found)
                })
                .collect()
        }
    }
}

pub fn filter_by_composition<E: RemoteExecutor>(
    executor: &E,
    sample_ids: &[ObjectId],
    mapping: &LinkMapping,
    criteria: &ElementCriteria,
    mode: CompositionMatch,
) -> Result<CompositionOutcome, HarvestError> {
    let samples: BTreeSet<ObjectId> = sample_ids.iter().copied().collect();
    let restricted = mapping.restrict(&samples);
    if restricted.is_empty() {
        info!("no surviving samples in the link mapping, skipping composition query");
        return Ok(CompositionOutcome::default());
    }

    let linked = restricted.linked_ids();
    let Some(sql) = composition_query(&linked) else {
        info!("no linked objects left, skipping composition query");
        return Ok(CompositionOutcome::default());
    };
    debug!(sql = %sql, "querying composition rows");
    let rows = executor
        .execute(&sql)?
        .iter()
        .map(CompositionRow::from_row)
        .filter_map(Result::transpose)
        .collect::<Result<Vec<_>, _>>()?;
    if rows.is_empty() {
        info!("composition query returned no rows");
        return Ok(CompositionOutcome::default());
    }

    let matched = matched_ids(&rows, criteria, mode);
    let mapping = restricted.retain_linked(&matched);
    let rows = matching_rows(&rows, criteria)
        .into_iter()
        .filter(|row| matched.contains(&row.sample_id))
        .cloned()
        .collect();
    info!(
        queried = linked.len(),
        matched = matched.len(),
        samples = mapping.len(),
        mode = %mode,
        "composition range filter applied"
    );
    Ok(CompositionOutcome {
        rows,
        matched_ids: matched,
        mapping,
    })
}
