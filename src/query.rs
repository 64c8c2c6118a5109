//! SQL rendering for the VRO object/type/link schema.
//!
//! The service only accepts a raw SQL string, so every literal is rendered
//! inline. Text literals are quoted with doubled single quotes; ids are typed
//! integers and dates are typed `NaiveDate`, so neither can carry quotes.

use std::collections::BTreeSet;

use crate::domain::{DateRange, ObjectId, TypeName, format_date};
use crate::error::HarvestError;

/// Inputs of the primary-object/linked-object join.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedObjectsQuery {
    pub sample_typename: TypeName,
    pub associated_typenames: BTreeSet<TypeName>,
    pub created: DateRange,
}

impl LinkedObjectsQuery {
    /// Renders the join ordered by primary object id. An empty associated
    /// type set is rejected instead of matching every link.
    pub fn render(&self) -> Result<String, HarvestError> {
        if self.associated_typenames.is_empty() {
            return Err(HarvestError::InvalidCriteria(
                "at least one associated type name is required".to_string(),
            ));
        }
        let typenames = self
            .associated_typenames
            .iter()
            .map(|name| quote_literal(name.as_str()))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!(
            "SELECT \
o.objectid AS main_objectid, \
o.objectname, \
t.typename AS sample_typename, \
o._created AS created_date, \
o._updated AS updated_date, \
o.objectfilepath AS main_objectfilepath, \
linked_oi.objectid AS linked_objectid, \
linked_oi.objectfilepath AS linked_objectfilepath, \
ti.typename AS associated_typename \
FROM vroObjectinfo o \
JOIN vroTypeinfo t ON o.typeid = t.typeid \
JOIN vroObjectlinkobject olo ON o.objectid = olo.objectid \
JOIN vroObjectinfo linked_oi ON olo.linkedobjectid = linked_oi.objectid \
JOIN vroTypeinfo ti ON linked_oi.typeid = ti.typeid \
WHERE t.typename = {sample} \
AND ti.typename IN ({typenames}) \
AND o._created >= {start} AND o._created < {end} \
ORDER BY o.objectid, olo.linkedobjectid;",
            sample = quote_literal(self.sample_typename.as_str()),
            start = quote_literal(&format_date(self.created.start())),
            end = quote_literal(&format_date(self.created.end_exclusive())),
        ))
    }
}

/// Element list attributes of the given samples; `None` for an empty id set.
pub fn sample_elements_query(sample_ids: &BTreeSet<ObjectId>) -> Option<String> {
    let ids = id_list(sample_ids)?;
    Some(format!(
        "SELECT s.sampleid, s.elemnumber, s.elements FROM vroSample s WHERE s.sampleid IN ({ids});"
    ))
}

/// Composition rows recorded against the given objects; `None` for an empty id set.
pub fn composition_query(object_ids: &BTreeSet<ObjectId>) -> Option<String> {
    let ids = id_list(object_ids)?;
    Some(format!(
        "SELECT sampleid, elementname, valuepercent FROM vroComposition WHERE sampleid IN ({ids});"
    ))
}

fn id_list(ids: &BTreeSet<ObjectId>) -> Option<String> {
    if ids.is_empty() {
        return None;
    }
    Some(
        ids.iter()
            .map(ObjectId::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    )
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
