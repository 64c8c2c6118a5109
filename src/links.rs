use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{ObjectId, TypeName};
use crate::error::HarvestError;
use crate::query::LinkedObjectsQuery;
use crate::remote::{RemoteExecutor, Row, column_id, column_text, require_text};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRecord {
    pub object_id: ObjectId,
    pub object_name: Option<String>,
    pub type_name: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkEdge {
    pub main_object_id: ObjectId,
    pub linked_object_id: ObjectId,
    pub linked_file_path: Option<String>,
    pub linked_type_name: String,
}

/// One primary x linked join match, in the column layout of the output table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedRow {
    pub main_objectid: ObjectId,
    pub objectname: Option<String>,
    pub sample_typename: String,
    pub created_date: Option<String>,
    pub updated_date: Option<String>,
    pub main_objectfilepath: Option<String>,
    pub linked_objectid: ObjectId,
    pub linked_objectfilepath: Option<String>,
    pub associated_typename: String,
}

impl JoinedRow {
    pub fn from_row(row: &Row) -> Result<Self, HarvestError> {
        Ok(Self {
            main_objectid: column_id(row, "main_objectid")?,
            objectname: column_text(row, "objectname"),
            sample_typename: require_text(row, "sample_typename")?,
            created_date: column_text(row, "created_date"),
            updated_date: column_text(row, "updated_date"),
            main_objectfilepath: column_text(row, "main_objectfilepath"),
            linked_objectid: column_id(row, "linked_objectid")?,
            linked_objectfilepath: column_text(row, "linked_objectfilepath"),
            associated_typename: require_text(row, "associated_typename")?,
        })
    }

    pub fn object(&self) -> ObjectRecord {
        ObjectRecord {
            object_id: self.main_objectid,
            object_name: self.objectname.clone(),
            type_name: self.sample_typename.clone(),
            created_at: self.created_date.clone(),
            updated_at: self.updated_date.clone(),
            file_path: self.main_objectfilepath.clone(),
        }
    }

    pub fn edge(&self) -> LinkEdge {
        LinkEdge {
            main_object_id: self.main_objectid,
            linked_object_id: self.linked_objectid,
            linked_file_path: self.linked_objectfilepath.clone(),
            linked_type_name: self.associated_typename.clone(),
        }
    }
}

/// Primary object id to its linked object ids, in join order.
///
/// No key ever maps to an empty list: every constructor and narrowing
/// operation drops keys whose list would end up empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LinkMapping(BTreeMap<ObjectId, Vec<ObjectId>>);

impl LinkMapping {
    pub fn from_rows(rows: &[JoinedRow]) -> Self {
        let mut mapping: BTreeMap<ObjectId, Vec<ObjectId>> = BTreeMap::new();
        for row in rows {
            mapping
                .entry(row.main_objectid)
                .or_default()
                .push(row.linked_objectid);
        }
        Self(mapping)
    }

    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (ObjectId, Vec<ObjectId>)>,
    {
        Self(
            pairs
                .into_iter()
                .filter(|(_, linked)| !linked.is_empty())
                .collect(),
        )
    }

    /// Keeps only the keys in `keys`.
    pub fn restrict(&self, keys: &BTreeSet<ObjectId>) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(key, _)| keys.contains(key))
                .map(|(key, linked)| (*key, linked.clone()))
                .collect(),
        )
    }

    /// Keeps only linked ids in `linked`, dropping keys left with nothing.
    pub fn retain_linked(&self, linked: &BTreeSet<ObjectId>) -> Self {
        Self::from_pairs(self.0.iter().map(|(key, values)| {
            (
                *key,
                values
                    .iter()
                    .copied()
                    .filter(|id| linked.contains(id))
                    .collect(),
            )
        }))
    }

    pub fn get(&self, key: ObjectId) -> Option<&[ObjectId]> {
        self.0.get(&key).map(Vec::as_slice)
    }

    pub fn contains_key(&self, key: ObjectId) -> bool {
        self.0.contains_key(&key)
    }

    pub fn keys(&self) -> BTreeSet<ObjectId> {
        self.0.keys().copied().collect()
    }

    /// Distinct linked ids across all keys.
    pub fn linked_ids(&self) -> BTreeSet<ObjectId> {
        self.0.values().flatten().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &[ObjectId])> {
        self.0.iter().map(|(key, linked)| (*key, linked.as_slice()))
    }
}

/// Output of the object/link stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkedObjects {
    pub rows: Vec<JoinedRow>,
    pub mapping: LinkMapping,
    /// Distinct primary ids in first-seen order.
    pub object_ids: Vec<ObjectId>,
}

impl LinkedObjects {
    pub fn from_rows(rows: Vec<JoinedRow>) -> Self {
        let mapping = LinkMapping::from_rows(&rows);
        let mut seen = BTreeSet::new();
        let object_ids = rows
            .iter()
            .map(|row| row.main_objectid)
            .filter(|id| seen.insert(*id))
            .collect();
        Self {
            rows,
            mapping,
            object_ids,
        }
    }

    /// Keeps primary objects linked to at least one object of every type in
    /// `types`.
    pub fn require_all_types(&self, types: &BTreeSet<TypeName>) -> Self {
        let mut seen: BTreeMap<ObjectId, BTreeSet<&str>> = BTreeMap::new();
        for row in &self.rows {
            seen.entry(row.main_objectid)
                .or_default()
                .insert(row.associated_typename.as_str());
        }
        let complete: BTreeSet<ObjectId> = seen
            .into_iter()
            .filter(|(_, found)| types.iter().all(|name| found.contains(name.as_str())))
            .map(|(id, _)| id)
            .collect();
        self.restrict(&complete)
    }

    pub fn restrict(&self, keys: &BTreeSet<ObjectId>) -> Self {
        Self::from_rows(
            self.rows
                .iter()
                .filter(|row| keys.contains(&row.main_objectid))
                .cloned()
                .collect(),
        )
    }
}

pub fn fetch_linked_objects<E: RemoteExecutor>(
    executor: &E,
    query: &LinkedObjectsQuery,
    strict: bool,
) -> Result<LinkedObjects, HarvestError> {
    let sql = query.render()?;
    debug!(sql = %sql, "querying linked objects");
    let rows = executor
        .execute(&sql)?
        .iter()
        .map(JoinedRow::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    let mut linked = LinkedObjects::from_rows(rows);
    if strict {
        linked = linked.require_all_types(&query.associated_typenames);
    }
    info!(
        rows = linked.rows.len(),
        objects = linked.object_ids.len(),
        linked = linked.mapping.linked_ids().len(),
        "linked objects fetched"
    );
    Ok(linked)
}
