use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::ObjectId;
use crate::links::JoinedRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkedObjectDescriptor {
    pub linked_objectid: ObjectId,
    pub linked_objectfilepath: Option<String>,
    pub associated_typename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleSummary {
    pub objectname: Option<String>,
    pub created_date: Option<String>,
    pub updated_date: Option<String>,
    pub main_objectfilepath: Option<String>,
    pub linked_objects: Vec<LinkedObjectDescriptor>,
}

/// One entry per primary object; attributes come from its first row.
pub type GroupedSummary = BTreeMap<ObjectId, SampleSummary>;

pub fn group_rows(rows: &[JoinedRow]) -> GroupedSummary {
    let mut grouped = GroupedSummary::new();
    for row in rows {
        let object = row.object();
        let edge = row.edge();
        grouped
            .entry(object.object_id)
            .or_insert_with(|| SampleSummary {
                objectname: object.object_name,
                created_date: object.created_at,
                updated_date: object.updated_at,
                main_objectfilepath: object.file_path,
                linked_objects: Vec::new(),
            })
            .linked_objects
            .push(LinkedObjectDescriptor {
                linked_objectid: edge.linked_object_id,
                linked_objectfilepath: edge.linked_file_path,
                associated_typename: edge.linked_type_name,
            });
    }
    grouped
}
