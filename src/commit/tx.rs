use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Records written in one call, keyed by relation index.
pub type DataSets = BTreeMap<i32, DataSet>;

/// Record id per relation index after a successful write.
pub type WriteResult = BTreeMap<i32, i64>;

/// One record to create (`record_id == 0`) or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DataSet {
    pub relation_id: Uuid,
    #[serde(default)]
    pub record_id: i64,
    /// Index this record is linked to through `attribute_id`.
    #[serde(default)]
    pub index_from: i32,
    /// Relationship attribute linking this record to `index_from`'s record.
    #[serde(default)]
    pub attribute_id: Option<Uuid>,
    #[serde(default)]
    pub attributes: Vec<DataSetAttribute>,
}

impl DataSet {
    pub fn new(relation_id: Uuid) -> Self {
        Self {
            relation_id,
            ..Self::default()
        }
    }

    pub fn existing(relation_id: Uuid, record_id: i64) -> Self {
        Self {
            relation_id,
            record_id,
            ..Self::default()
        }
    }

    pub fn linked(mut self, index_from: i32, attribute_id: Uuid) -> Self {
        self.index_from = index_from;
        self.attribute_id = Some(attribute_id);
        self
    }

    pub fn set(mut self, attribute_id: Uuid, value: JsonValue) -> Self {
        self.attributes.push(DataSetAttribute {
            attribute_id,
            attribute_id_nm: None,
            value,
            outside_in: false,
        });
        self
    }

    pub fn set_outside_in(
        mut self,
        attribute_id: Uuid,
        attribute_id_nm: Option<Uuid>,
        value: JsonValue,
    ) -> Self {
        self.attributes.push(DataSetAttribute {
            attribute_id,
            attribute_id_nm,
            value,
            outside_in: true,
        });
        self
    }

    pub fn is_new(&self) -> bool {
        self.record_id == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSetAttribute {
    pub attribute_id: Uuid,
    #[serde(default)]
    pub attribute_id_nm: Option<Uuid>,
    #[serde(default)]
    pub value: JsonValue,
    #[serde(default)]
    pub outside_in: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: Uuid,
    pub name: String,
}

/// Value of a files attribute in a data set: changes to the record's
/// file assignments rather than a column value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FileChanges {
    #[serde(default)]
    pub added: Vec<FileRef>,
    #[serde(default)]
    pub renamed: Vec<FileRef>,
    /// Soft-deleted; the file record stays for the change log.
    #[serde(default)]
    pub deleted: Vec<Uuid>,
}

impl FileChanges {
    pub fn from_value(value: &JsonValue) -> Result<Self, EngineError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
            .map_err(|e| EngineError::Validation(format!("invalid file changes: {e}")))
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.renamed.is_empty() && self.deleted.is_empty()
    }
}
