//! The flat wire form of an object.
//!
//! A serialized object is a JSON object whose keys are field names. Three
//! keys are structural (`oid`, `type`, `mod_datetime`) and two hold nested
//! value-record maps (`parameters`, `data_elements`). Everything else is
//! interpreted through the schema catalog at merge time.

use crate::error::{ModelError, ModelResult};
use crate::object::ValueRecord;
use meridian_types::{ModDatetime, Oid};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const OID_KEY: &str = "oid";
pub const TYPE_KEY: &str = "type";
pub const MOD_DATETIME_KEY: &str = "mod_datetime";
pub const PARAMETERS_KEY: &str = "parameters";
pub const DATA_ELEMENTS_KEY: &str = "data_elements";

/// One record of a merge batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerializedObject(Map<String, Value>);

impl SerializedObject {
    /// Starts a record with identity and type set.
    pub fn new(oid: &str, object_type: &str) -> Self {
        let mut map = Map::new();
        map.insert(OID_KEY.into(), Value::String(oid.into()));
        map.insert(TYPE_KEY.into(), Value::String(object_type.into()));
        Self(map)
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Builder: sets a field.
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Builder: sets `mod_datetime`.
    pub fn stamped(self, ts: ModDatetime) -> Self {
        self.with(MOD_DATETIME_KEY, ts.to_rfc3339())
    }

    /// Builder: adds a parameter record.
    pub fn with_parameter(self, id: &str, record: ValueRecord) -> Self {
        self.with_record(PARAMETERS_KEY, id, record)
    }

    /// Builder: adds a data-element record.
    pub fn with_data_element(self, id: &str, record: ValueRecord) -> Self {
        self.with_record(DATA_ELEMENTS_KEY, id, record)
    }

    fn with_record(mut self, section: &str, id: &str, record: ValueRecord) -> Self {
        let entry = self
            .0
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(map) = entry {
            map.insert(
                id.into(),
                serde_json::to_value(record).unwrap_or(Value::Null),
            );
        }
        self
    }

    pub fn insert(&mut self, field: &str, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Identity, or `None` when missing or empty.
    pub fn oid(&self) -> Option<Oid> {
        self.0.get(OID_KEY).and_then(Value::as_str).and_then(Oid::new)
    }

    /// Type name, or `None` when missing or empty.
    pub fn object_type(&self) -> Option<&str> {
        self.0
            .get(TYPE_KEY)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// `mod_datetime`, or `None` when missing or unparseable.
    pub fn mod_datetime(&self) -> Option<ModDatetime> {
        self.0.get(MOD_DATETIME_KEY).and_then(ModDatetime::from_json)
    }

    /// The oid held by a reference field; empty strings and non-strings are `None`.
    pub fn reference(&self, field: &str) -> Option<Oid> {
        self.0.get(field).and_then(Value::as_str).and_then(Oid::new)
    }

    pub fn parameters(&self) -> BTreeMap<String, ValueRecord> {
        self.records(PARAMETERS_KEY)
    }

    pub fn data_elements(&self) -> BTreeMap<String, ValueRecord> {
        self.records(DATA_ELEMENTS_KEY)
    }

    fn records(&self, section: &str) -> BTreeMap<String, ValueRecord> {
        match self.0.get(section) {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(id, raw)| (id.clone(), ValueRecord::from_json(raw)))
                .collect(),
            _ => BTreeMap::new(),
        }
    }
}

/// Result of decoding an opaque batch payload.
#[derive(Debug, Clone, Default)]
pub struct DecodedBatch {
    pub records: Vec<SerializedObject>,
    /// Array entries that were not JSON objects.
    pub malformed: usize,
}

/// Decodes a transport payload into records.
///
/// Accepts a JSON array of objects or a single object. Non-object array
/// entries are counted, not fatal. A payload that is not JSON, or whose top
/// level is neither an array nor an object, is an error.
pub fn decode_batch(payload: &[u8]) -> ModelResult<DecodedBatch> {
    let value: Value = serde_json::from_slice(payload)?;
    match value {
        Value::Array(items) => {
            let mut batch = DecodedBatch::default();
            for item in items {
                match item {
                    Value::Object(map) => batch.records.push(SerializedObject(map)),
                    _ => batch.malformed += 1,
                }
            }
            Ok(batch)
        }
        Value::Object(map) => Ok(DecodedBatch {
            records: vec![SerializedObject(map)],
            malformed: 0,
        }),
        other => Err(ModelError::Payload(format!(
            "expected array or object, found {}",
            kind_name(&other)
        ))),
    }
}

fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
