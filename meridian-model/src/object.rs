use crate::serialized::{
    SerializedObject, DATA_ELEMENTS_KEY, MOD_DATETIME_KEY, OID_KEY, PARAMETERS_KEY, TYPE_KEY,
};
use meridian_types::{ModDatetime, Oid};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A parameter or data-element value with its own modification time.
///
/// These sub-records are merged one by one, independently of the owning
/// object's `mod_datetime`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRecord {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mod_datetime: Option<ModDatetime>,
}

impl ValueRecord {
    pub fn new(value: Value, units: Option<&str>, mod_datetime: Option<ModDatetime>) -> Self {
        Self {
            value,
            units: units.map(str::to_string),
            mod_datetime,
        }
    }

    /// Lenient read from a payload. A bare value (not an object) is taken as
    /// an untimestamped record; an unparseable timestamp counts as missing.
    pub fn from_json(raw: &Value) -> Self {
        match raw {
            Value::Object(map) if map.contains_key("value") => Self {
                value: map.get("value").cloned().unwrap_or(Value::Null),
                units: map.get("units").and_then(Value::as_str).map(str::to_string),
                mod_datetime: map.get("mod_datetime").and_then(ModDatetime::from_json),
            },
            other => Self {
                value: other.clone(),
                units: None,
                mod_datetime: None,
            },
        }
    }

    /// True if this (incoming) record should replace `local`: its timestamp
    /// must be strictly later. A missing incoming timestamp never wins; a
    /// missing local timestamp loses to any present one.
    pub fn supersedes(&self, local: &ValueRecord) -> bool {
        match (self.mod_datetime, local.mod_datetime) {
            (Some(incoming), Some(stored)) => incoming.is_after(&stored),
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }
}

/// The stored form of an object.
///
/// `refs` holds every declared non-inverse foreign key, `None` meaning
/// "not yet set". Inverse relations are not stored; they are answered by
/// scanning other objects' `refs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainObject {
    pub oid: Oid,
    pub object_type: String,
    pub mod_datetime: Option<ModDatetime>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default)]
    pub refs: BTreeMap<String, Option<Oid>>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ValueRecord>,
    #[serde(default)]
    pub data_elements: BTreeMap<String, ValueRecord>,
}

impl DomainObject {
    pub fn new(oid: Oid, object_type: impl Into<String>) -> Self {
        Self {
            oid,
            object_type: object_type.into(),
            mod_datetime: None,
            fields: BTreeMap::new(),
            refs: BTreeMap::new(),
            parameters: BTreeMap::new(),
            data_elements: BTreeMap::new(),
        }
    }

    /// The oid a reference field points at, if set.
    pub fn get_ref(&self, field: &str) -> Option<&Oid> {
        self.refs.get(field).and_then(Option::as_ref)
    }

    pub fn get_field(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get_field(field).and_then(Value::as_str)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get_field(field).and_then(Value::as_f64)
    }

    /// Numeric value of a parameter, if present and numeric.
    pub fn parameter_f64(&self, id: &str) -> Option<f64> {
        self.parameters.get(id).and_then(ValueRecord::as_f64)
    }

    /// Serializes back to the flat wire form (used for tombstone state).
    pub fn to_serialized(&self) -> SerializedObject {
        let mut map = Map::new();
        map.insert(OID_KEY.into(), Value::String(self.oid.to_string()));
        map.insert(TYPE_KEY.into(), Value::String(self.object_type.clone()));
        map.insert(
            MOD_DATETIME_KEY.into(),
            self.mod_datetime
                .map(|ts| Value::String(ts.to_rfc3339()))
                .unwrap_or(Value::Null),
        );
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.clone());
        }
        for (name, target) in &self.refs {
            map.insert(
                name.clone(),
                target
                    .as_ref()
                    .map(|oid| Value::String(oid.to_string()))
                    .unwrap_or(Value::Null),
            );
        }
        if !self.parameters.is_empty() {
            map.insert(PARAMETERS_KEY.into(), records_to_json(&self.parameters));
        }
        if !self.data_elements.is_empty() {
            map.insert(DATA_ELEMENTS_KEY.into(), records_to_json(&self.data_elements));
        }
        SerializedObject::from_map(map)
    }
}

fn records_to_json(records: &BTreeMap<String, ValueRecord>) -> Value {
    let map: Map<String, Value> = records
        .iter()
        .map(|(id, rec)| {
            let v = serde_json::to_value(rec).unwrap_or(Value::Null);
            (id.clone(), v)
        })
        .collect();
    Value::Object(map)
}
