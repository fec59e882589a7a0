use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read-only description of every known object type.
///
/// Built once from the external registry (usually via [`SchemaCatalog::from_json`])
/// and shared. `rollup_parameters` lists the parameter ids whose values are
/// summed over assemblies by the parameter cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaCatalog {
    #[serde(with = "types_as_list")]
    types: BTreeMap<String, TypeSchema>,
    #[serde(default)]
    rollup_parameters: Vec<String>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a catalog document: `{"types": [...], "rollup_parameters": [...]}`.
    pub fn from_json(json: &str) -> ModelResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Adds a type, replacing any previous declaration with the same name.
    pub fn register(&mut self, schema: TypeSchema) {
        self.types.insert(schema.name.clone(), schema);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_type(mut self, schema: TypeSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn with_rollup_parameters<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rollup_parameters = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn get(&self, object_type: &str) -> Option<&TypeSchema> {
        self.types.get(object_type)
    }

    /// Like [`get`](Self::get) but fails with `UnknownType`.
    pub fn require(&self, object_type: &str) -> ModelResult<&TypeSchema> {
        self.get(object_type)
            .ok_or_else(|| ModelError::UnknownType(object_type.to_string()))
    }

    pub fn contains(&self, object_type: &str) -> bool {
        self.types.contains_key(object_type)
    }

    /// Type names in alphabetical order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeSchema> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn rollup_parameters(&self) -> &[String] {
        &self.rollup_parameters
    }

    pub fn role_of(&self, object_type: &str) -> Option<&StructuralRole> {
        self.get(object_type).and_then(|s| s.role.as_ref())
    }

    /// Types whose structural role satisfies `pred`.
    pub fn types_with_role<'a>(
        &'a self,
        pred: impl Fn(&StructuralRole) -> bool + 'a,
    ) -> impl Iterator<Item = &'a TypeSchema> + 'a {
        self.types
            .values()
            .filter(move |s| s.role.as_ref().is_some_and(&pred))
    }

    /// Hard-required reference field names of a type (empty if unknown).
    pub fn hard_required(&self, object_type: &str) -> Vec<&str> {
        self.get(object_type)
            .map(|s| s.hard_required_refs().collect())
            .unwrap_or_default()
    }
}

/// Declaration of a single object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSchema {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<StructuralRole>,
}

impl TypeSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            role: None,
        }
    }

    fn push(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            kind,
        });
        self
    }

    /// Shorthand for a plain scalar field (text, number, bool, JSON).
    pub fn scalar(self, name: &str) -> Self {
        self.push(name, FieldKind::Scalar)
    }

    /// Shorthand for a calendar date field.
    pub fn date(self, name: &str) -> Self {
        self.push(name, FieldKind::Date)
    }

    /// Shorthand for a timestamp field.
    pub fn datetime(self, name: &str) -> Self {
        self.push(name, FieldKind::DateTime)
    }

    /// Shorthand for a foreign key into `target`.
    pub fn reference(self, name: &str, target: &str, requirement: RefRequirement) -> Self {
        self.push(
            name,
            FieldKind::Reference {
                target: target.into(),
                requirement,
            },
        )
    }

    /// Shorthand for a computed inverse relation. Never assigned from records.
    pub fn inverse(self, name: &str, target: &str) -> Self {
        self.push(
            name,
            FieldKind::Inverse {
                target: target.into(),
            },
        )
    }

    pub fn with_role(mut self, role: StructuralRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Non-inverse reference fields as `(field, target type, requirement)`.
    pub fn references(&self) -> impl Iterator<Item = (&str, &str, RefRequirement)> {
        self.fields.iter().filter_map(|f| match &f.kind {
            FieldKind::Reference {
                target,
                requirement,
            } => Some((f.name.as_str(), target.as_str(), *requirement)),
            _ => None,
        })
    }

    pub fn hard_required_refs(&self) -> impl Iterator<Item = &str> {
        self.references()
            .filter(|(_, _, req)| *req == RefRequirement::HardRequired)
            .map(|(name, _, _)| name)
    }

    /// Scalar, date and datetime fields.
    pub fn value_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Scalar | FieldKind::Date | FieldKind::DateTime))
    }
}

/// A declared field of a type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
}

/// The kind of a declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Scalar,
    Date,
    DateTime,
    /// Foreign key holding another object's oid.
    Reference {
        target: String,
        #[serde(default)]
        requirement: RefRequirement,
    },
    /// Computed by the store from other objects' references.
    Inverse { target: String },
}

/// How strongly a type depends on a foreign key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefRequirement {
    /// May stay unset.
    #[default]
    Optional,
    /// Participates in type ordering but may resolve to unset.
    Required,
    /// The object cannot exist without it; empty resolution rejects the record.
    HardRequired,
}

impl RefRequirement {
    /// True if the reference constrains the type order.
    pub fn orders(self) -> bool {
        !matches!(self, RefRequirement::Optional)
    }
}

/// The part a type plays in the derived caches. Field values name the
/// reference (or scalar) fields holding each end of the structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralRole {
    /// Can be an assembly or a component and carries rollup parameters.
    Product,
    /// Places `component` into `assembly`, `quantity` times.
    AssemblyUsage {
        assembly: String,
        component: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quantity: Option<String>,
    },
    /// Places a top-level `system` into a `project`.
    SystemUsage { project: String, system: String },
    /// A requirement allocated to an assembly or system usage.
    Requirement { allocated_to: String },
}

impl StructuralRole {
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            StructuralRole::AssemblyUsage { .. } | StructuralRole::SystemUsage { .. }
        )
    }
}

mod types_as_list {
    use super::TypeSchema;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        types: &BTreeMap<String, TypeSchema>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let list: Vec<&TypeSchema> = types.values().collect();
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, TypeSchema>, D::Error> {
        let list = Vec::<TypeSchema>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|t| (t.name.clone(), t)).collect())
    }
}
