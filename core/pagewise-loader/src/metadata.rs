//! Declarative entity metadata and key predicates.

use crate::error::{LoaderError, LoaderResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

/// Column names for the six audit slots. `None` means the entity does not
/// carry that column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditColumns {
    pub insert_by: Option<&'static str>,
    pub insert_date: Option<&'static str>,
    pub update_by: Option<&'static str>,
    pub update_date: Option<&'static str>,
    pub delete_by: Option<&'static str>,
    pub delete_date: Option<&'static str>,
}

impl AuditColumns {
    /// No audit columns.
    pub const NONE: AuditColumns = AuditColumns {
        insert_by: None,
        insert_date: None,
        update_by: None,
        update_date: None,
        delete_by: None,
        delete_date: None,
    };

    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }
}

/// What the loader needs to know about an entity type.
///
/// ```
/// use pagewise_loader::{AuditColumns, EntityMetadata};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Item {
///     #[serde(rename = "Id")]
///     id: i64,
///     #[serde(rename = "Name")]
///     name: String,
///     #[serde(rename = "ModifiedBy", default)]
///     modified_by: Option<String>,
/// }
///
/// impl EntityMetadata for Item {
///     const ENTITY_SET: &'static str = "Items";
///     type Key = i64;
///
///     fn key_fields() -> &'static [&'static str] {
///         &["Id"]
///     }
///
///     fn audit_columns() -> AuditColumns {
///         AuditColumns {
///             update_by: Some("ModifiedBy"),
///             ..AuditColumns::NONE
///         }
///     }
/// }
/// ```
pub trait EntityMetadata: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Entity set the type lives in, e.g. `"Items"`.
    const ENTITY_SET: &'static str;

    /// Primary key type. Composite keys use a tuple, read from a JSON array
    /// of the key values in `key_fields` order.
    type Key: Serialize + DeserializeOwned + fmt::Debug + Send + 'static;

    /// Serialized names of the key properties, in declaration order.
    fn key_fields() -> &'static [&'static str];

    fn audit_columns() -> AuditColumns {
        AuditColumns::NONE
    }
}

/// Short type name used in error messages.
pub(crate) fn entity_type_name<T>() -> String {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full).to_string()
}

/// Equality over every key property of an entity, AND-combined.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPredicate {
    entity_set: String,
    parts: Vec<(String, Value)>,
}

impl KeyPredicate {
    /// Builds the predicate from a serialized entity.
    pub fn from_value(entity_set: &str, key_fields: &[&str], entity: &Value) -> LoaderResult<Self> {
        if key_fields.is_empty() {
            return Err(LoaderError::Precondition(format!(
                "{entity_set} declares no key fields"
            )));
        }
        let parts = key_fields
            .iter()
            .map(|field| match entity.get(*field) {
                Some(value) if !value.is_null() => Ok((field.to_string(), value.clone())),
                _ => Err(LoaderError::Precondition(format!(
                    "{entity_set} entity has no value for key field {field}"
                ))),
            })
            .collect::<LoaderResult<Vec<_>>>()?;
        Ok(Self {
            entity_set: entity_set.to_string(),
            parts,
        })
    }

    /// Builds the predicate for a typed entity.
    pub fn for_entity<T: EntityMetadata>(entity: &T) -> LoaderResult<Self> {
        let value = serde_json::to_value(entity)?;
        Self::from_value(T::ENTITY_SET, T::key_fields(), &value)
    }

    /// Builds the predicate from a key value. Composite keys serialize as a
    /// sequence in `key_fields` order.
    pub fn from_key<T: EntityMetadata>(key: &T::Key) -> LoaderResult<Self> {
        let fields = T::key_fields();
        let value = serde_json::to_value(key)?;
        let entity = match (fields, value) {
            ([field], value) => {
                let mut object = serde_json::Map::new();
                object.insert(field.to_string(), value);
                Value::Object(object)
            }
            (fields, Value::Array(values)) if values.len() == fields.len() => Value::Object(
                fields
                    .iter()
                    .map(|field| field.to_string())
                    .zip(values)
                    .collect(),
            ),
            (fields, _) => {
                return Err(LoaderError::Precondition(format!(
                    "{} key must have {} parts",
                    T::ENTITY_SET,
                    fields.len()
                )));
            }
        };
        Self::from_value(T::ENTITY_SET, fields, &entity)
    }

    pub fn entity_set(&self) -> &str {
        &self.entity_set
    }

    /// `$filter` expression, e.g. `Id eq 7 and Code eq 'a''b'`.
    pub fn to_filter(&self) -> String {
        self.parts
            .iter()
            .map(|(field, value)| format!("{field} eq {}", literal(value)))
            .collect::<Vec<_>>()
            .join(" and ")
    }

    /// The key segment without the entity set: `7` or `Id=7,Code='x'`.
    pub fn key_text(&self) -> String {
        match self.parts.as_slice() {
            [(_, value)] => literal(value),
            parts => parts
                .iter()
                .map(|(field, value)| format!("{field}={}", literal(value)))
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Addressable identity, e.g. `Items(7)` or `Items(Id=7,Code='x')`.
    pub fn identity(&self) -> String {
        format!("{}({})", self.entity_set, self.key_text())
    }

    /// Whether `entity` carries the same key values.
    pub fn matches(&self, entity: &Value) -> bool {
        self.parts
            .iter()
            .all(|(field, value)| entity.get(field) == Some(value))
    }
}

impl fmt::Display for KeyPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_filter())
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => other.to_string(),
    }
}

/// Reads the key of `entity` as `K`.
pub(crate) fn extract_key<K: DeserializeOwned>(key_fields: &[&str], entity: &Value) -> LoaderResult<K> {
    let missing = |field: &str| LoaderError::Payload(format!("entity has no key field {field}"));
    match key_fields {
        [field] => {
            let value = entity.get(*field).ok_or_else(|| missing(*field))?;
            Ok(serde_json::from_value(value.clone())?)
        }
        fields => {
            let values = fields
                .iter()
                .map(|field| entity.get(*field).cloned().ok_or_else(|| missing(*field)))
                .collect::<LoaderResult<Vec<_>>>()?;
            Ok(serde_json::from_value(Value::Array(values))?)
        }
    }
}
