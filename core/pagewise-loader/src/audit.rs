//! Audit stamps written into declared audit columns.

use crate::metadata::AuditColumns;
use chrono::{DateTime, Utc};
use pagewise_transport::dates::format_round_trip;
use serde_json::Value;

/// Who touched an entity and when. Empty slots leave their column alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditStamp {
    pub insert_by: Option<String>,
    pub insert_date: Option<DateTime<Utc>>,
    pub update_by: Option<String>,
    pub update_date: Option<DateTime<Utc>>,
    pub delete_by: Option<String>,
    pub delete_date: Option<DateTime<Utc>>,
}

impl AuditStamp {
    /// Stamp for a new entity. The update slots are filled too, so a fresh
    /// row reads as last touched by its creator.
    pub fn for_insert(user: &str, at: DateTime<Utc>) -> Self {
        Self {
            insert_by: Some(user.to_string()),
            insert_date: Some(at),
            update_by: Some(user.to_string()),
            update_date: Some(at),
            ..Self::default()
        }
    }

    pub fn for_update(user: &str, at: DateTime<Utc>) -> Self {
        Self {
            update_by: Some(user.to_string()),
            update_date: Some(at),
            ..Self::default()
        }
    }

    pub fn for_delete(user: &str, at: DateTime<Utc>) -> Self {
        Self {
            delete_by: Some(user.to_string()),
            delete_date: Some(at),
            ..Self::default()
        }
    }

    /// Writes every filled slot into its declared column of `entity`.
    ///
    /// Returns the number of columns written. Non-object values are left
    /// untouched.
    pub fn apply(&self, entity: &mut Value, columns: &AuditColumns) -> usize {
        let Some(object) = entity.as_object_mut() else {
            return 0;
        };

        let users = [
            (columns.insert_by, &self.insert_by),
            (columns.update_by, &self.update_by),
            (columns.delete_by, &self.delete_by),
        ];
        let dates = [
            (columns.insert_date, &self.insert_date),
            (columns.update_date, &self.update_date),
            (columns.delete_date, &self.delete_date),
        ];

        let mut written = 0;
        for (column, user) in users {
            if let (Some(column), Some(user)) = (column, user) {
                object.insert(column.to_string(), Value::String(user.clone()));
                written += 1;
            }
        }
        for (column, date) in dates {
            if let (Some(column), Some(date)) = (column, date) {
                object.insert(column.to_string(), Value::String(format_round_trip(date)));
                written += 1;
            }
        }
        written
    }
}
