use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::shared::{DefaultPolicy, ValidationError};

/// Synchronization settings of a single source/target table pair.
///
/// Every optional field falls back to the [`DefaultPolicy`] when unset. Identifiers are either bare
/// (`users`) or schema-qualified (`dbo.users`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TableSyncSpec {
    /// Table read from the source database.
    pub source_table: String,
    /// Table rewritten in the target database, also the key of the table's worker.
    pub target_table: String,
    /// Overrides [`DefaultPolicy::refresh_interval_secs`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_secs: Option<u64>,
    /// Overrides [`DefaultPolicy::auto_trigger`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_trigger: Option<bool>,
    /// Overrides [`DefaultPolicy::manual_trigger`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_trigger: Option<bool>,
    /// Allow-list of source column names, matched case-insensitively.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    /// Raw predicate appended verbatim as the `WHERE` clause of the source query.
    ///
    /// The predicate is operator-authored configuration and is neither parsed nor sanitized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl TableSyncSpec {
    /// Creates a spec for `source_table` -> `target_table` with every setting left to the defaults.
    pub fn new(source_table: impl Into<String>, target_table: impl Into<String>) -> Self {
        Self {
            source_table: source_table.into(),
            target_table: target_table.into(),
            refresh_interval_secs: None,
            auto_trigger: None,
            manual_trigger: None,
            fields: None,
            filter: None,
        }
    }

    /// Returns the refresh interval in seconds resolved against `defaults`.
    pub fn refresh_interval_secs(&self, defaults: &DefaultPolicy) -> u64 {
        self.refresh_interval_secs
            .unwrap_or(defaults.refresh_interval_secs)
    }

    /// Returns the delay between two scheduled runs.
    ///
    /// An interval of zero seconds is treated as one second.
    pub fn refresh_interval(&self, defaults: &DefaultPolicy) -> Duration {
        Duration::from_secs(self.refresh_interval_secs(defaults).max(1))
    }

    pub fn auto_trigger_enabled(&self, defaults: &DefaultPolicy) -> bool {
        self.auto_trigger.unwrap_or(defaults.auto_trigger)
    }

    pub fn manual_trigger_enabled(&self, defaults: &DefaultPolicy) -> bool {
        self.manual_trigger.unwrap_or(defaults.manual_trigger)
    }

    /// Returns the configured field allow-list, an empty list counts as no allow-list.
    pub fn field_allow_list(&self) -> Option<&[String]> {
        self.fields.as_deref().filter(|fields| !fields.is_empty())
    }

    /// Returns the configured filter predicate, blank predicates count as no filter.
    pub fn filter_predicate(&self) -> Option<&str> {
        self.filter
            .as_deref()
            .map(str::trim)
            .filter(|filter| !filter.is_empty())
    }

    /// Validates the identifiers of the entry at position `index` of the table list.
    pub fn validate(&self, index: usize) -> Result<(), ValidationError> {
        validate_identifier(&self.source_table, index, "source_table")?;
        validate_identifier(&self.target_table, index, "target_table")?;

        Ok(())
    }
}

fn validate_identifier(
    identifier: &str,
    index: usize,
    field: &'static str,
) -> Result<(), ValidationError> {
    if identifier.trim().is_empty() {
        return Err(ValidationError::EmptyTableIdentifier { index, field });
    }

    let segments: Vec<&str> = identifier.split('.').collect();
    if segments.len() > 2 || segments.iter().any(|segment| segment.trim().is_empty()) {
        return Err(ValidationError::InvalidTableIdentifier(
            identifier.to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_fields_fall_back_to_defaults() {
        let defaults = DefaultPolicy {
            refresh_interval_secs: 60,
            auto_trigger: false,
            manual_trigger: true,
            create_target_table: true,
        };
        let spec = TableSyncSpec::new("dbo.Users", "public.users");

        assert_eq!(spec.refresh_interval_secs(&defaults), 60);
        assert!(!spec.auto_trigger_enabled(&defaults));
        assert!(spec.manual_trigger_enabled(&defaults));
    }

    #[test]
    fn table_overrides_win_over_defaults() {
        let defaults = DefaultPolicy::default();
        let spec = TableSyncSpec {
            refresh_interval_secs: Some(15),
            auto_trigger: Some(false),
            manual_trigger: Some(false),
            ..TableSyncSpec::new("Orders", "orders")
        };

        assert_eq!(spec.refresh_interval(&defaults), Duration::from_secs(15));
        assert!(!spec.auto_trigger_enabled(&defaults));
        assert!(!spec.manual_trigger_enabled(&defaults));
    }

    #[test]
    fn zero_interval_is_clamped_to_one_second() {
        let spec = TableSyncSpec {
            refresh_interval_secs: Some(0),
            ..TableSyncSpec::new("Orders", "orders")
        };

        assert_eq!(
            spec.refresh_interval(&DefaultPolicy::default()),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn blank_filter_and_empty_fields_are_ignored() {
        let spec = TableSyncSpec {
            fields: Some(vec![]),
            filter: Some("   ".to_string()),
            ..TableSyncSpec::new("Orders", "orders")
        };

        assert_eq!(spec.field_allow_list(), None);
        assert_eq!(spec.filter_predicate(), None);
    }

    #[test]
    fn identifiers_are_validated() {
        assert!(TableSyncSpec::new("dbo.Users", "users").validate(0).is_ok());
        assert_eq!(
            TableSyncSpec::new("", "users").validate(3),
            Err(ValidationError::EmptyTableIdentifier {
                index: 3,
                field: "source_table"
            })
        );
        assert_eq!(
            TableSyncSpec::new("a.b.c", "users").validate(0),
            Err(ValidationError::InvalidTableIdentifier("a.b.c".to_string()))
        );
        assert_eq!(
            TableSyncSpec::new("Users", "public.").validate(0),
            Err(ValidationError::InvalidTableIdentifier("public.".to_string()))
        );
    }
}
