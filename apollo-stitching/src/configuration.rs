//! Logic for loading stitching configuration.
//!
//! Configuration only tunes behaviour that has more than one reasonable answer; everything
//! else about a stitched schema comes from its subschemas and resolvers.

use displaydoc::Display;
use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Clone, Error, Display, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not deserialize configuration: {0}
    DeserializeConfigError(String),
}

/// The configuration for schema stitching.
///
/// Can be created through `serde::Deserialize` from various formats,
/// or inline in Rust code with the builder.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// Options for how subschemas are merged into one schema.
    pub merge: Merge,

    /// Options for errors relocated from subschema responses.
    pub errors: Errors,
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder]
    pub fn new(merge: Option<Merge>, errors: Option<Errors>) -> Self {
        Self {
            merge: merge.unwrap_or_default(),
            errors: errors.unwrap_or_default(),
        }
    }

    /// Parse a YAML configuration.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigurationError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
            .map_err(|e| ConfigurationError::DeserializeConfigError(e.to_string()))
    }
}

/// Which candidate wins when several sources define a type with the same name.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TypeConflicts {
    /// The last registered source wins.
    #[default]
    LastWins,
    /// The first registered source wins.
    FirstWins,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Merge {
    /// Tie-break for conflicting types that are neither root types nor merged types.
    /// default: last_wins
    pub type_conflicts: TypeConflicts,

    /// Remove object types without fields, interfaces without fields or implementers, and
    /// unions without members once the merged schema has been healed.
    /// default: true
    pub prune_schema: bool,
}

impl Default for Merge {
    fn default() -> Self {
        Self {
            type_conflicts: TypeConflicts::default(),
            prune_schema: true,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Errors {
    /// Add `extensions.service` with the subschema name to errors relocated from subschema
    /// responses.
    /// default: false
    pub include_subschema_name: bool,
}

/// Generate a JSON schema for the configuration.
pub fn generate_config_schema() -> RootSchema {
    let settings = SchemaSettings::draft07().with(|s| {
        s.option_nullable = true;
        s.option_add_null_type = false;
        s.inline_subschemas = true;
    });
    settings
        .into_generator()
        .into_root_schema_for::<Configuration>()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(Configuration::from_yaml("").unwrap(), Configuration::default());
        assert!(Configuration::default().merge.prune_schema);
    }

    #[test]
    fn test_from_yaml() {
        let configuration = Configuration::from_yaml(
            r#"
merge:
  type_conflicts: first_wins
errors:
  include_subschema_name: true
"#,
        )
        .unwrap();
        assert_eq!(configuration.merge.type_conflicts, TypeConflicts::FirstWins);
        assert!(configuration.merge.prune_schema);
        assert!(configuration.errors.include_subschema_name);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let error = Configuration::from_yaml("merge:\n  unknown: 1\n").unwrap_err();
        assert!(matches!(
            error,
            ConfigurationError::DeserializeConfigError(_)
        ));
    }

    #[test]
    fn test_config_schema_lists_options() {
        let schema = serde_json::to_value(generate_config_schema()).unwrap();
        let text = schema.to_string();
        assert!(text.contains("type_conflicts"));
        assert!(text.contains("include_subschema_name"));
    }
}
