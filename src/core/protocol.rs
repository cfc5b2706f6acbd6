//! Declared parameter protocols.
//!
//! A filter declares, per parameter key, the expected value kind and
//! whether the key is optional or updatable while the filter runs.
//! Configuration maps are checked against the protocol once at
//! initialization; runtime updates are additionally checked against the
//! updatable set. Conformance failures are configuration errors and are
//! never retried.

use crate::core::error::ConfigurationError;
use crate::core::types::{KeyValueMap, ValueKind};
use indexmap::IndexMap;
use std::fmt;

/// Declared signature of a single parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSpec {
    kind: ValueKind,
    optional: bool,
    updatable: bool,
}

impl ParameterSpec {
    /// A required, non-updatable parameter of the given kind.
    pub fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            optional: false,
            updatable: false,
        }
    }

    /// Mark the parameter as optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Mark the parameter as updatable while the filter runs.
    pub fn updatable(mut self) -> Self {
        self.updatable = true;
        self
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_updatable(&self) -> bool {
        self.updatable
    }
}

/// The declared parameter set of a filter.
///
/// Built once in a filter's signature and consulted by the node wrapper
/// whenever a configuration or update map comes in.
#[derive(Debug, Clone, Default)]
pub struct Protocol {
    parameters: IndexMap<String, ParameterSpec>,
}

impl Protocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter. Declaring the same key twice is a filter
    /// implementation bug.
    pub fn parameter(mut self, key: impl Into<String>, spec: ParameterSpec) -> Self {
        let key = key.into();
        assert!(
            !self.parameters.contains_key(&key),
            "parameter '{}' declared twice",
            key
        );
        self.parameters.insert(key, spec);
        self
    }

    /// Shorthand for a required parameter.
    pub fn required(self, key: impl Into<String>, kind: ValueKind) -> Self {
        self.parameter(key, ParameterSpec::new(kind))
    }

    /// Shorthand for an optional parameter.
    pub fn optional(self, key: impl Into<String>, kind: ValueKind) -> Self {
        self.parameter(key, ParameterSpec::new(kind).optional())
    }

    pub fn get(&self, key: &str) -> Option<&ParameterSpec> {
        self.parameters.get(key)
    }

    pub fn has_parameter(&self, key: &str) -> bool {
        self.parameters.contains_key(key)
    }

    pub fn is_updatable(&self, key: &str) -> bool {
        self.parameters
            .get(key)
            .map(|spec| spec.updatable)
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterSpec)> {
        self.parameters.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Check that `map` satisfies this protocol: all required keys are
    /// present, all present values have the declared kind, and no
    /// undeclared keys appear.
    pub fn assert_conforms(&self, map: &KeyValueMap) -> Result<(), ConfigurationError> {
        for (key, spec) in self.iter() {
            match map.get(key) {
                Some(value) => {
                    if !spec.kind.accepts(value) {
                        return Err(ConfigurationError::WrongParameterType {
                            key: key.to_string(),
                            expected: spec.kind,
                            got: value.kind(),
                        });
                    }
                }
                None => {
                    if !spec.optional {
                        return Err(ConfigurationError::MissingParameter {
                            key: key.to_string(),
                        });
                    }
                }
            }
        }
        for key in map.keys() {
            if !self.has_parameter(key) {
                return Err(ConfigurationError::UnknownParameter {
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Apply `update` on top of `current`, checking that every updated key
    /// is declared updatable and that the merged result still conforms.
    pub fn checked_update(
        &self,
        current: &KeyValueMap,
        update: &KeyValueMap,
    ) -> Result<KeyValueMap, ConfigurationError> {
        for key in update.keys() {
            if !self.is_updatable(key) {
                return Err(ConfigurationError::NotUpdatable {
                    key: key.to_string(),
                });
            }
        }
        let mut merged = current.clone();
        merged.merge(update);
        self.assert_conforms(&merged)?;
        Ok(merged)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "protocol {{")?;
        for (key, spec) in self.iter() {
            let need = if spec.optional { "optional" } else { "required" };
            let upd = if spec.updatable { " (updatable)" } else { "" };
            writeln!(f, "  {} {} {}{}", need, spec.kind, key, upd)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Value;

    fn sample_protocol() -> Protocol {
        Protocol::new()
            .required("key", ValueKind::String)
            .optional("repeat", ValueKind::Bool)
            .parameter("object", ParameterSpec::new(ValueKind::Any).optional().updatable())
    }

    #[test]
    fn test_conforming_map() {
        let protocol = sample_protocol();
        let map = KeyValueMap::from_pairs([("key", Value::from("stored"))]);
        assert!(protocol.assert_conforms(&map).is_ok());

        let full = KeyValueMap::from_pairs([
            ("key", Value::from("stored")),
            ("repeat", Value::Bool(true)),
            ("object", Value::Int(3)),
        ]);
        assert!(protocol.assert_conforms(&full).is_ok());
    }

    #[test]
    fn test_missing_required_key() {
        let protocol = sample_protocol();
        let map = KeyValueMap::from_pairs([("repeat", Value::Bool(false))]);
        assert_eq!(
            protocol.assert_conforms(&map),
            Err(ConfigurationError::MissingParameter {
                key: "key".to_string()
            })
        );
    }

    #[test]
    fn test_undeclared_key() {
        let protocol = sample_protocol();
        let map = KeyValueMap::from_pairs([
            ("key", Value::from("stored")),
            ("bogus", Value::Int(1)),
        ]);
        assert_eq!(
            protocol.assert_conforms(&map),
            Err(ConfigurationError::UnknownParameter {
                key: "bogus".to_string()
            })
        );
    }

    #[test]
    fn test_wrong_kind() {
        let protocol = sample_protocol();
        let map = KeyValueMap::from_pairs([("key", Value::Int(7))]);
        assert!(matches!(
            protocol.assert_conforms(&map),
            Err(ConfigurationError::WrongParameterType { .. })
        ));
    }

    #[test]
    fn test_update_of_non_updatable_key_fails() {
        let protocol = sample_protocol();
        let current = KeyValueMap::from_pairs([("key", Value::from("stored"))]);
        let update = KeyValueMap::from_pairs([("key", Value::from("other"))]);
        assert_eq!(
            protocol.checked_update(&current, &update),
            Err(ConfigurationError::NotUpdatable {
                key: "key".to_string()
            })
        );
    }

    #[test]
    fn test_update_merges() {
        let protocol = sample_protocol();
        let current = KeyValueMap::from_pairs([("key", Value::from("stored"))]);
        let update = KeyValueMap::from_pairs([("object", Value::Int(9))]);
        let merged = protocol.checked_update(&current, &update).unwrap();
        assert_eq!(merged.string_value("key"), Some("stored"));
        assert_eq!(merged.int_value("object"), Some(9));
    }

    #[test]
    fn test_any_kind_accepts_everything() {
        let protocol = Protocol::new().parameter(
            "value",
            ParameterSpec::new(ValueKind::Any).optional().updatable(),
        );
        for value in [Value::Int(1), Value::Bool(true), Value::from("x")] {
            let map = KeyValueMap::from_pairs([("value", value)]);
            assert!(protocol.assert_conforms(&map).is_ok());
        }
    }
}
