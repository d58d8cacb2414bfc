//! A single point in the build matrix

use crate::core::axis::{AxisPattern, PAIR_SEPARATOR, VALUE_SEPARATOR};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed configuration id '{0}'")]
pub struct ConfigurationIdError(pub String);

/// One concrete value for every axis
///
/// The identifier is `axis=value` pairs joined by `,` in axis-name order,
/// so two configurations with the same values always share an id no matter
/// how the axes were declared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    values: BTreeMap<String, String>,
}

impl Configuration {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse an identifier produced by [`Configuration::id`]
    pub fn from_id(id: &str) -> Result<Self, ConfigurationIdError> {
        let mut values = BTreeMap::new();
        if id.is_empty() {
            return Ok(Self { values });
        }

        for pair in id.split(PAIR_SEPARATOR) {
            let (axis, value) = pair
                .split_once(VALUE_SEPARATOR)
                .ok_or_else(|| ConfigurationIdError(id.to_string()))?;
            if axis.is_empty() || value.is_empty() {
                return Err(ConfigurationIdError(id.to_string()));
            }
            if values.insert(axis.to_string(), value.to_string()).is_some() {
                return Err(ConfigurationIdError(id.to_string()));
            }
        }

        Ok(Self { values })
    }

    /// Stable identifier for this combination
    pub fn id(&self) -> String {
        self.values
            .iter()
            .map(|(axis, value)| format!("{}{}{}", axis, VALUE_SEPARATOR, value))
            .collect::<Vec<_>>()
            .join(&PAIR_SEPARATOR.to_string())
    }

    pub fn get(&self, axis: &str) -> Option<&str> {
        self.values.get(axis).map(String::as_str)
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn insert(&mut self, axis: impl Into<String>, value: impl Into<String>) {
        self.values.insert(axis.into(), value.into());
    }

    /// True when every pair of the pattern is present in this configuration
    pub fn matches(&self, pattern: &AxisPattern) -> bool {
        pattern
            .iter()
            .all(|(axis, value)| self.values.get(axis) == Some(value))
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}
