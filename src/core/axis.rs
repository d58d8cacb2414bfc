//! Axis definitions for a build matrix

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Separates `axis=value` pairs inside a configuration identifier
pub const PAIR_SEPARATOR: char = ',';

/// Separates an axis name from its value inside a configuration identifier
pub const VALUE_SEPARATOR: char = '=';

/// Mapping from axis name to the ordered list of values it can take
///
/// Axis names are unique by construction. Iteration is always in axis-name
/// order, which is what makes expansion deterministic regardless of the order
/// axes were declared in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AxisSet {
    axes: BTreeMap<String, Vec<String>>,
}

impl AxisSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, replacing any axis with the same name
    pub fn with_axis<N, I, V>(mut self, name: N, values: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.insert(name, values);
        self
    }

    /// Insert an axis, returning the previous values if the name was taken
    pub fn insert<N, I, V>(&mut self, name: N, values: I) -> Option<Vec<String>>
    where
        N: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.axes
            .insert(name.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.axes.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.axes.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.axes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.axes.iter()
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }
}

/// Partial assignment of axis values
///
/// Used for exclusions, allowed failures, environment rules and upload
/// overrides. A pattern matches a configuration when every pair it lists
/// is present in the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AxisPattern {
    pairs: BTreeMap<String, String>,
}

impl AxisPattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, axis: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.insert(axis.into(), value.into());
        self
    }

    pub fn get(&self, axis: &str) -> Option<&str> {
        self.pairs.get(axis).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.pairs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AxisPattern {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl std::fmt::Display for AxisPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}
