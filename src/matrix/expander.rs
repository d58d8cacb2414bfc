//! Cartesian expansion of an axis set

use crate::core::{
    axis::{AxisPattern, AxisSet, PAIR_SEPARATOR, VALUE_SEPARATOR},
    configuration::Configuration,
};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatrixError {
    #[error("invalid axis set: {0}")]
    InvalidAxisSet(String),

    #[error("invalid exclusion: {0}")]
    InvalidExclusion(String),

    #[error("all {0} configurations are excluded")]
    AllConfigurationsExcluded(usize),
}

/// Expands axes into configurations
#[derive(Debug, Clone, Copy, Default)]
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Number of combinations before exclusions
    pub fn count(&self, axes: &AxisSet) -> usize {
        if axes.is_empty() {
            return 0;
        }
        axes.iter().map(|(_, values)| values.len()).product()
    }

    /// Check the axis set and exclusions without expanding
    pub fn validate(&self, axes: &AxisSet, exclusions: &[AxisPattern]) -> Result<(), MatrixError> {
        if axes.is_empty() {
            return Err(MatrixError::InvalidAxisSet("no axes defined".to_string()));
        }

        for (name, values) in axes.iter() {
            check_token(name)
                .map_err(|why| MatrixError::InvalidAxisSet(format!("axis name '{}' {}", name, why)))?;

            if values.is_empty() {
                return Err(MatrixError::InvalidAxisSet(format!("axis '{}' has no values", name)));
            }

            let mut seen = HashSet::new();
            for value in values {
                check_token(value).map_err(|why| {
                    MatrixError::InvalidAxisSet(format!("value '{}' of axis '{}' {}", value, name, why))
                })?;
                if !seen.insert(value) {
                    return Err(MatrixError::InvalidAxisSet(format!(
                        "axis '{}' lists '{}' more than once",
                        name, value
                    )));
                }
            }
        }

        for exclusion in exclusions {
            if exclusion.is_empty() {
                return Err(MatrixError::InvalidExclusion(
                    "empty exclusion would remove every configuration".to_string(),
                ));
            }
            for (axis, value) in exclusion.iter() {
                match axes.get(axis) {
                    None => {
                        return Err(MatrixError::InvalidExclusion(format!(
                            "{} names unknown axis '{}'",
                            exclusion, axis
                        )))
                    }
                    Some(values) if !values.contains(value) => {
                        warn!("Exclusion {} can never match: '{}' is not a value of '{}'", exclusion, value, axis);
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(())
    }

    /// Expand into configurations, dropping excluded ones
    ///
    /// Output is ordered by axis name (first axis varies slowest). Values are
    /// not sorted: each keeps its declared position within its axis, so
    /// `3.9` stays ahead of `3.10`. Identifiers do not depend on either order.
    pub fn expand(
        &self,
        axes: &AxisSet,
        exclusions: &[AxisPattern],
    ) -> Result<Vec<Configuration>, MatrixError> {
        self.validate(axes, exclusions)?;

        let mut combinations: Vec<BTreeMap<String, String>> = vec![BTreeMap::new()];
        for (name, values) in axes.iter() {
            let mut next = Vec::with_capacity(combinations.len() * values.len());
            for combo in &combinations {
                for value in values {
                    let mut combo = combo.clone();
                    combo.insert(name.clone(), value.clone());
                    next.push(combo);
                }
            }
            combinations = next;
        }

        let total = combinations.len();
        let configurations: Vec<Configuration> = combinations
            .into_iter()
            .map(Configuration::new)
            .filter(|configuration| {
                !exclusions
                    .iter()
                    .any(|exclusion| configuration.matches(exclusion))
            })
            .collect();

        if configurations.is_empty() {
            return Err(MatrixError::AllConfigurationsExcluded(total));
        }

        debug!(
            "Expanded {} axes into {} configurations ({} excluded)",
            axes.len(),
            configurations.len(),
            total - configurations.len()
        );

        Ok(configurations)
    }
}

fn check_token(token: &str) -> Result<(), &'static str> {
    if token.trim().is_empty() {
        return Err("is empty");
    }
    if token.contains(PAIR_SEPARATOR) || token.contains(VALUE_SEPARATOR) {
        return Err("must not contain ',' or '='");
    }
    Ok(())
}
