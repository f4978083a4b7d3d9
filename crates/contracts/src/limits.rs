//! Limits - `data_type → limit_key → {low_limit, high_limit}`

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{ContractError, QualityError};

/// Inclusive bounds for one check; an absent bound is open on that side
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitPair {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_limit: Option<f64>,
}

impl LimitPair {
    pub fn new(low_limit: Option<f64>, high_limit: Option<f64>) -> Self {
        Self {
            low_limit,
            high_limit,
        }
    }

    pub fn between(low: f64, high: f64) -> Self {
        Self::new(Some(low), Some(high))
    }

    pub fn at_most(high: f64) -> Self {
        Self::new(None, Some(high))
    }

    /// Classify a value; bounds are inclusive
    pub fn classify(&self, value: f64) -> QualityError {
        if self.low_limit.is_some_and(|low| value < low) {
            QualityError::Low
        } else if self.high_limit.is_some_and(|high| value > high) {
            QualityError::High
        } else {
            QualityError::None
        }
    }
}

/// Limits for every data type, immutable once loaded
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Limits(HashMap<String, HashMap<String, LimitPair>>);

impl Limits {
    pub fn new(entries: HashMap<String, HashMap<String, LimitPair>>) -> Self {
        Self(entries)
    }

    /// Builder-style insert (mainly for tests and synthetic setups)
    pub fn with(mut self, data_type: &str, limit_key: &str, pair: LimitPair) -> Self {
        self.0
            .entry(data_type.to_string())
            .or_default()
            .insert(limit_key.to_string(), pair);
        self
    }

    /// Lookup that fails closed
    pub fn get(&self, data_type: &str, limit_key: &str) -> Result<&LimitPair, ContractError> {
        self.0
            .get(data_type)
            .and_then(|checks| checks.get(limit_key))
            .ok_or_else(|| ContractError::missing_limits(data_type, limit_key))
    }

    pub fn contains(&self, data_type: &str, limit_key: &str) -> bool {
        self.get(data_type, limit_key).is_ok()
    }

    pub fn data_types(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}
