//! Check selection - which checks run for each data type.
//!
//! File layout (JSON): `data_type → basic check → [statistical checks]`
//!
//! ```json
//! { "data": { "QUALITYCHECK_MEAN": ["STAT_MEAN"], "QUALITYCHECK_STD": [] } }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::CheckId;

/// Basic checks of one data type and their statistical dependents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataTypeChecks(BTreeMap<CheckId, Vec<CheckId>>);

impl DataTypeChecks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a basic check with its dependents
    pub fn with(mut self, basic: CheckId, dependents: impl IntoIterator<Item = CheckId>) -> Self {
        self.0.entry(basic).or_default().extend(dependents);
        self
    }

    /// Basic checks in code order
    pub fn basic(&self) -> impl Iterator<Item = CheckId> + '_ {
        self.0.keys().copied()
    }

    /// Statistical checks depending on `basic`
    pub fn dependents(&self, basic: CheckId) -> &[CheckId] {
        self.0.get(&basic).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Raw dependency map
    pub fn dependency_map(&self) -> &BTreeMap<CheckId, Vec<CheckId>> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Selection for all data types
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckSelection(BTreeMap<String, DataTypeChecks>);

impl CheckSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, data_type: impl Into<String>, checks: DataTypeChecks) -> Self {
        self.0.insert(data_type.into(), checks);
        self
    }

    pub fn get(&self, data_type: &str) -> Option<&DataTypeChecks> {
        self.0.get(data_type)
    }

    pub fn data_types(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataTypeChecks)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keep only the listed data types
    pub fn retain(&mut self, data_types: &[String]) {
        self.0.retain(|data_type, _| data_types.contains(data_type));
    }
}
