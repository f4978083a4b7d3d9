//! Final aggregate snapshots read by report sinks after all data types drained.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{CheckId, CheckResult};

/// `index → check → result`
pub type IndexedResults = BTreeMap<u64, BTreeMap<CheckId, CheckResult>>;

/// History entry: result of a good frame, tagged with the frame index
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub index: u64,
    pub result: CheckResult,
}

/// Consistent copy of one data type's aggregate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub data_type: String,
    pub bad_indexes: IndexedResults,
    pub good_indexes: IndexedResults,
    pub history: BTreeMap<CheckId, Vec<HistoryEntry>>,
}

impl AggregateSnapshot {
    pub fn is_empty(&self) -> bool {
        self.bad_indexes.is_empty() && self.good_indexes.is_empty()
    }

    pub fn bad_index_list(&self) -> Vec<u64> {
        self.bad_indexes.keys().copied().collect()
    }

    pub fn history_len(&self, check: CheckId) -> usize {
        self.history.get(&check).map_or(0, Vec::len)
    }
}

/// Report detail level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    /// 不输出报告
    None,
    /// 仅列出失败帧
    Errors,
    /// 失败帧、通过帧与历史
    #[default]
    Full,
}

/// Start index of a source file inside its data type's index space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOffset {
    pub file: String,
    pub start: u64,
}

/// Snapshots of every data type that received traffic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub data_types: BTreeMap<String, AggregateSnapshot>,
}

impl VerificationReport {
    pub fn get(&self, data_type: &str) -> Option<&AggregateSnapshot> {
        self.data_types.get(data_type)
    }

    /// Bad indexes per data type
    pub fn bad_indexes(&self) -> BTreeMap<String, Vec<u64>> {
        self.data_types
            .iter()
            .map(|(data_type, snapshot)| (data_type.clone(), snapshot.bad_index_list()))
            .collect()
    }

    /// Bad indexes per data type and source file, as file-local indexes.
    ///
    /// `offsets` maps each data type to the start index of its files.
    pub fn bad_indexes_per_file(
        &self,
        offsets: &BTreeMap<String, Vec<FileOffset>>,
    ) -> BTreeMap<String, BTreeMap<String, Vec<u64>>> {
        let mut out = BTreeMap::new();
        for (data_type, snapshot) in &self.data_types {
            let Some(files) = offsets.get(data_type) else {
                continue;
            };
            let mut sorted: Vec<&FileOffset> = files.iter().collect();
            sorted.sort_by_key(|f| f.start);

            let mut per_file: BTreeMap<String, Vec<u64>> = sorted
                .iter()
                .map(|f| (f.file.clone(), Vec::new()))
                .collect();
            for index in snapshot.bad_indexes.keys() {
                if let Some(file) = sorted.iter().rev().find(|f| f.start <= *index) {
                    if let Some(list) = per_file.get_mut(&file.file) {
                        list.push(index - file.start);
                    }
                }
            }
            out.insert(data_type.clone(), per_file);
        }
        out
    }
}
