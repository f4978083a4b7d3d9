//! JSON verification report written after every data type drained.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use contracts::{CheckId, FileOffset, HistoryEntry, IndexedResults, ReportType, VerificationReport};
use serde::Serialize;
use tracing::info;

use crate::error::{CliError, Result};

/// Report document as serialized
#[derive(Debug, Serialize)]
pub struct ReportDocument {
    pub report_type: ReportType,
    pub data_types: BTreeMap<String, DataTypeReport>,
    /// `data_type → file → file-local bad indexes`
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub bad_indexes_per_file: BTreeMap<String, BTreeMap<String, Vec<u64>>>,
}

/// Per data type section
#[derive(Debug, Serialize)]
pub struct DataTypeReport {
    pub bad_count: usize,
    pub good_count: usize,
    pub bad_indexes: IndexedResults,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub good_indexes: Option<IndexedResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<BTreeMap<CheckId, Vec<HistoryEntry>>>,
}

impl ReportDocument {
    /// Build the document for `report_type`; `None` disables the report.
    ///
    /// `offsets` enables the per-file section.
    pub fn build(
        report_type: ReportType,
        report: &VerificationReport,
        offsets: Option<&BTreeMap<String, Vec<FileOffset>>>,
    ) -> Option<Self> {
        if report_type == ReportType::None {
            return None;
        }
        let full = report_type == ReportType::Full;

        let data_types = report
            .data_types
            .iter()
            .map(|(data_type, snapshot)| {
                let section = DataTypeReport {
                    bad_count: snapshot.bad_indexes.len(),
                    good_count: snapshot.good_indexes.len(),
                    bad_indexes: snapshot.bad_indexes.clone(),
                    good_indexes: full.then(|| snapshot.good_indexes.clone()),
                    history: full.then(|| snapshot.history.clone()),
                };
                (data_type.clone(), section)
            })
            .collect();

        let bad_indexes_per_file = offsets
            .map(|offsets| report.bad_indexes_per_file(offsets))
            .unwrap_or_default();

        Some(Self {
            report_type,
            data_types,
            bad_indexes_per_file,
        })
    }

    pub fn total_bad(&self) -> usize {
        self.data_types.values().map(|s| s.bad_count).sum()
    }

    /// Write to `path`, or to stdout when no path is given
    pub fn write(&self, path: Option<&Path>) -> Result<()> {
        match path {
            Some(path) => {
                let shown = path.display().to_string();
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(|e| CliError::report(&shown, e.to_string()))?;
                }
                let file = File::create(path).map_err(|e| CliError::report(&shown, e.to_string()))?;
                let mut writer = BufWriter::new(file);
                serde_json::to_writer_pretty(&mut writer, self)
                    .map_err(|e| CliError::report(&shown, e.to_string()))?;
                writer
                    .flush()
                    .map_err(|e| CliError::report(&shown, e.to_string()))?;
                info!(path = %shown, bad = self.total_bad(), "Report written");
            }
            None => {
                let json = serde_json::to_string_pretty(self)
                    .map_err(|e| CliError::report("stdout", e.to_string()))?;
                println!("{}", json);
            }
        }
        Ok(())
    }
}
