//! In-memory process-variable table for failure write-back.
//!
//! 每个 `data_type_check` 对应两个 PV：
//! - `<prefix>:<pv>_ind` 最近一次失败的帧序号
//! - `<prefix>:<pv>_ctr` 失败计数

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use contracts::{ContractError, PvWriter};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
struct PvState {
    index: u64,
    counter: u64,
}

/// PV driver holding the index/counter pair of every registered feedback PV
#[derive(Debug)]
pub struct PvFeedbackDriver {
    prefix: String,
    table: Mutex<HashMap<String, PvState>>,
}

impl PvFeedbackDriver {
    /// Register `pvs` (names like `data_white_mean`) under `prefix`
    pub fn new<I, S>(prefix: impl Into<String>, pvs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let table = pvs
            .into_iter()
            .map(|pv| (pv.into(), PvState::default()))
            .collect();
        Self {
            prefix: prefix.into(),
            table: Mutex::new(table),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn contains(&self, pv: &str) -> bool {
        self.lock().contains_key(pv)
    }

    /// Last failed index written to `pv`
    pub fn index(&self, pv: &str) -> Option<u64> {
        self.lock()
            .get(pv)
            .filter(|state| state.counter > 0)
            .map(|state| state.index)
    }

    /// Number of failures written to `pv`
    pub fn counter(&self, pv: &str) -> Option<u64> {
        self.lock().get(pv).map(|state| state.counter)
    }

    /// Every PV value keyed by its full name
    pub fn values(&self) -> BTreeMap<String, u64> {
        let table = self.lock();
        let mut out = BTreeMap::new();
        for (pv, state) in table.iter() {
            out.insert(self.full_name(pv, "ind"), state.index);
            out.insert(self.full_name(pv, "ctr"), state.counter);
        }
        out
    }

    fn full_name(&self, pv: &str, suffix: &str) -> String {
        format!("{}:{}_{}", self.prefix, pv, suffix)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PvState>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PvWriter for PvFeedbackDriver {
    fn write(&self, name: &str, index: u64) -> Result<(), ContractError> {
        let mut table = self.lock();
        let state = table
            .get_mut(name)
            .ok_or_else(|| ContractError::pv_write(name, "unknown process variable"))?;
        state.index = index;
        state.counter += 1;
        debug!(
            pv = %self.full_name(name, "ind"),
            index,
            counter = state.counter,
            "PV updated"
        );
        Ok(())
    }
}
