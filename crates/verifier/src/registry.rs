//! CheckRegistry - which checks run per data type, and how each is evaluated.
//!
//! 构造时完成全部配置校验（fail closed）：
//! - 每个配置的检查都必须有对应限值
//! - 依赖表的键必须是基础检查，值必须是统计检查
//! - 统计检查只能挂在其来源检查之下 (`stat_mean ← mean`, `acc_sat ← saturation`)
//! - 数据类型的检查选择不能为空

use std::collections::{BTreeMap, HashMap};

use contracts::{CheckId, CheckResult, CheckSelection, ContractError, FrameData, LimitPair, Limits};
use tracing::instrument;

use crate::aggregate::Aggregate;
use crate::checks;

/// Resolved configuration of one data type
#[derive(Debug, Clone)]
struct DataTypeEntry {
    basic: Vec<CheckId>,
    dependents: BTreeMap<CheckId, Vec<CheckId>>,
    limits: HashMap<&'static str, LimitPair>,
}

impl DataTypeEntry {
    fn limit(&self, key: &'static str) -> Result<&LimitPair, ContractError> {
        self.limits
            .get(key)
            .ok_or_else(|| ContractError::config_validation(key, "limits not resolved"))
    }

    /// `sat.high_limit`, the saturation threshold
    fn saturation_threshold(&self) -> Result<f64, ContractError> {
        self.limit("sat")?
            .high_limit
            .ok_or_else(|| ContractError::config_validation("sat.high_limit", "not set"))
    }
}

/// Immutable check registry shared by every dispatcher
#[derive(Debug, Clone, Default)]
pub struct CheckRegistry {
    data_types: BTreeMap<String, DataTypeEntry>,
}

impl CheckRegistry {
    /// Build the registry for every data type in `selection`.
    ///
    /// # Errors
    /// Configuration errors: missing limits, malformed dependency map, empty selection.
    pub fn new(limits: &Limits, selection: &CheckSelection) -> Result<Self, ContractError> {
        let mut data_types = BTreeMap::new();
        for (data_type, checks) in selection.iter() {
            if checks.is_empty() {
                return Err(ContractError::config_validation(
                    format!("quality_checks.{data_type}"),
                    "no quality checks selected",
                ));
            }

            let mut limit_map = HashMap::new();
            let mut dependents = BTreeMap::new();
            for (&basic, deps) in checks.dependency_map() {
                if basic.is_statistical() {
                    return Err(ContractError::config_validation(
                        format!("quality_checks.{data_type}.{basic}"),
                        "dependency key must be a basic check",
                    ));
                }
                for &dep in deps {
                    if !dep.is_statistical() {
                        return Err(ContractError::config_validation(
                            format!("quality_checks.{data_type}.{basic}"),
                            format!("dependent '{dep}' is not a statistical check"),
                        ));
                    }
                    if dep.source() != Some(basic) {
                        return Err(ContractError::config_validation(
                            format!("quality_checks.{data_type}.{basic}"),
                            format!("'{dep}' can only depend on '{}'", source_name(dep)),
                        ));
                    }
                }

                for check in std::iter::once(basic).chain(deps.iter().copied()) {
                    for &key in check.required_limit_keys() {
                        limit_map.insert(key, *limits.get(data_type, key)?);
                    }
                }

                let mut deps = deps.clone();
                deps.sort();
                deps.dedup();
                dependents.insert(basic, deps);
            }

            let entry = DataTypeEntry {
                basic: checks.basic().collect(),
                dependents,
                limits: limit_map,
            };
            if entry.limits.contains_key("sat") {
                entry.saturation_threshold().map_err(|_| {
                    ContractError::config_validation(
                        format!("limits.{data_type}.sat.high_limit"),
                        "saturation checks need a high_limit threshold",
                    )
                })?;
            }
            data_types.insert(data_type.to_string(), entry);
        }

        Ok(Self { data_types })
    }

    pub fn data_types(&self) -> impl Iterator<Item = &str> {
        self.data_types.keys().map(String::as_str)
    }

    pub fn contains(&self, data_type: &str) -> bool {
        self.data_types.contains_key(data_type)
    }

    /// Basic checks run for every data frame, in code order
    pub fn basic_checks(&self, data_type: &str) -> &[CheckId] {
        self.data_types
            .get(data_type)
            .map(|e| e.basic.as_slice())
            .unwrap_or(&[])
    }

    /// Statistical checks depending on `basic`
    pub fn dependents(&self, data_type: &str, basic: CheckId) -> &[CheckId] {
        self.data_types
            .get(data_type)
            .and_then(|e| e.dependents.get(&basic))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All statistical checks of a data type
    pub fn statistical_checks(&self, data_type: &str) -> Vec<CheckId> {
        self.data_types
            .get(data_type)
            .map(|e| e.dependents.values().flatten().copied().collect())
            .unwrap_or_default()
    }

    /// Basic checks whose good results must be kept as history
    pub fn tracked_checks(&self, data_type: &str) -> Vec<CheckId> {
        self.data_types
            .get(data_type)
            .map(|e| {
                e.dependents
                    .iter()
                    .filter(|(_, deps)| !deps.is_empty())
                    .map(|(basic, _)| *basic)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Evaluate a basic check on one frame
    #[instrument(
        level = "trace",
        name = "registry_evaluate",
        skip_all,
        fields(check = %check, data_type = %data_type)
    )]
    pub fn evaluate(
        &self,
        check: CheckId,
        data_type: &str,
        frame: &FrameData,
    ) -> Result<CheckResult, ContractError> {
        let entry = self.entry(check, data_type)?;
        let pixels = frame.slice.pixels();
        if pixels.is_empty() {
            return Err(ContractError::evaluation(check.name(), "empty slice"));
        }

        let (value, limits) = match check {
            CheckId::Mean => (checks::mean(pixels), entry.limit("mean")?),
            CheckId::StdDev => (checks::std_dev(pixels), entry.limit("st_dev")?),
            CheckId::Sum => (checks::sum(pixels), entry.limit("sum")?),
            CheckId::Saturation => {
                let count = checks::saturated_count(pixels, entry.saturation_threshold()?);
                // 饱和像素数只作记录，不判定失败
                return Ok(CheckResult::new(
                    checks::finite(check, count)?,
                    check,
                    contracts::QualityError::None,
                ));
            }
            CheckId::FrameSaturation => (
                checks::saturated_count(pixels, entry.saturation_threshold()?),
                entry.limit("frame_sat")?,
            ),
            CheckId::RateSaturation => (
                checks::count_rate(pixels, frame.acquire_time)?,
                entry.limit("rate_sat")?,
            ),
            CheckId::StatMean | CheckId::AccumulatedSaturation => {
                return Err(ContractError::evaluation(
                    check.name(),
                    "statistical check evaluated as basic",
                ))
            }
        };

        let value = checks::finite(check, value)?;
        Ok(CheckResult::new(value, check, limits.classify(value)))
    }

    /// Evaluate a statistical check against the aggregate history.
    ///
    /// `frame_results` are the basic results of the current frame; only history
    /// entries with an index lower than `index` are considered.
    #[instrument(
        level = "trace",
        name = "registry_evaluate_statistical",
        skip_all,
        fields(check = %check, data_type = %data_type, index = index)
    )]
    pub fn evaluate_statistical(
        &self,
        check: CheckId,
        data_type: &str,
        aggregate: &Aggregate,
        frame_results: &[CheckResult],
        index: u64,
    ) -> Result<CheckResult, ContractError> {
        let entry = self.entry(check, data_type)?;
        let Some(source) = check.source() else {
            return Err(ContractError::evaluation(
                check.name(),
                "basic check evaluated as statistical",
            ));
        };
        let current = frame_results
            .iter()
            .find(|r| r.check == source)
            .ok_or_else(|| {
                ContractError::evaluation(
                    check.name(),
                    format!("frame has no '{source}' result"),
                )
            })?
            .value;

        let prior = aggregate.history_before(source, index);
        let value = match check {
            CheckId::StatMean => checks::mean_delta(current, &prior),
            _ => checks::accumulated(current, &prior),
        };
        let value = checks::finite(check, value)?;
        let limits = entry.limit(check.limit_key())?;
        Ok(CheckResult::new(value, check, limits.classify(value)))
    }

    fn entry(&self, check: CheckId, data_type: &str) -> Result<&DataTypeEntry, ContractError> {
        self.data_types.get(data_type).ok_or_else(|| {
            ContractError::evaluation(
                check.name(),
                format!("data type '{data_type}' is not registered"),
            )
        })
    }
}

fn source_name(check: CheckId) -> &'static str {
    check.source().map(CheckId::name).unwrap_or("-")
}
