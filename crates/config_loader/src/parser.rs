//! 配置解析模块
//!
//! 支持 TOML (主要) 和 JSON (可选) 格式。

use std::path::Path;

use contracts::{ContractError, VerifierBlueprint};

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML 格式 (推荐)
    Toml,
    /// JSON 格式
    Json,
}

impl ConfigFormat {
    /// 从文件扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// 解析 TOML 格式配置
pub fn parse_toml(content: &str) -> Result<VerifierBlueprint, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 解析 JSON 格式配置
pub fn parse_json(content: &str) -> Result<VerifierBlueprint, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 根据格式解析配置
pub fn parse(content: &str, format: ConfigFormat) -> Result<VerifierBlueprint, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

/// 将相对路径解析为基于配置文件目录的路径
pub fn resolve_paths(blueprint: &mut VerifierBlueprint, base_dir: &Path) {
    let verification = &mut blueprint.verification;
    rebase(&mut verification.limits, base_dir);
    rebase(&mut verification.quality_checks, base_dir);
    if let Some(report_path) = verification.report_path.as_mut() {
        rebase(report_path, base_dir);
    }

    for source in &mut blueprint.sources {
        if let contracts::SourceKind::Raw(raw) = &mut source.kind {
            for file in &mut raw.files {
                rebase(file, base_dir);
            }
        }
    }
}

fn rebase(path: &mut std::path::PathBuf, base_dir: &Path) {
    if path.is_relative() {
        *path = base_dir.join(&*path);
    }
}
