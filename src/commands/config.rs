use anyhow::Result;
use std::env;

use crate::commands::CommandReport;
use crate::unddit::config::{UndditConfig, resolve_config_path};

include!(concat!(env!("OUT_DIR"), "/unddit_env_keys.rs"));

fn env_overrides() -> Vec<&'static str> {
    UNDDIT_ENV_KEYS
        .iter()
        .copied()
        .filter(|key| env::var_os(key).is_some_and(|v| !v.is_empty()))
        .collect()
}

pub fn run(cfg: &UndditConfig) -> Result<CommandReport> {
    let mut report = CommandReport::new("config");

    match resolve_config_path() {
        Some(path) if path.is_file() => report.detail(format!("config_file={}", path.display())),
        Some(path) => report.detail(format!("config_file={} (absent)", path.display())),
        None => report.detail("config_file=none"),
    }
    let overrides = env_overrides();
    if overrides.is_empty() {
        report.detail("env_overrides=none");
    } else {
        report.detail(format!("env_overrides={}", overrides.join(",")));
    }

    for line in toml::to_string_pretty(cfg)?.lines() {
        if !line.trim().is_empty() {
            report.detail(line.to_string());
        }
    }
    report.data = Some(serde_json::to_value(cfg)?);
    Ok(report)
}
