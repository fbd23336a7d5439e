//! Build configuration from `tacjit.toml`.
//!
//! ```toml
//! [build]
//! entry = "main"
//! data_stack = 4096
//! load_address = 0x400078
//! verify = true
//! ```
//!
//! Every key is optional; command-line flags override the file.

use std::path::{Path, PathBuf};

use crate::api::CompileOptions;
use crate::error::{CompileError, Result};

pub const CONFIG_FILE: &str = "tacjit.toml";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildConfig {
    pub entry: Option<String>,
    pub data_stack: Option<u64>,
    pub load_address: Option<u64>,
    pub verify: Option<bool>,
}

/// Integer in decimal, `0x` hex, with optional `_` separators.
fn parse_int(key: &str, value: &str) -> Result<u64> {
    let cleaned = value.replace('_', "");
    let parsed = match cleaned.strip_prefix("0x").or_else(|| cleaned.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse(),
    };
    parsed.map_err(|_| CompileError::Config(format!("`{}` expects an integer, found `{}`", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(CompileError::Config(format!(
            "`{}` expects true or false, found `{}`",
            key, value
        ))),
    }
}

impl BuildConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Section-aware minimal TOML parsing: only `[build]` is read, other
    /// sections and unknown keys are ignored.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = BuildConfig::default();
        let mut current_section = String::new();

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with('#') || trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                current_section = trimmed[1..trimmed.len() - 1].trim().to_string();
                continue;
            }
            if current_section != "build" {
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(CompileError::Config(format!("expected `key = value`, found `{}`", trimmed)));
            };
            let key = key.trim().trim_matches('"');
            let value = value
                .split_once(" #")
                .map_or(value, |(v, _)| v)
                .trim();
            match key {
                "entry" => config.entry = Some(value.trim_matches('"').to_string()),
                "data_stack" => config.data_stack = Some(parse_int(key, value)?),
                "load_address" => config.load_address = Some(parse_int(key, value)?),
                "verify" => config.verify = Some(parse_bool(key, value)?),
                _ => {}
            }
        }
        Ok(config)
    }

    /// Look for `tacjit.toml` in `start_dir` and its ancestors.
    pub fn find(start_dir: &Path) -> Option<PathBuf> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_FILE);
            if candidate.exists() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// Options with the configured values applied over `base`.
    pub fn apply(&self, base: CompileOptions) -> CompileOptions {
        CompileOptions {
            entry: self.entry.clone().unwrap_or(base.entry),
            data_stack_bytes: self.data_stack.unwrap_or(base.data_stack_bytes),
            load_address: self.load_address.unwrap_or(base.load_address),
            verify_cfg: self.verify.unwrap_or(base.verify_cfg),
        }
    }
}
