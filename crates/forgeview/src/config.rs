use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use compositor::TintColor;
use serde::Deserialize;

use crate::cli::Cli;

pub const DEFAULT_INTENSITY: f32 = 0.0;
pub const DEFAULT_STEPS: u32 = 20;
pub const DEFAULT_SIZE: (u32, u32) = (512, 512);

/// Session defaults loaded from an optional TOML file.
///
/// Every field is optional; precedence is CLI flag > config value >
/// built-in default. Unknown keys are rejected so typos surface early.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    pub tint: Option<String>,
    pub intensity: Option<f32>,
    pub steps: Option<u32>,
    pub seed: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid session config")
    }
}

/// Effective settings after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub tint: TintColor,
    pub intensity: f32,
    pub steps: u32,
    pub seed: u64,
    pub size: (u32, u32),
}

pub fn resolve(cli: &Cli, config: &SessionConfig) -> Settings {
    let tint = cli.tint.unwrap_or_else(|| {
        config
            .tint
            .as_deref()
            .map(|hex| {
                TintColor::try_from_hex(hex).unwrap_or_else(|| {
                    tracing::warn!(tint = hex, "config tint is not a hex color; using white");
                    TintColor::WHITE
                })
            })
            .unwrap_or_default()
    });
    let size = cli.size.unwrap_or((
        config.width.unwrap_or(DEFAULT_SIZE.0).max(1),
        config.height.unwrap_or(DEFAULT_SIZE.1).max(1),
    ));
    Settings {
        tint,
        intensity: cli
            .intensity
            .or(config.intensity)
            .unwrap_or(DEFAULT_INTENSITY),
        steps: cli.steps.or(config.steps).unwrap_or(DEFAULT_STEPS).max(1),
        seed: cli.seed.or(config.seed).unwrap_or(0),
        size,
    }
}
