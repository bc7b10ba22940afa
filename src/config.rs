//! Engine configuration, loaded once from `tactus.toml` in the working
//! directory. Missing file or fields fall back to defaults.

use once_cell::sync::Lazy;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_master_gain")]
    pub master_gain: f32,
    /// Pool size used when a score does not say otherwise.
    #[serde(default = "default_voices")]
    pub voices_per_instrument: usize,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_master_gain() -> f32 {
    1.0
}

fn default_voices() -> usize {
    16
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            master_gain: default_master_gain(),
            voices_per_instrument: default_voices(),
        }
    }
}

impl EngineConfig {
    pub fn load_or_default() -> Self {
        let path = PathBuf::from("tactus.toml");
        if let Ok(txt) = std::fs::read_to_string(&path) {
            toml::from_str(&txt).unwrap_or_default()
        } else {
            Self::default()
        }
    }

    /// Write a commented template the user can edit.
    pub fn generate_default<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
        let mut file = std::fs::File::create(path)?;
        file.write_all(DEFAULT_TEMPLATE.as_bytes())
    }
}

const DEFAULT_TEMPLATE: &str = "\
# tactus engine configuration

# Directory rendered WAV files are written to.
output_dir = \"output\"

# Gain applied to the final mix before the limiter.
master_gain = 1.0

# Pool size used when a score does not say otherwise.
voices_per_instrument = 16
";

pub static CONFIG: Lazy<EngineConfig> = Lazy::new(EngineConfig::load_or_default);
