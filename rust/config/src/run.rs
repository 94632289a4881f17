//! Run and sweep configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{DataType, MaskSpec, VLayout};

/// One attention problem to build, run and check.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct RunConfig {
    #[serde(default = "default_name")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "run"))]
    pub name: String,
    #[serde(default = "default_batch")]
    #[cfg_attr(feature = "clap", arg(short = 'b', long, default_value = "2"))]
    pub batch: usize,
    #[serde(default = "default_nhead")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "8"))]
    pub nhead: usize,
    #[serde(default = "default_seqlen")]
    #[cfg_attr(feature = "clap", arg(short = 's', long, default_value = "512"))]
    pub seqlen_q: usize,
    /// Defaults to `seqlen_q`.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub seqlen_k: Option<usize>,
    #[serde(default = "default_hdim")]
    #[cfg_attr(feature = "clap", arg(short = 'd', long, default_value = "128"))]
    pub hdim: usize,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long, default_value = "fp16"))]
    pub dtype: DataType,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long, default_value = "0"))]
    pub mask: MaskSpec,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub bias: bool,
    #[serde(default = "default_true")]
    #[cfg_attr(feature = "clap", arg(long, default_value_t = true, action = clap::ArgAction::Set))]
    pub lse: bool,
    /// Number of key/value splits; 1 runs the plain forward kernel.
    #[serde(default = "default_num_splits")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "1"))]
    pub num_splits: usize,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long, default_value = "row-major"))]
    pub v_layout: VLayout,
    /// Softmax scale; defaults to `1 / sqrt(hdim)`.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub scale: Option<f32>,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long, default_value = "0"))]
    pub seed: u64,
    #[serde(default = "default_warmup")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "1"))]
    pub warmup: usize,
    #[serde(default = "default_repeat")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "5"))]
    pub repeat: usize,
    /// Skip the comparison against the reference.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub no_verify: bool,
}

fn default_name() -> String {
    "run".into()
}
fn default_batch() -> usize {
    2
}
fn default_nhead() -> usize {
    8
}
fn default_seqlen() -> usize {
    512
}
fn default_hdim() -> usize {
    128
}
fn default_true() -> bool {
    true
}
fn default_num_splits() -> usize {
    1
}
fn default_warmup() -> usize {
    1
}
fn default_repeat() -> usize {
    5
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            batch: default_batch(),
            nhead: default_nhead(),
            seqlen_q: default_seqlen(),
            seqlen_k: None,
            hdim: default_hdim(),
            dtype: DataType::default(),
            mask: MaskSpec::default(),
            bias: false,
            lse: true,
            num_splits: default_num_splits(),
            v_layout: VLayout::default(),
            scale: None,
            seed: 0,
            warmup: default_warmup(),
            repeat: default_repeat(),
            no_verify: false,
        }
    }
}

impl RunConfig {
    pub fn seqlen_k(&self) -> usize {
        self.seqlen_k.unwrap_or(self.seqlen_q)
    }

    pub fn scale(&self) -> f32 {
        self.scale.unwrap_or_else(|| 1.0 / (self.hdim as f32).sqrt())
    }

    /// Floating-point operations of one forward pass, ignoring the mask.
    pub fn flops(&self) -> u64 {
        let qk = 2 * self.seqlen_q * self.seqlen_k() * self.hdim;
        let pv = 2 * self.seqlen_q * self.seqlen_k() * self.hdim;
        (self.batch * self.nhead * (qk + pv)) as u64
    }

    /// Reject configurations no kernel can run, before any buffer is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(self.name.clone(), msg));
        if self.batch == 0 || self.nhead == 0 {
            return invalid("batch and nhead must be positive".into());
        }
        if self.seqlen_q == 0 || self.seqlen_k() == 0 {
            return invalid("sequence lengths must be positive".into());
        }
        if self.num_splits == 0 {
            return invalid("num_splits must be at least 1".into());
        }
        if self.repeat == 0 {
            return invalid("repeat must be at least 1".into());
        }
        if let Some(scale) = self.scale
            && !(scale.is_finite() && scale > 0.0)
        {
            return invalid(format!("scale {scale} must be positive and finite"));
        }
        Ok(())
    }

    /// Load a single run from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = read(path.as_ref())?;
        let run: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        run.validate()?;
        Ok(run)
    }
}

/// Sweep file as written, before merging.
#[derive(Debug, Clone, Deserialize)]
struct RawSweepConfig {
    #[serde(default = "empty_table")]
    defaults: toml::Value,
    #[serde(default)]
    runs: Vec<toml::Value>,
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

/// A list of runs with `[defaults]` merged into every `[[runs]]` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    pub runs: Vec<RunConfig>,
}

/// Merge two TOML tables, with `overlay` values taking precedence.
fn merge_toml(base: &toml::Value, overlay: &toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(base_map), toml::Value::Table(overlay_map)) => {
            let mut merged = base_map.clone();
            for (k, v) in overlay_map {
                merged.insert(
                    k.clone(),
                    if let Some(base_v) = base_map.get(k) {
                        merge_toml(base_v, v)
                    } else {
                        v.clone()
                    },
                );
            }
            toml::Value::Table(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

impl SweepConfig {
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let raw: RawSweepConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let runs: Vec<RunConfig> = raw
            .runs
            .iter()
            .enumerate()
            .map(|(i, run_value)| {
                let mut merged = merge_toml(&raw.defaults, run_value);
                // Unnamed runs are numbered by position
                if let toml::Value::Table(ref mut t) = merged
                    && !t.contains_key("name")
                {
                    t.insert("name".into(), toml::Value::String(format!("run-{i}")));
                }
                let run: RunConfig = merged
                    .try_into()
                    .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;
                run.validate()?;
                Ok(run)
            })
            .collect::<Result<_, ConfigError>>()?;

        if runs.is_empty() {
            return Err(ConfigError::Parse("sweep has no [[runs]]".into()));
        }
        Ok(Self { runs })
    }

    /// Load a sweep from a TOML file, merging defaults into each run.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::parse(&read(path.as_ref())?)
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.display().to_string(), e))
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid run '{0}': {1}")]
    Invalid(String, String),
}
