//! Element types, attention masks, and V layouts.

use serde::{Deserialize, Serialize};

/// Element type of Q, K, V and the output.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Fp32,
    Fp64,
    #[default]
    Fp16,
    Bf16,
    Int8,
    Int32,
    Fp8,
    Bf8,
}

impl DataType {
    /// Relative tolerance when checking results of this type against a reference.
    pub fn rtol(&self) -> f64 {
        match self {
            Self::Fp32 | Self::Fp16 => 1e-3,
            Self::Fp64 => 1e-6,
            Self::Bf16 => 5e-2,
            Self::Int8 | Self::Int32 | Self::Fp8 => 1e-1,
            Self::Bf8 => 1.5e-1,
        }
    }

    /// Absolute tolerance when checking results of this type against a reference.
    pub fn atol(&self) -> f64 {
        match self {
            Self::Fp32 | Self::Fp16 => 1e-3,
            Self::Fp64 => 1e-6,
            Self::Bf16 => 5e-2,
            Self::Int8 | Self::Int32 => 1e-1,
            Self::Fp8 => 16.1,
            Self::Bf8 => 8192.1,
        }
    }

    /// Storage size in bytes.
    pub fn size_of(&self) -> usize {
        match self {
            Self::Fp64 => 8,
            Self::Fp32 | Self::Int32 => 4,
            Self::Fp16 | Self::Bf16 => 2,
            Self::Int8 | Self::Fp8 | Self::Bf8 => 1,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fp32 => write!(f, "fp32"),
            Self::Fp64 => write!(f, "fp64"),
            Self::Fp16 => write!(f, "fp16"),
            Self::Bf16 => write!(f, "bf16"),
            Self::Int8 => write!(f, "int8"),
            Self::Int32 => write!(f, "int32"),
            Self::Fp8 => write!(f, "fp8"),
            Self::Bf8 => write!(f, "bf8"),
        }
    }
}

impl std::str::FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fp32" | "f32" => Ok(Self::Fp32),
            "fp64" | "f64" => Ok(Self::Fp64),
            "fp16" | "f16" => Ok(Self::Fp16),
            "bf16" => Ok(Self::Bf16),
            "int8" | "i8" => Ok(Self::Int8),
            "int32" | "i32" => Ok(Self::Int32),
            "fp8" => Ok(Self::Fp8),
            "bf8" => Ok(Self::Bf8),
            _ => Err(format!(
                "unknown data type '{s}'. Use: fp32, fp64, fp16, bf16, int8, int32, fp8, bf8"
            )),
        }
    }
}

/// Memory layout of V.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum VLayout {
    /// `[batch, head, seqlen_k, hdim_v]`: the pipeline shuffles V in registers
    /// before staging it.
    #[default]
    RowMajor,
    /// `[batch, head, hdim_v, seqlen_k]`.
    ColMajor,
}

impl std::fmt::Display for VLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RowMajor => write!(f, "row-major"),
            Self::ColMajor => write!(f, "col-major"),
        }
    }
}

impl std::str::FromStr for VLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "r" | "row" | "row-major" => Ok(Self::RowMajor),
            "c" | "col" | "col-major" => Ok(Self::ColMajor),
            _ => Err(format!("unknown V layout '{s}'. Use: row-major (r), col-major (c)")),
        }
    }
}

/// Attention mask as written on the command line or in a config file.
///
/// - `"0"` / `"none"` → no mask
/// - `"t"` / `"1"` → causal, aligned to the top-left corner
/// - `"b"` / `"2"` → causal, aligned to the bottom-right corner
/// - `"t:l,r"` / `"b:l,r"` → sliding window with `l` keys to the left and `r`
///   to the right of the diagonal; a negative side is unbounded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MaskSpec {
    #[default]
    None,
    Window {
        left: i64,
        right: i64,
        bottom_right: bool,
    },
}

impl MaskSpec {
    pub fn causal_top_left() -> Self {
        Self::Window {
            left: -1,
            right: 0,
            bottom_right: false,
        }
    }

    pub fn causal_bottom_right() -> Self {
        Self::Window {
            left: -1,
            right: 0,
            bottom_right: true,
        }
    }

    pub fn is_masking(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl std::str::FromStr for MaskSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "0" | "none" => return Ok(Self::None),
            "1" | "t" => return Ok(Self::causal_top_left()),
            "2" | "b" => return Ok(Self::causal_bottom_right()),
            _ => {}
        }
        let (corner, window) = s
            .split_once(':')
            .ok_or_else(|| format!("unknown mask '{s}'. Use: 0, t, b, t:l,r, b:l,r"))?;
        let bottom_right = match corner {
            "t" => false,
            "b" => true,
            _ => return Err(format!("mask corner must be 't' or 'b', got '{corner}'")),
        };
        let (left, right) = window
            .split_once(',')
            .ok_or_else(|| format!("mask window '{window}' must be 'left,right'"))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<i64>()
                .map_err(|_| format!("invalid mask extent '{v}' in '{s}'"))
        };
        Ok(Self::Window {
            left: parse(left)?,
            right: parse(right)?,
            bottom_right,
        })
    }
}

impl std::fmt::Display for MaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::None => write!(f, "none"),
            Self::Window {
                left,
                right,
                bottom_right,
            } => {
                let corner = if bottom_right { "b" } else { "t" };
                if left < 0 && right == 0 {
                    write!(f, "{corner}")
                } else {
                    write!(f, "{corner}:{left},{right}")
                }
            }
        }
    }
}

impl Serialize for MaskSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MaskSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
