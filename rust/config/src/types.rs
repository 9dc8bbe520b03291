//! Enumerated argument values understood by the training entry point.

use serde::{Deserialize, Serialize};

/// Dataset format tag passed as `--dataset-type`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum DatasetType {
    #[default]
    Auto,
    Webdataset,
    Csv,
    Synthetic,
}

impl std::fmt::Display for DatasetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Webdataset => write!(f, "webdataset"),
            Self::Csv => write!(f, "csv"),
            Self::Synthetic => write!(f, "synthetic"),
        }
    }
}

impl std::str::FromStr for DatasetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "webdataset" | "wds" => Ok(Self::Webdataset),
            "csv" => Ok(Self::Csv),
            "synthetic" => Ok(Self::Synthetic),
            _ => Err(format!(
                "unknown dataset type '{s}'. Use: auto, webdataset, csv, synthetic"
            )),
        }
    }
}

/// Numeric precision mode passed as `--precision`.
///
/// `amp*` variants run mixed precision with autocast; `pure_*` variants cast
/// the whole model and its inputs.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    #[default]
    Amp,
    #[cfg_attr(feature = "clap", value(name = "amp_bf16"))]
    #[serde(rename = "amp_bf16")]
    AmpBf16,
    #[cfg_attr(feature = "clap", value(name = "amp_bfloat16"))]
    #[serde(rename = "amp_bfloat16")]
    AmpBfloat16,
    Bf16,
    Fp16,
    #[cfg_attr(feature = "clap", value(name = "pure_bf16"))]
    #[serde(rename = "pure_bf16")]
    PureBf16,
    #[cfg_attr(feature = "clap", value(name = "pure_fp16"))]
    #[serde(rename = "pure_fp16")]
    PureFp16,
    Fp32,
}

impl Precision {
    /// Dtype the model weights are cast to, if any.
    #[must_use]
    pub fn cast_dtype(self) -> Option<&'static str> {
        match self {
            Self::Bf16 => Some("bfloat16"),
            Self::Fp16 => Some("float16"),
            _ => None,
        }
    }

    /// Dtype the input batches are cast to, if any.
    #[must_use]
    pub fn input_dtype(self) -> Option<&'static str> {
        match self {
            Self::Bf16 | Self::PureBf16 => Some("bfloat16"),
            Self::Fp16 | Self::PureFp16 => Some("float16"),
            _ => None,
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Amp => write!(f, "amp"),
            Self::AmpBf16 => write!(f, "amp_bf16"),
            Self::AmpBfloat16 => write!(f, "amp_bfloat16"),
            Self::Bf16 => write!(f, "bf16"),
            Self::Fp16 => write!(f, "fp16"),
            Self::PureBf16 => write!(f, "pure_bf16"),
            Self::PureFp16 => write!(f, "pure_fp16"),
            Self::Fp32 => write!(f, "fp32"),
        }
    }
}

impl std::str::FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "amp" => Ok(Self::Amp),
            "amp_bf16" => Ok(Self::AmpBf16),
            "amp_bfloat16" => Ok(Self::AmpBfloat16),
            "bf16" => Ok(Self::Bf16),
            "fp16" => Ok(Self::Fp16),
            "pure_bf16" => Ok(Self::PureBf16),
            "pure_fp16" => Ok(Self::PureFp16),
            "fp32" => Ok(Self::Fp32),
            _ => Err(format!(
                "unknown precision '{s}'. Use: amp, amp_bf16, amp_bfloat16, bf16, fp16, \
                 pure_bf16, pure_fp16, fp32"
            )),
        }
    }
}

/// Training data location: one pattern, or several joined with `::`.
///
/// A single pattern is passed through untouched, brace ranges included
/// (`data/{00000..00001}.tar`); expansion is the data loader's job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataSources {
    One(String),
    Many(Vec<String>),
}

/// Separator the data loader splits multiple sources on.
pub const SOURCE_SEPARATOR: &str = "::";

impl DataSources {
    /// Individual source patterns.
    #[must_use]
    pub fn sources(&self) -> Vec<&str> {
        match self {
            Self::One(s) => vec![s.as_str()],
            Self::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sources().iter().all(|s| s.trim().is_empty())
    }
}

impl std::fmt::Display for DataSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::One(s) => write!(f, "{s}"),
            Self::Many(v) => write!(f, "{}", v.join(SOURCE_SEPARATOR)),
        }
    }
}

impl From<&str> for DataSources {
    fn from(s: &str) -> Self {
        Self::One(s.to_string())
    }
}
