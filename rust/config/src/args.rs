//! Command-line shortcuts for the most commonly overridden job fields.

use crate::{DatasetType, Precision};

/// Per-launch overrides, applied on top of the launch file.
#[derive(Clone, Debug, Default, PartialEq, clap::Args)]
pub struct JobArgs {
    /// Run name
    #[arg(long)]
    pub name: Option<String>,
    /// Training data pattern
    #[arg(long)]
    pub train_data: Option<String>,
    #[arg(long)]
    pub train_num_samples: Option<u64>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub epochs: Option<usize>,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long, value_enum)]
    pub precision: Option<Precision>,
    #[arg(long, value_enum)]
    pub dataset_type: Option<DatasetType>,
    /// Processes per node
    #[arg(long)]
    pub nproc_per_node: Option<usize>,
    /// Model-config override as JSON text
    #[arg(long)]
    pub override_model_config: Option<String>,
}

impl JobArgs {
    /// Render as `key=value` assignments with TOML-literal values.
    #[must_use]
    pub fn to_assignments(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut string = |key: &str, value: &Option<String>| {
            if let Some(v) = value {
                out.push(format!("{key}={}", quote(v)));
            }
        };
        string("name", &self.name);
        string("train_data", &self.train_data);
        string("override_model_config", &self.override_model_config);
        string("precision", &self.precision.map(|p| p.to_string()));
        string("dataset_type", &self.dataset_type.map(|d| d.to_string()));

        if let Some(n) = self.train_num_samples {
            out.push(format!("train_num_samples={n}"));
        }
        if let Some(n) = self.batch_size {
            out.push(format!("batch_size={n}"));
        }
        if let Some(n) = self.epochs {
            out.push(format!("epochs={n}"));
        }
        if let Some(n) = self.seed {
            out.push(format!("seed={n}"));
        }
        if let Some(n) = self.nproc_per_node {
            out.push(format!("nproc_per_node={n}"));
        }
        out
    }
}

// JSON string literals are valid TOML basic strings.
fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}
