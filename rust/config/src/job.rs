//! Training job configuration and its argument list.

use serde::{Deserialize, Serialize};

use crate::{DataSources, DatasetType, ModelOverride, Precision};

/// Everything one training launch needs.
///
/// Field names follow the entry point's flags (`wd`, `accum_freq`, `logs`)
/// so a launch file reads like the command line it produces.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    /// Run name, also the subdirectory under `logs`.
    pub name: String,

    // Process topology, consumed by the distributed launcher
    pub nproc_per_node: usize,
    #[serde(default)]
    pub nnodes: Option<usize>,
    #[serde(default)]
    pub node_rank: Option<usize>,
    #[serde(default)]
    pub master_addr: Option<String>,
    #[serde(default)]
    pub master_port: Option<u16>,

    #[serde(default = "default_frequency")]
    pub save_frequency: usize,
    #[serde(default = "default_frequency")]
    pub zeroshot_frequency: usize,
    #[serde(default = "default_log_every")]
    pub log_every_n_steps: usize,

    pub train_data: DataSources,
    pub train_num_samples: u64,
    pub logs: String,
    pub dataset_type: DatasetType,
    pub imagenet_val: String,

    pub warmup: u64,
    pub batch_size: usize,
    pub wd: f64,
    pub epochs: usize,
    pub workers: usize,
    pub accum_freq: usize,
    #[serde(default)]
    pub lr: Option<f64>,

    /// Model architecture identifier, e.g. `ViT-B-16`.
    pub model: String,
    pub precision: Precision,
    pub seed: u64,

    #[serde(default)]
    pub save_most_recent: bool,
    #[serde(default)]
    pub resume_latest: bool,
    #[serde(default)]
    pub grad_checkpointing: bool,
    #[serde(default)]
    pub local_loss: bool,
    #[serde(default)]
    pub gather_with_grad: bool,

    #[serde(default)]
    pub override_model_config: Option<ModelOverride>,

    /// Appended after all named arguments, untouched.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_frequency() -> usize {
    1
}
fn default_log_every() -> usize {
    100
}

impl JobConfig {
    /// Check value ranges. Types and presence are enforced by deserialization.
    pub fn validate(&self) -> Result<(), JobConfigError> {
        fn positive(field: &'static str, value: u64) -> Result<(), JobConfigError> {
            if value == 0 {
                Err(JobConfigError::NotPositive(field))
            } else {
                Ok(())
            }
        }
        fn non_empty(field: &'static str, value: &str) -> Result<(), JobConfigError> {
            if value.trim().is_empty() {
                Err(JobConfigError::Empty(field))
            } else {
                Ok(())
            }
        }

        non_empty("name", &self.name)?;
        non_empty("model", &self.model)?;
        non_empty("logs", &self.logs)?;
        non_empty("imagenet_val", &self.imagenet_val)?;
        if self.train_data.is_empty() {
            return Err(JobConfigError::Empty("train_data"));
        }
        // A single string may already carry `::`; list entries are joined with it.
        if let DataSources::Many(ref sources) = self.train_data
            && let Some(source) = sources
                .iter()
                .find(|s| s.trim().is_empty() || s.contains(crate::SOURCE_SEPARATOR))
        {
            return Err(JobConfigError::BadSource(source.clone()));
        }

        positive("nproc_per_node", self.nproc_per_node as u64)?;
        positive("save_frequency", self.save_frequency as u64)?;
        positive("zeroshot_frequency", self.zeroshot_frequency as u64)?;
        positive("log_every_n_steps", self.log_every_n_steps as u64)?;
        positive("train_num_samples", self.train_num_samples)?;
        positive("batch_size", self.batch_size as u64)?;
        positive("epochs", self.epochs as u64)?;
        positive("accum_freq", self.accum_freq as u64)?;

        if !self.wd.is_finite() || self.wd < 0.0 {
            return Err(JobConfigError::WeightDecay(self.wd));
        }
        if let Some(lr) = self.lr
            && !(lr.is_finite() && lr > 0.0)
        {
            return Err(JobConfigError::LearningRate(lr));
        }

        if let Some(nnodes) = self.nnodes {
            positive("nnodes", nnodes as u64)?;
            if let Some(rank) = self.node_rank
                && rank >= nnodes
            {
                return Err(JobConfigError::NodeRank { rank, nnodes });
            }
        }
        if let Some(ref addr) = self.master_addr {
            non_empty("master_addr", addr)?;
        }

        if self
            .nproc_per_node
            .checked_mul(self.nnodes.unwrap_or(1))
            .and_then(|w| w.checked_mul(self.batch_size))
            .and_then(|b| b.checked_mul(self.accum_freq))
            .is_none()
        {
            return Err(JobConfigError::GlobalBatchOverflow);
        }

        Ok(())
    }

    /// Total processes across all nodes.
    #[must_use]
    pub fn world_size(&self) -> usize {
        self.nproc_per_node.saturating_mul(self.nnodes.unwrap_or(1))
    }

    /// Samples contributing to one optimizer step across the whole job.
    ///
    /// Saturates on unvalidated configs; [`Self::validate`] rejects overflow.
    #[must_use]
    pub fn global_batch_size(&self) -> usize {
        self.batch_size
            .saturating_mul(self.accum_freq)
            .saturating_mul(self.world_size())
    }

    /// Arguments for the distributed launcher itself (`torchrun`).
    #[must_use]
    pub fn launcher_args(&self) -> Vec<String> {
        let mut args = vec![
            "--nproc_per_node".into(),
            self.nproc_per_node.to_string(),
        ];
        if let Some(nnodes) = self.nnodes {
            args.extend(["--nnodes".into(), nnodes.to_string()]);
        }
        if let Some(rank) = self.node_rank {
            args.extend(["--node_rank".into(), rank.to_string()]);
        }
        if let Some(ref addr) = self.master_addr {
            args.extend(["--master_addr".into(), addr.clone()]);
        }
        if let Some(port) = self.master_port {
            args.extend(["--master_port".into(), port.to_string()]);
        }
        args
    }

    /// Convert to entry-point arguments for subprocess invocation.
    ///
    /// One entry per set field, values copied as-is, in a fixed order.
    #[must_use]
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "--save-frequency".into(),
            self.save_frequency.to_string(),
            "--zeroshot-frequency".into(),
            self.zeroshot_frequency.to_string(),
            "--log-every-n-steps".into(),
            self.log_every_n_steps.to_string(),
            "--train-data".into(),
            self.train_data.to_string(),
            "--train-num-samples".into(),
            self.train_num_samples.to_string(),
            "--logs".into(),
            self.logs.clone(),
            "--dataset-type".into(),
            self.dataset_type.to_string(),
            "--imagenet-val".into(),
            self.imagenet_val.clone(),
            "--warmup".into(),
            self.warmup.to_string(),
            "--batch-size".into(),
            self.batch_size.to_string(),
            "--wd".into(),
            self.wd.to_string(),
            "--epochs".into(),
            self.epochs.to_string(),
            "--workers".into(),
            self.workers.to_string(),
            "--accum-freq".into(),
            self.accum_freq.to_string(),
            "--model".into(),
            self.model.clone(),
            "--name".into(),
            self.name.clone(),
        ];
        if let Some(lr) = self.lr {
            args.extend(["--lr".into(), lr.to_string()]);
        }
        if self.save_most_recent {
            args.push("--save-most-recent".into());
        }
        if self.resume_latest {
            args.extend(["--resume".into(), "latest".into()]);
        }
        args.extend([
            "--precision".into(),
            self.precision.to_string(),
            "--seed".into(),
            self.seed.to_string(),
        ]);
        if self.grad_checkpointing {
            args.push("--grad-checkpointing".into());
        }
        if self.local_loss {
            args.push("--local-loss".into());
        }
        if self.gather_with_grad {
            args.push("--gather-with-grad".into());
        }
        if let Some(ref o) = self.override_model_config {
            args.extend(["--override-model-config".into(), o.as_str().to_string()]);
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Directory the entry point writes this run's checkpoints and logs to.
    #[must_use]
    pub fn run_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.logs).join(&self.name)
    }
}

/// Errors from validating a [`JobConfig`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobConfigError {
    #[error("`{0}` must not be empty")]
    Empty(&'static str),
    #[error("`{0}` must be a positive integer")]
    NotPositive(&'static str),
    #[error("invalid training data source '{0}'")]
    BadSource(String),
    #[error("`wd` must be a finite non-negative number, got {0}")]
    WeightDecay(f64),
    #[error("`lr` must be a finite positive number, got {0}")]
    LearningRate(f64),
    #[error("`node_rank` {rank} out of range for {nnodes} node(s)")]
    NodeRank { rank: usize, nnodes: usize },
    #[error("global batch size (batch_size x accum_freq x world size) overflows")]
    GlobalBatchOverflow,
}
