//! SPARO training launcher CLI
//!
//! Builds and runs one open_clip training job from a launch file.

use std::process::ExitCode;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use sparo_launch::{Invocation, JobArgs, JobConfig, LaunchFile, Launcher};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sparo-launch",
    about = "Launch open_clip training jobs with a model-config override"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a job and exit with its exit code
    Run {
        #[command(flatten)]
        selection: Selection,

        /// Replace the launcher program (e.g. a wrapper script)
        #[arg(long)]
        program: Option<String>,

        /// Print the command instead of running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the resolved job and its argument list
    Show {
        #[command(flatten)]
        selection: Selection,
    },

    /// List jobs in a launch file
    List {
        /// Path to the launch file
        #[arg(short, long, default_value = "launch.toml")]
        config: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Which job to resolve and how to adjust it.
#[derive(Args)]
struct Selection {
    /// Path to the launch file
    #[arg(short, long, default_value = "launch.toml")]
    config: String,

    /// Job name (may be omitted when the file has a single job)
    #[arg(short, long)]
    job: Option<String>,

    /// Override any field, e.g. `--set epochs=1` or `--set launcher.stdio=tee`
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    #[command(flatten)]
    overrides: JobArgs,
}

impl Selection {
    fn resolve(&self) -> Result<(LaunchFile, JobConfig), Box<dyn std::error::Error>> {
        let mut file = LaunchFile::load(&self.config)?;

        let (launcher_sets, job_sets): (Vec<String>, Vec<String>) = self
            .set
            .iter()
            .cloned()
            .partition(|s| s.trim_start().starts_with("launcher."));
        file.apply_launcher(&launcher_sets)?;

        let mut assignments = job_sets;
        assignments.extend(self.overrides.to_assignments());
        let job = file.job(self.job.as_deref(), &assignments)?;
        Ok((file, job))
    }
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run {
            selection,
            program,
            dry_run,
        } => {
            let (file, job) = selection.resolve()?;
            let mut invocation = Invocation::new(&file.launcher, &job);
            if let Some(program) = program {
                invocation = invocation.with_program(program);
            }

            if dry_run {
                println!("{invocation}");
                return Ok(ExitCode::SUCCESS);
            }

            let outcome = Launcher.launch(&invocation).await?;
            return Ok(exit_code(outcome.exit_code()));
        }

        Commands::Show { selection } => {
            let (file, job) = selection.resolve()?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            println!();
            println!(
                "Global batch: {} ({} process(es) x {} x accum {})",
                job.global_batch_size(),
                job.world_size(),
                job.batch_size,
                job.accum_freq
            );
            println!(
                "Precision: {} (weights cast to {}, inputs cast to {})",
                job.precision,
                job.precision.cast_dtype().unwrap_or("-"),
                job.precision.input_dtype().unwrap_or("-")
            );
            println!();
            for token in Invocation::new(&file.launcher, &job).argv() {
                println!("{token}");
            }
        }

        Commands::List { config } => {
            let file = LaunchFile::load(&config)?;
            let names = file.job_names();
            if names.is_empty() {
                println!("No jobs in {config}.");
                return Ok(ExitCode::SUCCESS);
            }
            for name in &names {
                match file.job(Some(name), &[]) {
                    Ok(job) => {
                        let codebook = job
                            .override_model_config
                            .as_ref()
                            .is_some_and(sparo_config::ModelOverride::use_codebook);
                        println!(
                            "{name}: {}, {} epoch(s), batch {}{}",
                            job.model,
                            job.epochs,
                            job.batch_size,
                            if codebook { " [codebook]" } else { "" }
                        );
                    }
                    Err(e) => println!("{name}: INVALID ({e})"),
                }
            }
        }

        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "sparo-launch", &mut std::io::stdout());
        }
    }

    Ok(ExitCode::SUCCESS)
}
