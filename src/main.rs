// SPDX-License-Identifier: PMPL-1.0-or-later

//! trap-triage: reproduce an OS crash under QEMU + GDB and ask for a diagnosis

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use trap_triage::analysis::{AnalysisClient, Analyzer};
use trap_triage::config::{RuntimeConfig, TriageConfig};
use trap_triage::report::{self, ReportFormatter};
use trap_triage::session::Session;
use trap_triage::sink::{load_evidence, FileSink, ResultSink};
use trap_triage::supervisor::Supervisor;
use trap_triage::types::Mode;
use trap_triage::{diagnostics, image, TriageError};

const EXIT_FATAL: i32 = 1;
const EXIT_CONFIG: i32 = 2;

#[derive(Parser)]
#[command(name = "trap-triage")]
#[command(version)]
#[command(about = "Automated reproduction and triage of OS crashes in QEMU + GDB")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file (.json, .yaml or .yml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the guest, reproduce the crash, capture evidence and analyse it
    Run {
        /// Crash class to reproduce
        #[arg(short, long, value_enum)]
        mode: ModeArg,

        /// Do not run the image build command first
        #[arg(long)]
        skip_build: bool,

        /// Where to write the suggested patch
        #[arg(long)]
        patch_out: Option<PathBuf>,

        /// Save evidence and analysis together (.json or .yaml)
        #[arg(long)]
        report_out: Option<PathBuf>,

        /// Save the evidence record as JSON
        #[arg(long)]
        evidence_out: Option<PathBuf>,
    },

    /// Submit a saved evidence record for analysis
    Analyze {
        /// Evidence file written by `run --evidence-out`
        #[arg(value_name = "EVIDENCE")]
        evidence: PathBuf,

        /// Where to write the suggested patch
        #[arg(long)]
        patch_out: Option<PathBuf>,
    },

    /// Check tools, images, credential and control port
    Doctor,

    /// Print the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ModeArg {
    Kernel,
    User,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Kernel => Mode::Kernel,
            ModeArg::User => Mode::User,
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_str().to_ascii_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", "error:".red().bold(), err);
            let is_config = err
                .downcast_ref::<TriageError>()
                .map(TriageError::is_configuration)
                .unwrap_or(false);
            if is_config {
                EXIT_CONFIG
            } else {
                EXIT_FATAL
            }
        }
    };
    std::process::exit(code);
}

fn dispatch(cli: Cli) -> Result<i32> {
    let config = TriageConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            mode,
            skip_build,
            patch_out,
            report_out,
            evidence_out,
        } => {
            let runtime = RuntimeConfig::from_env(config)?;
            let mode: Mode = mode.into();

            if skip_build {
                println!("Skipping image build");
            } else {
                image::build(&runtime.config.build)?;
            }

            let mut sink = FileSink::new(
                patch_out.unwrap_or_else(|| runtime.config.output.patch_path.clone()),
            )
            .with_report(report_out)
            .with_evidence(evidence_out);
            let analyzer = AnalysisClient::new(&runtime)?;
            let mut supervisor = Supervisor::new(&runtime.config);

            println!("Reproducing {} crash", mode);
            let mut session = Session::new(&runtime, mode);
            match session.run(&mut supervisor, &analyzer, &mut sink) {
                Ok(outcome) => {
                    report::print_outcome(&outcome);
                    Ok(0)
                }
                Err(failure) => {
                    eprintln!("\n{} {}", "Session failed:".red().bold(), failure.error);
                    report::print_postmortem(&failure.postmortem);
                    Ok(if failure.error.is_configuration() {
                        EXIT_CONFIG
                    } else {
                        EXIT_FATAL
                    })
                }
            }
        }

        Commands::Analyze {
            evidence,
            patch_out,
        } => {
            let runtime = RuntimeConfig::from_env(config)?;
            let record = load_evidence(&evidence)?;
            println!(
                "Analysing {} evidence from {}",
                record.mode,
                evidence.display()
            );

            let analyzer = AnalysisClient::new(&runtime)?;
            let analysis = analyzer.analyze(&record);
            let formatter = ReportFormatter::without_evidence();
            formatter.print_analysis(&analysis);

            let mut sink = FileSink::new(
                patch_out.unwrap_or_else(|| runtime.config.output.patch_path.clone()),
            );
            for path in sink.persist(&record, &analysis)? {
                println!("\n{} {}", "Saved:".green(), path.display());
            }
            Ok(0)
        }

        Commands::Doctor => {
            diagnostics::run_self_diagnostics(&config)?;
            Ok(0)
        }

        Commands::Config => {
            let yaml = serde_yaml::to_string(&config).context("serialising configuration")?;
            print!("{}", yaml);
            Ok(0)
        }
    }
}
