//! cdsx CLI - compile CDS projects to JSON from a discovery graph.

mod compile;
mod probe;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cdsx")]
#[command(about = "Compile CDS projects to JSON from a discovery graph")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile every project of a discovery graph
    Compile {
        /// Path to the discovery graph (JSON)
        graph: PathBuf,

        /// Override the graph's source root
        #[arg(long)]
        source_root: Option<PathBuf>,

        /// Number of worker threads
        #[arg(short, long)]
        workers: Option<usize>,

        /// Keep diagnostics in memory and print them instead of reporting to CodeQL
        #[arg(long)]
        dry_run: bool,

        /// Record a probe of every command strategy in the run's debug info
        #[arg(long)]
        analyze_commands: bool,

        /// Write the run summary here instead of stdout
        #[arg(short, long)]
        summary: Option<PathBuf>,

        /// Exit with a failure status when the run is not fully successful
        #[arg(long)]
        strict: bool,
    },

    /// Show which compiler command would be used for a source root
    Probe {
        /// Directory the compiler runs from
        source_root: PathBuf,

        /// Cache directory to try first
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(core_err) = err.downcast_ref::<cdsx_core::Error>() {
            anyhow::anyhow!("{}", core_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Compile {
            graph,
            source_root,
            workers,
            dry_run,
            analyze_commands,
            summary,
            strict,
        } => {
            let options = compile::CompileOptions {
                graph,
                source_root,
                workers,
                dry_run,
                analyze_commands,
                summary,
            };
            let success = compile::execute(&options).map_err(format_error)?;
            if strict && !success {
                anyhow::bail!("compilation run finished with failures");
            }
        }

        Commands::Probe {
            source_root,
            cache_dir,
        } => {
            probe::execute(&source_root, cache_dir.as_deref()).map_err(format_error)?;
        }
    }

    Ok(())
}
