//! CardForge CLI
//!
//! Commands: build, inspect, sample, plan
//! Outputs JSON to stdout, logs to stderr
//! Returns non-zero when a run does not finish with status ok

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cardforge_core::{
    config::{DEFAULT_OUTPUT_DIR, DEFAULT_STACKS, DEFAULT_WORKERS},
    preview_plan,
    source::{parse_set_counts, sample_labels},
    CacheSetting, CardError, CardPipeline, LayoutMode, RunConfig, SlotTemplate,
};

#[derive(Parser)]
#[command(name = "cardforge-cli")]
#[command(about = "CardForge CLI - Card Sheet Compiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true, env = "CARDFORGE_VERBOSE")]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill a template with every image set under a directory
    Build(BuildArgs),

    /// Print the slot structure of a template
    Inspect {
        template: PathBuf,
    },

    /// Stamp "Card 01", "Card 02", ... into every slot and save a copy
    Sample {
        template: PathBuf,

        /// Where to write the stamped copy (default: <template>_sample.svg)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Image href to put into every slot
        #[arg(long)]
        image: Option<String>,
    },

    /// Lay out synthetic sets and print the page plans
    Plan {
        template: PathBuf,

        /// Set sizes, e.g. A=3,B=5
        #[arg(long)]
        sets: String,

        #[arg(long, value_enum, default_value_t = LayoutMode::Sequential)]
        layout: LayoutMode,

        #[arg(long, default_value_t = DEFAULT_STACKS)]
        stacks: usize,

        #[arg(long, default_value_t = 1)]
        copies: usize,
    },
}

#[derive(Args)]
struct BuildArgs {
    /// Directory whose sub-directories are image sets
    root: PathBuf,

    /// SVG template with card slots
    template: PathBuf,

    #[arg(short, long, env = "CARDFORGE_OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Image cache log (default: <output-dir>/image-cache.log.gz)
    #[arg(long, env = "CARDFORGE_CACHE", conflicts_with = "no_cache")]
    cache: Option<PathBuf>,

    #[arg(long, env = "CARDFORGE_NO_CACHE")]
    no_cache: bool,

    /// Copies of every card
    #[arg(long, env = "CARDFORGE_COPIES", default_value_t = 1)]
    copies: usize,

    #[arg(long, value_enum, env = "CARDFORGE_LAYOUT", default_value_t = LayoutMode::Sequential)]
    layout: LayoutMode,

    /// Stacks for the parity and cells layouts
    #[arg(long, env = "CARDFORGE_STACKS", default_value_t = DEFAULT_STACKS)]
    stacks: usize,

    /// Image processing threads
    #[arg(long, env = "CARDFORGE_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Also write the report to <output-dir>/run.json
    #[arg(long, env = "CARDFORGE_WRITE_REPORT")]
    write_report: bool,
}

impl BuildArgs {
    fn into_config(self) -> RunConfig {
        let cache = if self.no_cache {
            CacheSetting::Disabled
        } else {
            self.cache.map(CacheSetting::Path).unwrap_or(CacheSetting::Default)
        };
        RunConfig {
            root: self.root,
            template: self.template,
            output_dir: self.output_dir,
            cache,
            copies: self.copies,
            layout: self.layout,
            stacks: self.stacks,
            workers: self.workers,
            write_report: self.write_report,
        }
    }
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "cardforge_core=debug,cardforge_cli=debug"
    } else {
        "cardforge_core=info,cardforge_cli=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Could not serialize output: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_error(e: &CardError) -> ExitCode {
    let output = serde_json::json!({
        "status": "error",
        "error": e.to_string(),
        "error_kind": e.kind(),
    });
    println!("{}", output);
    ExitCode::from(2)
}

fn sample_path(template: &Path) -> PathBuf {
    let stem = template
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "template".into());
    template.with_file_name(format!("{}_sample.svg", stem))
}

fn run_sample(template: &Path, output: Option<PathBuf>, image: Option<String>) -> Result<serde_json::Value, CardError> {
    let mut loaded = SlotTemplate::load(template)?;
    let labels = sample_labels(loaded.slot_count());
    let mut errors = Vec::new();
    for (position, label) in labels.iter().enumerate() {
        if let Err(e) = loaded.modify_group_labels(position, label) {
            errors.push(e.to_string());
        }
        if let Some(href) = &image {
            if let Err(e) = loaded.modify_group_images(position, href) {
                errors.push(e.to_string());
            }
        }
    }
    let output = output.unwrap_or_else(|| sample_path(template));
    loaded.save(&output)?;
    Ok(serde_json::json!({
        "output": output,
        "slots": loaded.slot_count(),
        "statistics": loaded.statistics(),
        "errors": errors,
    }))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Build(args) => {
            let config = args.into_config();
            let report = CardPipeline::default().run(&config);
            let code = print_json(&report);
            if report.is_ok() {
                code
            } else {
                ExitCode::from(2)
            }
        }

        Commands::Inspect { template } => match SlotTemplate::load(&template) {
            Ok(loaded) => print_json(&loaded.structure()),
            Err(e) => print_error(&e),
        },

        Commands::Sample { template, output, image } => match run_sample(&template, output, image) {
            Ok(summary) => print_json(&summary),
            Err(e) => print_error(&e),
        },

        Commands::Plan { template, sets, layout, stacks, copies } => {
            let preview = parse_set_counts(&sets)
                .and_then(|counts| preview_plan(&template, &counts, layout, stacks, copies));
            match preview {
                Ok(preview) => print_json(&preview),
                Err(e) => print_error(&e),
            }
        }
    }
}
