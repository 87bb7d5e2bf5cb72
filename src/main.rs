extern crate hh_demand;

use anyhow::{anyhow, Context};
use clap::Parser;
use hh_demand::config::RunConfig;
use hh_demand::input::InputData;
use hh_demand::output::FileStore;
use hh_demand::run_disaggregation;
use std::ffi::OsStr;
use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct HhDemandArgs {
    #[arg(help = "Path to run configuration in .json format")]
    config_file: PathBuf,
    #[arg(
        long,
        short,
        help = "Directory to write artifacts to, next to the configuration by default"
    )]
    output_dir: Option<PathBuf>,
    #[arg(long, short, help = "Seed for profile sampling, overriding the configuration")]
    seed: Option<u64>,
    #[clap(long, default_value_t = Level::INFO, help = "Maximum level of log events")]
    log_level: Level,
    #[clap(long, default_value_t = false, help = "Whether to log out spans")]
    log_spans: bool,
}

fn main() -> anyhow::Result<()> {
    let args = HhDemandArgs::parse();

    // set up basic tracing
    let tracing_subscriber = {
        let mut builder = tracing_subscriber::fmt::fmt().with_max_level(args.log_level);

        if args.log_spans {
            builder = builder.with_span_events(FmtSpan::CLOSE);
        }

        builder.finish()
    };
    tracing::subscriber::set_global_default(tracing_subscriber)
        .context("setting tracing subscriber failed")?;

    let mut config = RunConfig::from_json(BufReader::new(
        File::open(&args.config_file)
            .with_context(|| format!("Could not open {}", args.config_file.display()))?,
    ))?;
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    let input_paths = config
        .inputs
        .clone()
        .ok_or_else(|| anyhow!("The run configuration names no input files"))?;
    let input_paths = input_paths.relative_to(args.config_file.parent().unwrap_or(Path::new("")));

    let output_path = match args.output_dir {
        Some(output_dir) => output_dir,
        None => {
            let stem = args
                .config_file
                .file_stem()
                .and_then(OsStr::to_str)
                .unwrap_or("run");
            args.config_file
                .with_file_name(format!("{stem}__results"))
        }
    };
    fs::create_dir_all(&output_path)
        .with_context(|| format!("Could not create {}", output_path.display()))?;
    let file_store = FileStore::new(output_path.clone(), "{}.{}".to_string());

    let inputs = InputData::from_paths(&input_paths)?;
    let summary = run_disaggregation(&config, &inputs, &file_store)?;

    for e in &summary.skipped {
        eprintln!("{e}");
    }
    info!(
        seed = summary.seed,
        output = %output_path.display(),
        "Wrote household electricity artifacts"
    );

    Ok(())
}
