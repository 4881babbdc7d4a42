use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use jarhook::{Config, PatchOutcome, PatchSpec};

#[derive(Parser)]
#[command(name = "jarhook")]
#[command(about = "Inject a static hook call at the entry of one method inside a JAR")]
#[command(version)]
struct Cli {
    /// Source JAR
    #[arg(value_name = "SOURCE")]
    source: PathBuf,

    /// Destination JAR (parent directories are created)
    #[arg(value_name = "DESTINATION")]
    destination: PathBuf,

    /// TOML patch spec; the built-in target is used when omitted
    #[arg(short, long, value_name = "FILE")]
    spec: Option<PathBuf>,

    /// Directory holding the compiled hook classes
    #[arg(long, value_name = "DIR")]
    hook_classes: Option<PathBuf>,

    /// Do not append the hook classes to the output
    #[arg(long)]
    no_extra: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let spec = match &cli.spec {
        Some(path) => PatchSpec::from_toml_file(path)
            .with_context(|| format!("loading patch spec {}", path.display()))?,
        None => PatchSpec::default(),
    };

    let mut config = Config::default().with_extra_entries(!cli.no_extra);
    if let Some(dir) = &cli.hook_classes {
        config = config.with_hook_classes_dir(dir);
    }

    let report = jarhook::run(&cli.source, &cli.destination, &spec, &config).with_context(|| {
        format!("transforming {} into {}", cli.source.display(), cli.destination.display())
    })?;

    match &report.outcome {
        Some(PatchOutcome::Patched { method, inserted_bytes, max_stack }) => println!(
            "Patched {}.{} (+{} bytes, max_stack {})",
            spec.target_class_name, method, inserted_bytes, max_stack
        ),
        Some(PatchOutcome::AlreadyPatched) => println!("{} already carries the hook", spec.target_class_name),
        Some(PatchOutcome::MethodNotFound) => println!(
            "{} has no method {}{}, left unchanged",
            spec.target_class_name, spec.target_method.name, spec.target_method.descriptor
        ),
        None => println!("{} not found in {}", spec.target_class_path, cli.source.display()),
    }
    println!(
        "Wrote {} ({} entries copied, {} appended, {} already present)",
        cli.destination.display(),
        report.entries_copied,
        report.extra_entries,
        report.extra_entries_present
    );

    Ok(())
}
