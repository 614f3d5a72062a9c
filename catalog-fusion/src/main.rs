//! catalog-fusion - resolve catalog records from multi-source facts
//!
//! Subcommands:
//! - `check`: compile a rule file and print its strata and fingerprint
//! - `resolve`: load JSON-lines facts and emit one resolved record per key
//! - `explain`: show why each alternative of one attribute won, lost or failed
//! - `init-config`: write the default configuration file

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use catalog_common::config::{init_config, load_config, user_config_path, TomlConfig};
use catalog_fusion::facts::loader::load_json_lines;
use catalog_fusion::{
    compile, ConfidencePolicy, ConflictReporter, FactStore, ResolvedRecord, Resolver, RuleSet,
    WarehouseRow, BUILTIN_RULES,
};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Command-line arguments for catalog-fusion
#[derive(Parser, Debug)]
#[command(name = "catalog-fusion")]
#[command(about = "Rule-driven fusion of multi-source library catalog records")]
#[command(version)]
struct Cli {
    /// Config file (overrides CATALOG_FUSION_CONFIG and the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Rule file (defaults to rules_path from config, then the builtin rules)
    #[arg(short, long, global = true, env = "CATALOG_FUSION_RULES")]
    rules: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile the rules and report strata
    Check,

    /// Resolve records from JSON-lines facts
    Resolve {
        /// Facts file, one {"relation", "key", "values"} object per line
        #[arg(short, long)]
        facts: PathBuf,

        /// Resolve only this key
        #[arg(short, long)]
        key: Option<String>,

        /// Concurrent workers (defaults to batch.workers from config)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Records)]
        format: OutputFormat,
    },

    /// Explain the resolution of one attribute for one key
    Explain {
        #[arg(short, long)]
        facts: PathBuf,

        #[arg(short, long)]
        key: String,

        /// Derived relation name, e.g. title
        #[arg(short, long)]
        attribute: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Write a default config file (to --config, or the user config dir)
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
enum OutputFormat {
    /// ResolvedRecord with full provenance
    Records,
    /// Flattened warehouse rows
    Rows,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with_writer(io::stderr)
        .init();

    info!("Starting catalog-fusion v{}", env!("CARGO_PKG_VERSION"));

    if let Command::InitConfig { force } = cli.command {
        let Some(path) = cli.config.or_else(user_config_path) else {
            bail!("No config directory on this platform; pass --config");
        };
        if !init_config(&path, force)
            .with_context(|| format!("Failed to write {}", path.display()))?
        {
            warn!("{} already exists; use --force to overwrite", path.display());
        }
        return Ok(());
    }

    let rules = load_rules(cli.rules.as_deref(), &config)?;

    match cli.command {
        Command::Check => check(&rules),
        Command::Resolve {
            facts,
            key,
            workers,
            output,
            format,
        } => {
            let workers = workers.unwrap_or(config.batch.workers);
            let resolver = build_resolver(rules, &facts, &config)?;
            resolve(resolver, key, workers, output.as_deref(), format).await
        }
        Command::Explain {
            facts,
            key,
            attribute,
            json,
        } => {
            let resolver = build_resolver(rules, &facts, &config)?;
            let Some(explanation) = resolver.explain(&key, &attribute) else {
                bail!("Unknown attribute: {}", attribute);
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&explanation)?);
            } else {
                print!("{}", explanation);
            }
            Ok(())
        }
        Command::InitConfig { .. } => Ok(()),
    }
}

fn load_rules(cli_rules: Option<&Path>, config: &TomlConfig) -> Result<RuleSet> {
    let path = cli_rules.map(Path::to_path_buf).or_else(|| config.rules_path.clone());

    let rules = match &path {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read rules from {}", path.display()))?;
            compile(&source).with_context(|| format!("Failed to compile {}", path.display()))?
        }
        None => compile(BUILTIN_RULES).context("Failed to compile builtin rules")?,
    };

    info!(
        rules = %path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "builtin".to_string()),
        fingerprint = %rules.fingerprint(),
        "Rule set loaded"
    );
    Ok(rules)
}

fn build_resolver(rules: RuleSet, facts_path: &Path, config: &TomlConfig) -> Result<Resolver> {
    let mut facts = FactStore::for_rules(&rules);
    let file = File::open(facts_path)
        .with_context(|| format!("Failed to open facts file {}", facts_path.display()))?;
    let report = load_json_lines(BufReader::new(file), &mut facts)
        .with_context(|| format!("Failed to read facts from {}", facts_path.display()))?;

    if report.is_clean() {
        info!(accepted = report.accepted, "Facts loaded");
    } else {
        warn!(
            accepted = report.accepted,
            rejected = report.rejected.len(),
            "Facts loaded with rejections"
        );
    }

    let reporter = ConflictReporter::new(ConfidencePolicy::from(&config.confidence));
    Ok(Resolver::new(Arc::new(rules), Arc::new(facts)).with_reporter(reporter))
}

fn check(rules: &RuleSet) -> Result<()> {
    println!("fingerprint: {}", rules.fingerprint());
    println!("base relations: {}", rules.schemas().count());
    println!("rules: {}", rules.rule_count());
    for stratum in rules.strata() {
        let names: Vec<String> = stratum
            .relations
            .iter()
            .map(|d| {
                let mut name = d.name.clone();
                if d.merge {
                    name.push_str(" (merge)");
                }
                if d.internal {
                    name.push_str(" (internal)");
                }
                name
            })
            .collect();
        println!("stratum {}: {}", stratum.index, names.join(", "));
    }
    Ok(())
}

async fn resolve(
    resolver: Resolver,
    key: Option<String>,
    workers: usize,
    output: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let records = match key {
        Some(key) => vec![resolver.resolve(&key)],
        None => {
            let cancel = CancellationToken::new();
            let watcher = tokio::spawn(cancel_on_signal(cancel.clone()));

            let outcome = resolver.resolve_batch(cancel, workers).await?;
            watcher.abort();

            if outcome.cancelled {
                warn!(
                    run_id = %outcome.run_id,
                    unprocessed = outcome.unprocessed.len(),
                    "Batch cancelled, writing completed records only"
                );
            }
            outcome.records
        }
    };

    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    write_records(&mut writer, &records, format)?;
    writer.flush().context("Failed to flush output")?;
    Ok(())
}

fn write_records(writer: &mut dyn Write, records: &[ResolvedRecord], format: OutputFormat) -> Result<()> {
    for record in records {
        match format {
            OutputFormat::Records => serde_json::to_writer(&mut *writer, record)?,
            OutputFormat::Rows => serde_json::to_writer(&mut *writer, &WarehouseRow::from(record))?,
        }
        writeln!(writer)?;
    }
    Ok(())
}

/// Cancel the batch on Ctrl+C
async fn cancel_on_signal(cancel: CancellationToken) {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, finishing in-flight keys");
            cancel.cancel();
        }
        Err(e) => warn!("Failed to install Ctrl+C handler: {}", e),
    }
}
