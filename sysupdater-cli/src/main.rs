//! sysupdater CLI
//!
//! Runs region manifests against a database: precheck status, apply, and a
//! few dialect utilities (constraint naming, version normalisation, SQL
//! fragments).

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use sysupdater::dialect::Dialect;
use sysupdater::postgres::PostgresSchema;
use sysupdater::update::{SystemUpdater, UpdateContext, Version};
use sysupdater::UpdaterConfig;
use sysupdater_cli::manifest::Manifest;
use sysupdater_cli::output::print_report;

#[derive(Parser)]
#[command(name = "sysupdater")]
#[command(about = "Region-scoped schema updates")]
#[command(version = "0.1.0")]
struct Cli {
    /// Database connection URL
    #[arg(long)]
    database_url: Option<String>,

    /// Database dialect (overrides configuration)
    #[arg(long)]
    dialect: Option<Dialect>,

    /// Region manifest
    #[arg(long, default_value = "sysupdater.toml")]
    manifest: PathBuf,

    /// Configuration file
    #[arg(long, default_value = "config/config.toml")]
    config: String,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Precheck every entry and show what would run
    Status,

    /// Apply every entry whose effect is missing
    Up {
        /// Per-entry timeout in seconds (0 waits indefinitely)
        #[arg(long)]
        timeout_seconds: Option<u64>,

        /// Run independent regions in parallel when the connection allows it
        #[arg(long)]
        parallel: bool,
    },

    /// Compute a unique constraint name
    ConstraintName {
        table: String,
        #[arg(required = true)]
        columns: Vec<String>,
        /// Constraint names already present on the table
        #[arg(long, value_delimiter = ',')]
        existing: Vec<String>,
    },

    /// Normalise and sort version strings
    Version {
        #[arg(required = true)]
        versions: Vec<String>,
    },

    /// Show dialect-specific SQL fragments
    Dialect {
        #[arg(long, default_value = "started_at")]
        from: String,
        #[arg(long, default_value = "finished_at")]
        to: String,
    },
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    if cli.quiet {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error")).init();
    } else if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match run(cli) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = UpdaterConfig::load_from(&cli.config).context("loading configuration")?;
    if let Some(dialect) = cli.dialect {
        config.dialect = dialect;
    }
    if let Some(url) = cli.database_url.clone() {
        config.database_url = Some(url);
    }

    match &cli.command {
        Commands::Status => {
            let report = updater(&cli, &config)?.precheck_all(&context(&config)?);
            print_report(&report, cli.json)?;
            Ok(if report.should_abort_startup() { 1 } else { 0 })
        }
        Commands::Up {
            timeout_seconds,
            parallel,
        } => {
            if let Some(seconds) = timeout_seconds {
                config.entry_timeout_seconds = *seconds;
            }
            config.parallel_regions |= *parallel;
            let report = updater(&cli, &config)?.run_all(&context(&config)?);
            print_report(&report, cli.json)?;
            if report.should_abort_startup() {
                eprintln!("❌ Schema is not up to date; startup should not proceed");
                Ok(1)
            } else {
                if !cli.quiet && !cli.json {
                    println!("✅ Success");
                }
                Ok(0)
            }
        }
        Commands::ConstraintName {
            table,
            columns,
            existing,
        } => {
            let name = config
                .database_support()
                .create_unique_constraint_name(table, columns, existing)?;
            println!("{name}");
            Ok(0)
        }
        Commands::Version { versions } => {
            let mut parsed = versions
                .iter()
                .map(|v| Version::parse(v))
                .collect::<Result<Vec<_>, _>>()?;
            parsed.sort();
            for version in parsed {
                println!("{version}");
            }
            Ok(0)
        }
        Commands::Dialect { from, to } => {
            let support = config.database_support();
            println!("Dialect: {}", support.dialect());
            match support.interval_in_seconds(from, to) {
                Some(sql) => println!("Interval in seconds: {sql}"),
                None => println!("Interval in seconds: (computed in application)"),
            }
            println!(
                "Shutdown statement: {}",
                support.shutdown_statement().unwrap_or("(none)")
            );
            Ok(0)
        }
    }
}

fn updater(cli: &Cli, config: &UpdaterConfig) -> anyhow::Result<SystemUpdater> {
    let manifest = Manifest::load(&cli.manifest)?;
    let mut registry = config.registry();
    let outcomes = manifest.register(&mut registry)?;
    let rejected: usize = outcomes.iter().map(|o| o.rejected.len()).sum();
    if rejected > 0 {
        bail!("{rejected} manifest update(s) rejected; see log for details");
    }
    Ok(SystemUpdater::with_options(registry, config.run_options()))
}

fn context(config: &UpdaterConfig) -> anyhow::Result<UpdateContext> {
    if config.dialect != Dialect::Postgres {
        bail!(
            "dialect '{}' has no bundled connection support; only postgres can be updated from the CLI",
            config.dialect
        );
    }
    let url = config
        .database_url
        .clone()
        .or_else(|| std::env::var("SYSUPDATER_DATABASE_URL").ok())
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .context("Database URL not provided. Use --database-url or set SYSUPDATER_DATABASE_URL or DATABASE_URL")?;

    let schema = Arc::new(PostgresSchema::connect(&url)?);
    let support = Arc::new(config.database_support());
    Ok(UpdateContext::new(schema.clone(), schema, support))
}
