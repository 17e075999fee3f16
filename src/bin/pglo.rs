//! pglo: PostgreSQL large objects from the command line
//!
//! # Usage
//!
//! ```bash
//! # Store a file, printing the new oid
//! pglo import ./report.pdf
//!
//! # Fetch it back
//! pglo export 16385 ./copy.pdf
//!
//! # Render a decimal as a SQL literal (no database needed)
//! pglo quote 12.50
//! ```

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use pg_lobject::prelude::*;
use pg_lobject::Config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pglo")]
#[command(version)]
#[command(about = "Guarded PostgreSQL large objects", long_about = None)]
#[command(after_help = "EXAMPLES:
    pglo import ./photo.jpg
    pglo cat 16385 > photo.jpg
    pglo quote NaN")]
struct Cli {
    /// Database connection URL
    #[arg(long, env = "PGLO_DATABASE_URL")]
    database_url: Option<String>,

    /// Config file (defaults to ./pglo.toml, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a large object from a local file
    Import { file: PathBuf },
    /// Write a large object to a local file
    Export { oid: Oid, file: PathBuf },
    /// Print a large object to stdout
    Cat { oid: Oid },
    /// Delete a large object
    Unlink { oid: Oid },
    /// Render a decimal value as a SQL literal
    Quote { value: String },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    init_tracing(&config, cli.verbose);

    if let Commands::Quote { value } = &cli.command {
        println!("{}", PgDecimal::new(Numeric::new(value.as_str())).to_literal());
        return Ok(());
    }

    let url = cli
        .database_url
        .clone()
        .or_else(|| config.connection.url.clone())
        .context("No database URL. Use --database-url, PGLO_DATABASE_URL or connection.url")?;

    let backend = PostgresBackend::connect(&url).context("Failed to connect")?;
    let conn = Connection::from_config(backend, &config)?;

    let result = execute(&conn, &cli.command);
    match &result {
        Ok(()) => conn.commit()?,
        Err(_) => {
            if let Err(e) = conn.rollback() {
                tracing::warn!(error = %e, "rollback failed");
            }
        }
    }
    conn.close()?;
    result
}

fn execute(conn: &Connection<PostgresBackend>, command: &Commands) -> Result<()> {
    match command {
        Commands::Import { file } => {
            let lo = conn
                .import_lobject(file)
                .with_context(|| format!("Failed to import {}", file.display()))?;
            println!(
                "{} imported {} as oid {}",
                "✓".green(),
                file.display(),
                lo.oid().to_string().cyan()
            );
        }
        Commands::Export { oid, file } => {
            let lo = conn.open_lobject(*oid, LoMode::Read)?;
            lo.export(file)
                .with_context(|| format!("Failed to export oid {}", oid))?;
            println!(
                "{} exported oid {} to {}",
                "✓".green(),
                oid.to_string().cyan(),
                file.display()
            );
        }
        Commands::Cat { oid } => {
            let lo = conn.open_lobject(*oid, LoMode::Read)?;
            let data = lo.read(None)?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
        Commands::Unlink { oid } => {
            let lo = conn.open_lobject(*oid, LoMode::Read)?;
            lo.unlink()?;
            println!("{} unlinked oid {}", "✓".green(), oid.to_string().cyan());
        }
        Commands::Quote { .. } => unreachable!(), // Handled before connecting
    }
    Ok(())
}

fn init_tracing(config: &Config, verbose: bool) {
    let default = if verbose {
        "pg_lobject=debug"
    } else {
        config.log.filter.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
