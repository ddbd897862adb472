//! Quarry CLI - validate, compile and run reports
//!
//! Usage:
//!   quarry validate <query.sql> [--dialect <dialect>]
//!   quarry compile <config.json> [--params <json>] [--dialect <dialect>]
//!   quarry run <report> [--params <json>] --user <id> [--unit <id>] [--page <n>]
//!   quarry reports
//!
//! Examples:
//!   quarry validate reports/inactive.sql
//!   quarry compile reports/enrolments.json --params '{"status": 0}' --dialect tsql
//!   quarry run inactive_users --params '{"cutoff": 1700000000}' --user 2

use clap::{Parser, Subcommand, ValueEnum};
use quarry::compile::QueryCompiler;
use quarry::config::Settings;
use quarry::report::{Params, QueryConfig, ReportDefinition, ReportId};
use quarry::schema::SchemaWhitelist;
use quarry::sql::Dialect;
use quarry::telemetry::init_tracing;
use quarry::tenant::Caller;
use quarry::validation::SqlValidator;
use quarry::{ReportError, ReportExecutor};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Quarry - safe, tenant-scoped reporting over a learning-platform database")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to QUARRY_CONFIG, ./quarry.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a raw SQL report against the safety rules and whitelist
    Validate {
        /// Path to the .sql file
        file: PathBuf,

        /// Dialect to lex with (defaults to the configured one)
        #[arg(short, long)]
        dialect: Option<DialectArg>,
    },

    /// Compile a declarative query config to SQL
    Compile {
        /// Path to the JSON query config
        file: PathBuf,

        /// Parameter values as a JSON object
        #[arg(short, long, default_value = "{}")]
        params: String,

        /// SQL dialect to generate (defaults to the configured one)
        #[arg(short, long)]
        dialect: Option<DialectArg>,
    },

    /// Execute a report and print one page of results as JSON
    Run {
        /// Built-in report name or custom id
        report: Option<String>,

        /// Run a report definition from a JSON file instead
        #[arg(long, conflicts_with = "report")]
        definition: Option<PathBuf>,

        /// Parameter values as a JSON object
        #[arg(short, long, default_value = "{}")]
        params: String,

        /// Id of the user the report runs for
        #[arg(short, long)]
        user: u64,

        /// Restrict to one organisational unit
        #[arg(long)]
        unit: Option<u64>,

        /// 0-based page number
        #[arg(long, default_value_t = 0)]
        page: u64,

        /// Rows per page (0 uses the configured default)
        #[arg(long, default_value_t = 0)]
        page_size: u64,
    },

    /// List the built-in reports
    Reports,
}

#[derive(Clone, Copy, ValueEnum)]
enum DialectArg {
    Postgres,
    Mysql,
    Tsql,
    Sqlite,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Postgres => Dialect::Postgres,
            DialectArg::Mysql => Dialect::MySql,
            DialectArg::Tsql => Dialect::TSql,
            DialectArg::Sqlite => Dialect::Sqlite,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing("info");

    let settings = match load_settings(cli.config.as_deref()) {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("{}", msg);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Validate { file, dialect } => cmd_validate(&settings, file, dialect),
        Commands::Compile {
            file,
            params,
            dialect,
        } => cmd_compile(&settings, file, &params, dialect),
        Commands::Run {
            report,
            definition,
            params,
            user,
            unit,
            page,
            page_size,
        } => {
            let caller = match unit {
                Some(unit) => Caller::new(user).with_unit(unit),
                None => Caller::new(user),
            };
            cmd_run(settings, report, definition, &params, caller, page, page_size).await
        }
        Commands::Reports => cmd_reports(),
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings, String> {
    let result = match path {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    };
    result.map_err(|e| format!("Configuration error: {}", e))
}

fn load_whitelist(settings: &Settings) -> Result<SchemaWhitelist, String> {
    let result = match &settings.schema.whitelist_path {
        Some(path) => quarry::config::expand_env_vars(path)
            .map_err(|e| e.to_string())
            .and_then(|p| SchemaWhitelist::load(Path::new(&p)).map_err(|e| e.to_string())),
        None => SchemaWhitelist::builtin().map_err(|e| e.to_string()),
    };
    result.map_err(|e| format!("Whitelist error: {}", e))
}

fn read_file(file: &Path) -> Result<String, String> {
    fs::read_to_string(file).map_err(|e| format!("Error reading file '{}': {}", file.display(), e))
}

fn parse_params(raw: &str) -> Result<Params, String> {
    serde_json::from_str(raw).map_err(|e| format!("Invalid --params JSON: {}", e))
}

fn print_error(err: &ReportError) {
    match serde_json::to_string_pretty(&err.to_report()) {
        Ok(json) => println!("{}", json),
        Err(_) => eprintln!("{}", err),
    }
}

fn cmd_validate(settings: &Settings, file: PathBuf, dialect: Option<DialectArg>) -> ExitCode {
    let (sql, whitelist) = match read_file(&file).and_then(|s| Ok((s, load_whitelist(settings)?))) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{}", msg);
            return ExitCode::FAILURE;
        }
    };

    let dialect = dialect.map_or(settings.database.dialect, Dialect::from);
    let validator = SqlValidator::new(&whitelist, dialect)
        .with_table_prefix(&settings.database.table_prefix);

    match validator.validate(&sql) {
        Ok(statement) => {
            println!("OK: {} is a valid report query", file.display());
            let placeholders = statement.placeholders();
            if !placeholders.is_empty() {
                let names: Vec<_> = placeholders.into_iter().collect();
                println!("Parameters: {}", names.join(", "));
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            print_error(&ReportError::from(e));
            ExitCode::FAILURE
        }
    }
}

fn cmd_compile(
    settings: &Settings,
    file: PathBuf,
    params: &str,
    dialect: Option<DialectArg>,
) -> ExitCode {
    let prepared = read_file(&file)
        .and_then(|s| {
            serde_json::from_str::<QueryConfig>(&s)
                .map_err(|e| format!("Invalid query config '{}': {}", file.display(), e))
        })
        .and_then(|config| Ok((config, parse_params(params)?, load_whitelist(settings)?)));
    let (config, params, whitelist) = match prepared {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{}", msg);
            return ExitCode::FAILURE;
        }
    };

    let dialect = dialect.map_or(settings.database.dialect, Dialect::from);
    let compiler = QueryCompiler::new(&whitelist, dialect)
        .with_table_prefix(&settings.database.table_prefix);

    match compiler.compile(&config, &params) {
        Ok(compiled) => {
            for warning in &compiled.warnings {
                eprintln!("warning: {}", warning);
            }
            println!("{}", compiled.sql());
            if !compiled.params.is_empty() {
                println!();
                for (name, value) in &compiled.params {
                    println!("-- {} = {}", name, value);
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            print_error(&ReportError::from(e));
            ExitCode::FAILURE
        }
    }
}

async fn cmd_run(
    settings: Settings,
    report: Option<String>,
    definition: Option<PathBuf>,
    params: &str,
    caller: Caller,
    page: u64,
    page_size: u64,
) -> ExitCode {
    let params = match parse_params(params) {
        Ok(p) => p,
        Err(msg) => {
            eprintln!("{}", msg);
            return ExitCode::FAILURE;
        }
    };

    let executor = match ReportExecutor::from_settings(settings) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Setup error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match (report, definition) {
        (_, Some(path)) => {
            let loaded = read_file(&path).and_then(|s| {
                serde_json::from_str::<ReportDefinition>(&s)
                    .map_err(|e| format!("Invalid report definition '{}': {}", path.display(), e))
            });
            match loaded {
                Ok(def) => executor.execute(&def, &params, caller, page, page_size).await,
                Err(msg) => {
                    eprintln!("{}", msg);
                    return ExitCode::FAILURE;
                }
            }
        }
        (Some(name), None) => match name.parse::<ReportId>() {
            Ok(id) => {
                executor
                    .execute_report(&id, &params, caller, page, page_size)
                    .await
            }
            Err(e) => Err(ReportError::from(e)),
        },
        (None, None) => {
            eprintln!("Specify a report name or --definition <file>");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(envelope) => match serde_json::to_string_pretty(&envelope) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to serialize results: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_reports() -> ExitCode {
    println!("Reports:");
    for kind in quarry::ReportKind::ALL {
        println!("  - {} ({})", kind.name(), kind.label());
    }
    ExitCode::SUCCESS
}
