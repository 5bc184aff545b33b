use std::io::Write;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use keel::{Context, Database, DatabaseConfig, DriverKind, LoadedTable, Plan, RequestKind};
use keel_schema::{parse_table_spec, parse_type_spec};
use owo_colors::OwoColorize;
use tokio::io::AsyncBufReadExt;

mod config;

use config::{ConfigError, Loaded};

/// Declarative schema reconciliation for SQL and CQL databases.
#[derive(Parser, Debug)]
#[command(name = "keel", version)]
struct Cli {
    #[command(flatten)]
    conn: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Where to connect. Each flag overrides `.config/keel.yaml`.
#[derive(Args, Debug, Default)]
struct ConnectionArgs {
    /// Database driver (postgres, mysql, cockroachdb, sqlite, rqlite, timescaledb, cassandra)
    #[arg(long, global = true, env = "KEEL_DRIVER")]
    driver: Option<DriverKind>,

    /// Connection URI, for every driver except cassandra
    #[arg(long, global = true, env = "KEEL_URI")]
    uri: Option<String>,

    /// Cassandra contact point; repeat for several
    #[arg(long = "host", global = true, env = "KEEL_HOSTS", value_delimiter = ',')]
    hosts: Vec<String>,

    #[arg(long, global = true, env = "KEEL_USERNAME")]
    username: Option<String>,

    #[arg(long, global = true, env = "KEEL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[arg(long, global = true, env = "KEEL_KEYSPACE")]
    keyspace: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the statements that would bring the database in line with a spec
    Plan {
        /// Path to a table or type spec
        #[arg(long)]
        spec: Utf8PathBuf,

        /// What the spec file describes
        #[arg(long = "type", value_enum, default_value_t = SpecKind::Table)]
        spec_kind: SpecKind,

        /// Plan the spec's seed rows instead of its structure
        #[arg(long)]
        seed: bool,
    },
    /// Plan a spec, then apply it
    Apply {
        #[arg(long)]
        spec: Utf8PathBuf,

        #[arg(long = "type", value_enum, default_value_t = SpecKind::Table)]
        spec_kind: SpecKind,

        /// Also plan and apply seed rows
        #[arg(long)]
        seed: bool,

        /// Apply without asking for confirmation
        #[arg(long, short)]
        yes: bool,
    },
    /// Write CREATE statements for every spec in a directory to fixtures.sql
    Fixtures {
        #[arg(long)]
        input_dir: Option<Utf8PathBuf>,

        #[arg(long)]
        output_dir: Option<Utf8PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SpecKind {
    Table,
    Type,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Keel(#[from] keel::Error),

    #[error("no driver configured; pass --driver or set it in .config/keel.yaml")]
    NoDriver,

    #[error("failed to read {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read confirmation: {0}")]
    Prompt(std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("keel=info")),
        )
        .init();

    let cli = Cli::parse();
    let ctx = Context::new();
    let token = ctx.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping after the current statement");
            token.cancel();
        }
    });

    match run(cli, &ctx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            if let CliError::Keel(err) = &err
                && let Some((applied, total)) = err.partial_progress()
            {
                eprintln!(
                    "{} {applied} of {total} statements were applied before the failure",
                    "note:".yellow().bold()
                );
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, ctx: &Context) -> Result<(), CliError> {
    let loaded = config::load()?;
    if let Some(loaded) = &loaded {
        tracing::debug!(path = %loaded.path, "using config file");
    }
    let mut db_config = database_config(loaded.as_ref(), &cli.conn)?;
    if let Some(uri) = &db_config.uri {
        tracing::info!(driver = %db_config.driver, uri = %mask_password(uri), "using database");
    }

    match cli.command {
        Commands::Plan {
            spec,
            spec_kind,
            seed,
        } => {
            let db = Database::new(db_config)?;
            let planned = load(&db, ctx, &spec, spec_kind, seed).await?.plan(ctx).await?;
            print_plan(planned.name(), planned.plan());
            planned.discard(ctx);
        }
        Commands::Apply {
            spec,
            spec_kind,
            seed,
            yes,
        } => {
            db_config.deploy_seed_data |= seed;
            let db = Database::new(db_config)?;
            let planned = load(&db, ctx, &spec, spec_kind, false).await?.plan(ctx).await?;
            print_plan(planned.name(), planned.plan());

            if !planned.plan().is_empty() && !yes && !confirm(planned.plan().len()).await? {
                println!("{}", "aborted".yellow());
                planned.discard(ctx);
                return Ok(());
            }
            let outcome = planned.apply(ctx).await?;
            println!(
                "{} {} ({} statements)",
                "applied".green().bold(),
                outcome.table,
                outcome.report.applied
            );

            if db.config().deploy_seed_data && spec_kind == SpecKind::Table {
                let spec = parse_table_spec(&read(&spec).await?).map_err(keel::Error::from)?;
                let has_rows = spec.seed_data.as_ref().is_some_and(|s| !s.is_empty());
                if has_rows && !db.driver().schema_for(&spec)?.is_deleted() {
                    let seeded = db
                        .load_table(ctx, spec, RequestKind::Seed)?
                        .plan(ctx)
                        .await?
                        .apply(ctx)
                        .await?;
                    println!(
                        "{} {} ({} seed statements)",
                        "seeded".green().bold(),
                        seeded.table,
                        seeded.report.applied
                    );
                }
            }
        }
        Commands::Fixtures {
            input_dir,
            output_dir,
        } => {
            if input_dir.is_some() {
                db_config.input_dir = input_dir;
            }
            if output_dir.is_some() {
                db_config.output_dir = output_dir;
            }
            let db = Database::new(db_config)?;
            let report = db.create_fixtures(ctx).await?;
            println!(
                "{} {} ({} tables, {} statements)",
                "wrote".green().bold(),
                report.path,
                report.tables.len(),
                report.statements
            );
        }
    }
    Ok(())
}

/// Merge the config file with command-line overrides.
fn database_config(
    loaded: Option<&Loaded>,
    args: &ConnectionArgs,
) -> Result<DatabaseConfig, CliError> {
    let file = loaded.map(|l| &l.config);
    let driver = args
        .driver
        .or(file.and_then(|f| f.driver))
        .ok_or(CliError::NoDriver)?;
    let pick = |flag: &Option<String>, from_file: Option<&Option<String>>| {
        flag.clone().or_else(|| from_file.cloned().flatten())
    };
    let hosts = if args.hosts.is_empty() {
        file.map(|f| f.hosts.clone()).unwrap_or_default()
    } else {
        args.hosts.clone()
    };
    let resolve = |dir: Option<&Utf8PathBuf>| match (loaded, dir) {
        (Some(l), Some(dir)) => Some(l.resolve(dir)),
        (None, dir) => dir.cloned(),
        (_, None) => None,
    };

    Ok(DatabaseConfig {
        driver,
        uri: pick(&args.uri, file.map(|f| &f.uri)),
        hosts,
        username: pick(&args.username, file.map(|f| &f.username)),
        password: pick(&args.password, file.map(|f| &f.password)),
        keyspace: pick(&args.keyspace, file.map(|f| &f.keyspace)),
        input_dir: resolve(file.and_then(|f| f.input_dir.as_ref())),
        output_dir: resolve(file.and_then(|f| f.output_dir.as_ref())),
        deploy_seed_data: file.is_some_and(|f| f.deploy_seed_data),
        allow_drop_columns: file.is_some_and(|f| f.allow_drop_columns),
        verify_before_apply: file.is_some_and(|f| f.verify_before_apply),
    })
}

async fn read(path: &Utf8PathBuf) -> Result<String, CliError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CliError::Read {
            path: path.clone(),
            source,
        })
}

async fn load<'db>(
    db: &'db Database,
    ctx: &Context,
    path: &Utf8PathBuf,
    kind: SpecKind,
    seed: bool,
) -> Result<LoadedTable<'db>, CliError> {
    let input = read(path).await?;
    let loaded = match kind {
        SpecKind::Type => {
            let spec = parse_type_spec(&input).map_err(keel::Error::from)?;
            db.load_type(ctx, spec)?
        }
        SpecKind::Table => {
            let spec = parse_table_spec(&input).map_err(keel::Error::from)?;
            let request = if seed {
                RequestKind::Seed
            } else {
                RequestKind::Table
            };
            db.load_table(ctx, spec, request)?
        }
    };
    Ok(loaded)
}

fn print_plan(name: &str, plan: &Plan) {
    if plan.is_empty() {
        println!("{} {name} is up to date", "ok".green().bold());
        return;
    }
    println!(
        "{} {name} ({} statements)",
        "plan".cyan().bold(),
        plan.len()
    );
    for statement in plan {
        println!("{};", statement.dimmed());
    }
}

async fn confirm(statements: usize) -> Result<bool, CliError> {
    print!("Apply {statements} statements? [y/N] ");
    std::io::stdout().flush().map_err(CliError::Prompt)?;
    let mut line = String::new();
    tokio::io::BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .map_err(CliError::Prompt)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

/// Mask the password in a connection URI for display.
fn mask_password(url: &str) -> String {
    let Some(start) = url.find("://").map(|i| i + 3) else {
        return url.to_string();
    };
    let Some(at) = url[start..].rfind('@').map(|i| start + i) else {
        return url.to_string();
    };
    match url[start..at].find(':') {
        Some(colon) => format!("{}:***{}", &url[..start + colon], &url[at..]),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileConfig;

    fn loaded(config: FileConfig) -> Loaded {
        Loaded {
            config,
            path: "/srv/app/.config/keel.yaml".into(),
            root: "/srv/app".into(),
        }
    }

    #[test]
    fn test_mask_password() {
        assert_eq!(
            mask_password("postgres://app:s3cr@t@db:5432/app"),
            "postgres://app:***@db:5432/app"
        );
        assert_eq!(mask_password("postgres://app@db/app"), "postgres://app@db/app");
        assert_eq!(mask_password("/tmp/app.db"), "/tmp/app.db");
    }

    #[test]
    fn test_flags_override_file() {
        let file = loaded(FileConfig {
            driver: Some(DriverKind::Postgres),
            uri: Some("postgres://file/app".into()),
            input_dir: Some("schema".into()),
            deploy_seed_data: true,
            ..Default::default()
        });
        let args = ConnectionArgs {
            uri: Some("postgres://flag/app".into()),
            ..Default::default()
        };
        let config = database_config(Some(&file), &args).unwrap();
        assert_eq!(config.driver, DriverKind::Postgres);
        assert_eq!(config.uri.as_deref(), Some("postgres://flag/app"));
        assert_eq!(config.input_dir, Some(Utf8PathBuf::from("/srv/app/schema")));
        assert!(config.deploy_seed_data);
    }

    #[test]
    fn test_driver_is_required() {
        let err = database_config(None, &ConnectionArgs::default()).unwrap_err();
        assert!(matches!(err, CliError::NoDriver));
    }

    #[test]
    fn test_cli_parses_apply() {
        let cli = Cli::try_parse_from([
            "keel", "apply", "--spec", "users.yaml", "--driver", "sqlite", "--uri", "app.db",
            "--yes",
        ])
        .unwrap();
        assert_eq!(cli.conn.driver, Some(DriverKind::Sqlite));
        assert!(matches!(cli.command, Commands::Apply { yes: true, .. }));
    }

    #[test]
    fn test_cli_verify() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
