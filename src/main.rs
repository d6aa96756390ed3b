use paramdb::{default_config_path, load_config, Config, DatabaseSession, Param, QueryResult};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: paramdb [--config <file>] [--database <path>] <sql> [params...]";

struct Args {
    config: Option<String>,
    database: Option<String>,
    sql: String,
    params: Vec<Param>,
}

/// Reads a command-line parameter as the most specific value it spells.
fn parse_param(raw: &str) -> Param {
    if raw.eq_ignore_ascii_case("null") {
        Param::Null
    } else if raw == "true" || raw == "false" {
        Param::Bool(raw == "true")
    } else if let Ok(i) = raw.parse::<i64>() {
        Param::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Param::Float(f)
    } else {
        Param::Text(raw.to_string())
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut config = None;
    let mut database = None;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(args.next().ok_or("--config needs a file")?),
            "--database" => database = Some(args.next().ok_or("--database needs a path")?),
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let sql = positional.next().ok_or_else(|| USAGE.to_string())?;
    Ok(Args {
        config,
        database,
        sql,
        params: positional.map(|p| parse_param(&p)).collect(),
    })
}

fn resolve_config(args: &Args) -> paramdb::Result<Config> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => load_config(path)?,
            None => Config::default(),
        },
    };
    if let Some(database) = &args.database {
        config.database.name = database.clone();
    }
    Ok(config)
}

fn run(args: Args) -> paramdb::Result<()> {
    let config = resolve_config(&args)?;
    let mut session = DatabaseSession::new(&config);
    info!("Starting {}", session);

    match session.query(&args.sql, &args.params)? {
        QueryResult::Rows(rows) => println!("{}", serde_json::to_string_pretty(&rows)?),
        QueryResult::Done => println!("OK"),
        QueryResult::Skipped => {
            for record in session.errors() {
                eprintln!("{}", record.error);
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    // Initialize the logging system using tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{}", msg);
            return ExitCode::from(2);
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
