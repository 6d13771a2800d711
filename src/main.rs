use tracing_subscriber::EnvFilter;

use serialkey::config::KeychainConfig;
use serialkey::contracts::Keychain;
use serialkey::storage::{DurableKeychain, PgProvider};

const USAGE: &str = "usage: serialkey create-table [--url URL] [--table NAME]

Creates the PostgreSQL sequence table if it does not exist.

Environment:
  SERIALKEY_DATABASE_URL   PostgreSQL URL (overridden by --url)
  SERIALKEY_TABLE          table name, default serialkeys (overridden by --table)";

#[tokio::main]
async fn main() {
    let filter = match "serialkey=info".parse() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(std::env::args().skip(1).collect()).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Vec<String>) -> Result<(), String> {
    match args.first().map(String::as_str) {
        Some("create-table") => cmd_create_table(&args[1..]).await,
        Some("-h") | Some("--help") => {
            println!("{USAGE}");
            Ok(())
        }
        Some(other) => {
            eprintln!("{USAGE}");
            Err(format!("unknown command: {other}"))
        }
        None => {
            eprintln!("{USAGE}");
            Err("missing command".into())
        }
    }
}

async fn cmd_create_table(args: &[String]) -> Result<(), String> {
    let mut config = KeychainConfig::from_env();
    if let Some(url) = parse_flag_value(args, "--url")? {
        config.database_url = Some(url);
    }
    if let Some(table) = parse_flag_value(args, "--table")? {
        config.table = table;
    }

    let url = config
        .database_url
        .clone()
        .filter(|url| !url.trim().is_empty())
        .ok_or("missing PostgreSQL URL: set SERIALKEY_DATABASE_URL or pass --url")?;

    let provider = PgProvider::connect(&url, &config)
        .await
        .map_err(|e| e.to_string())?;
    let chain = DurableKeychain::from_config(provider, &config);

    let created = chain
        .create_table()
        .await
        .map_err(|e| format!("create PostgreSQL table {}: {e}", config.table));
    let closed = chain.close().await.map_err(|e| e.to_string());

    created?;
    closed?;
    println!("table {} is ready", config.table);
    Ok(())
}

/// Returns the value following `flag`, rejecting unknown flags.
fn parse_flag_value(args: &[String], flag: &str) -> Result<Option<String>, String> {
    let mut value = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--url" | "--table" => {
                let next = iter
                    .next()
                    .ok_or_else(|| format!("{arg} requires a value"))?;
                if arg == flag {
                    value = Some(next.clone());
                }
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_flag_value_finds_flags() {
        let list = args(&["--url", "postgres://localhost/db", "--table", "tickets"]);
        assert_eq!(
            parse_flag_value(&list, "--url").unwrap().as_deref(),
            Some("postgres://localhost/db")
        );
        assert_eq!(
            parse_flag_value(&list, "--table").unwrap().as_deref(),
            Some("tickets")
        );
    }

    #[test]
    fn parse_flag_value_rejects_bad_input() {
        assert!(parse_flag_value(&args(&["--url"]), "--url").is_err());
        assert!(parse_flag_value(&args(&["--verbose"]), "--url").is_err());
        assert_eq!(parse_flag_value(&args(&[]), "--url").unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_command_fails() {
        assert!(run(args(&["drop-table"])).await.is_err());
        assert!(run(args(&[])).await.is_err());
    }
}
