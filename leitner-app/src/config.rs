use anyhow::{bail, Result};
use directories::ProjectDirs;
use leitner_core::SyncOptions;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::opts::{Cli, StoreKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Memory,
    Sqlite(PathBuf),
    Postgres(String),
}

impl StoreConfig {
    pub fn label(&self) -> &'static str {
        match self {
            StoreConfig::Memory => "memory",
            StoreConfig::Sqlite(_) => "sqlite",
            StoreConfig::Postgres(_) => "postgres",
        }
    }
}

/// Settings resolved from flags, environment and `.env`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub sync: SyncOptions,
}

impl AppConfig {
    pub fn from_cli(args: &Cli) -> Result<Self> {
        let store = match args.store {
            StoreKind::Memory => StoreConfig::Memory,
            StoreKind::Sqlite => StoreConfig::Sqlite(
                args.db_path
                    .clone()
                    .unwrap_or_else(|| data_root().join("leitner.sqlite3")),
            ),
            StoreKind::Postgres => match &args.database_url {
                Some(url) if !url.trim().is_empty() => StoreConfig::Postgres(url.clone()),
                _ => bail!("--store postgres needs --database-url or DATABASE_URL"),
            },
        };
        if args.op_timeout_ms == 0 {
            bail!("--op-timeout-ms must be positive");
        }
        Ok(Self {
            store,
            sync: SyncOptions {
                op_timeout: Duration::from_millis(args.op_timeout_ms),
            },
        })
    }
}

/// Per-user data directory, falling back to the working directory.
pub fn data_root() -> PathBuf {
    ProjectDirs::from("dev", "leitner", "leitner")
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn postgres_requires_url() {
        let mut cli = parse(&["leitner", "--store", "postgres", "deck", "list"]);
        cli.database_url = None;
        assert!(AppConfig::from_cli(&cli).is_err());

        cli.database_url = Some("postgres://localhost/leitner".into());
        let cfg = AppConfig::from_cli(&cli).unwrap();
        assert_eq!(
            cfg.store,
            StoreConfig::Postgres("postgres://localhost/leitner".into())
        );
    }

    #[test]
    fn sqlite_path_and_timeout_come_from_flags() {
        let cli = parse(&[
            "leitner",
            "--store",
            "sqlite",
            "--db-path",
            "/tmp/x.sqlite3",
            "--op-timeout-ms",
            "250",
            "deck",
            "list",
        ]);
        let cfg = AppConfig::from_cli(&cli).unwrap();
        assert_eq!(cfg.store, StoreConfig::Sqlite(PathBuf::from("/tmp/x.sqlite3")));
        assert_eq!(cfg.sync.op_timeout, Duration::from_millis(250));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cli = parse(&["leitner", "--store", "memory", "--op-timeout-ms", "0", "deck", "list"]);
        assert!(AppConfig::from_cli(&cli).is_err());
    }
}
