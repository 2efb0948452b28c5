//! ballot-loadgen: push synthetic votes at a running worker and report how
//! many made it into MySQL.

use std::sync::Arc;
use std::time::Duration;

use ballot_cli::telemetry::{self, LogFormat};
use ballot_core::app::{LoadConfig, LoadGenerator};
use ballot_core::ports::SystemClock;
use ballot_mysql::{MySqlSettings, MySqlVoteStore};
use ballot_redis::{RedisSettings, RedisVoteQueue};
use clap::Parser;
use miette::{IntoDiagnostic, WrapErr, miette};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "ballot-loadgen", version, about = "Load test for the vote worker")]
struct Args {
    #[arg(long, default_value = "localhost")]
    redis_host: String,

    #[arg(long, default_value_t = 6379)]
    redis_port: u16,

    #[arg(long, default_value_t = 0)]
    redis_db: i64,

    #[arg(long)]
    redis_password: Option<String>,

    #[arg(long, default_value = "localhost")]
    mysql_host: String,

    #[arg(long, default_value_t = 3306)]
    mysql_port: u16,

    #[arg(long, default_value = "root")]
    mysql_user: String,

    #[arg(long, default_value = "rootpass")]
    mysql_pass: String,

    #[arg(long, default_value = "voting")]
    mysql_db: String,

    /// Do not connect to MySQL; the report then has no insert count.
    #[arg(long)]
    skip_db: bool,

    /// Total votes to generate (0 = until --duration elapses).
    #[arg(long, default_value_t = 1000)]
    votes: u64,

    /// Concurrent producers.
    #[arg(long, default_value_t = 10)]
    workers: usize,

    #[arg(long, default_value = "2m", value_parser = humantime::parse_duration)]
    duration: Duration,

    /// How long to wait for the worker to drain after generation stops.
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    settle: Duration,

    #[arg(long, default_value = "votes")]
    queue: String,

    /// Delete the queue before starting.
    #[arg(long)]
    clear: bool,

    /// Emit JSON logs.
    #[arg(long)]
    json: bool,
}

impl Args {
    fn load_config(&self) -> LoadConfig {
        LoadConfig {
            queue_key: self.queue.clone(),
            votes: (self.votes > 0).then_some(self.votes),
            workers: self.workers,
            duration: self.duration,
            settle: self.settle,
            clear_queue: self.clear,
            ..LoadConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let args = Args::parse();
    let format = if args.json {
        LogFormat::Json
    } else {
        LogFormat::Plain
    };
    telemetry::init(format, "info")
        .map_err(|e| miette!("failed to install tracing subscriber: {e}"))?;

    let queue = RedisVoteQueue::connect(&RedisSettings {
        host: args.redis_host.clone(),
        port: args.redis_port,
        db: args.redis_db,
        password: args.redis_password.clone(),
        pool_size: args.workers + 2,
    })
    .await
    .into_diagnostic()
    .wrap_err("failed to connect to Redis")?;

    let mut generator =
        LoadGenerator::new(Arc::new(queue), Arc::new(SystemClock), args.load_config());

    let store = if args.skip_db {
        None
    } else {
        let store = MySqlVoteStore::connect(&MySqlSettings {
            host: args.mysql_host.clone(),
            port: args.mysql_port,
            user: args.mysql_user.clone(),
            password: args.mysql_pass.clone(),
            database: args.mysql_db.clone(),
            max_connections: 2,
            ..MySqlSettings::default()
        })
        .await
        .into_diagnostic()
        .wrap_err("failed to connect to MySQL")?;
        let store = Arc::new(store);
        generator = generator.with_store(store.clone());
        Some(store)
    };

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted; stopping producers");
            on_ctrl_c.cancel();
        }
    });

    let report = generator.run(cancel).await.into_diagnostic()?;
    println!("{report}");

    if let Some(store) = store {
        store.close().await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_mirror_the_harness_defaults() {
        let args = Args::parse_from(["ballot-loadgen"]);
        assert_eq!(args.votes, 1000);
        assert_eq!(args.workers, 10);
        assert_eq!(args.duration, Duration::from_secs(120));
        assert_eq!(args.queue, "votes");
        assert!(!args.clear);

        let config = args.load_config();
        assert_eq!(config.votes, Some(1000));
        assert_eq!(config.settle, Duration::from_secs(10));
    }

    #[test]
    fn zero_votes_means_duration_bound() {
        let args = Args::parse_from(["ballot-loadgen", "--votes", "0", "--duration", "30s"]);
        let config = args.load_config();
        assert_eq!(config.votes, None);
        assert_eq!(config.duration, Duration::from_secs(30));
    }
}
