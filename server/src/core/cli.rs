use clap::{Parser, Subcommand};

use super::config::{
    ArchiveBackendType, CacheBackendType, StoreBackendType, parse_archive_backend,
    parse_cache_backend, parse_store_backend,
};
use super::constants::{
    ENV_ARCHIVE_BACKEND, ENV_CACHE_BACKEND, ENV_HOST, ENV_KAFKA_BROKERS, ENV_PORT,
    ENV_POSTGRES_URL, ENV_REDIS_URL, ENV_STORE_BACKEND,
};

#[derive(Parser)]
#[command(name = "parley")]
#[command(version, about = "Real-time chat messaging core", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Cache backend: memory or redis
    #[arg(long, global = true, env = ENV_CACHE_BACKEND, value_parser = cache_backend_parser)]
    pub cache_backend: Option<CacheBackendType>,

    /// Redis URL (required for the redis cache backend)
    #[arg(long, global = true, env = ENV_REDIS_URL)]
    pub redis_url: Option<String>,

    /// Message store backend: memory or postgres
    #[arg(long, global = true, env = ENV_STORE_BACKEND, value_parser = store_backend_parser)]
    pub store_backend: Option<StoreBackendType>,

    /// PostgreSQL URL (required for the postgres store backend)
    #[arg(long, global = true, env = ENV_POSTGRES_URL)]
    pub postgres_url: Option<String>,

    /// Archive backend: memory or kafka
    #[arg(long, global = true, env = ENV_ARCHIVE_BACKEND, value_parser = archive_backend_parser)]
    pub archive_backend: Option<ArchiveBackendType>,

    /// Kafka bootstrap brokers (host:port[,host:port])
    #[arg(long, global = true, env = ENV_KAFKA_BROKERS)]
    pub kafka_brokers: Option<String>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the server (default)
    Start,
}

/// Resolved CLI flags, decoupled from clap for testability
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cache_backend: Option<CacheBackendType>,
    pub redis_url: Option<String>,
    pub store_backend: Option<StoreBackendType>,
    pub postgres_url: Option<String>,
    pub archive_backend: Option<ArchiveBackendType>,
    pub kafka_brokers: Option<String>,
}

/// Parse process arguments into the resolved config and optional subcommand
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        cache_backend: cli.cache_backend,
        redis_url: cli.redis_url,
        store_backend: cli.store_backend,
        postgres_url: cli.postgres_url,
        archive_backend: cli.archive_backend,
        kafka_brokers: cli.kafka_brokers,
    };
    (config, cli.command)
}

fn cache_backend_parser(value: &str) -> Result<CacheBackendType, String> {
    parse_cache_backend(value).ok_or_else(|| format!("unknown cache backend '{value}'"))
}

fn store_backend_parser(value: &str) -> Result<StoreBackendType, String> {
    parse_store_backend(value).ok_or_else(|| format!("unknown store backend '{value}'"))
}

fn archive_backend_parser(value: &str) -> Result<ArchiveBackendType, String> {
    parse_archive_backend(value).ok_or_else(|| format!("unknown archive backend '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parsers() {
        assert_eq!(
            cache_backend_parser("redis").unwrap(),
            CacheBackendType::Redis
        );
        assert!(cache_backend_parser("mongo").is_err());
        assert_eq!(
            store_backend_parser("memory").unwrap(),
            StoreBackendType::Memory
        );
        assert_eq!(
            archive_backend_parser("kafka").unwrap(),
            ArchiveBackendType::Kafka
        );
    }

    #[test]
    fn test_cli_verify() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
