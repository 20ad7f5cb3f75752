//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::api::{self, ApiState};
use crate::core::cli::{self, CliConfig, Commands};
use crate::core::config::AppConfig;
use crate::core::constants::ENV_LOG;
use crate::core::shutdown::ShutdownService;
use crate::data::{ArchiveService, CacheService, StoreService, TopicService};
use crate::domain::breaker::Breakers;
use crate::domain::chat::{BatchWriter, ChatPipeline, QueueWorker, ReliableQueue};
use crate::domain::fanout::relay::{start_chat_bridge, start_global_relay};
use crate::domain::fanout::ConnectionManager;
use crate::domain::sessions::SessionManager;

pub struct CoreApp {
    pub config: AppConfig,
    pub state: ApiState,
    pub shutdown: ShutdownService,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        match command {
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config).await?;
        app.start().await
    }

    fn init_logging() {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_env(ENV_LOG)
            .unwrap_or_else(|_| EnvFilter::new("parley_server=info,tower_http=warn"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        Self::init_with_config(config).await
    }

    /// Wire every service; used directly by integration tests with a
    /// memory-backend config
    pub async fn init_with_config(config: AppConfig) -> Result<Self> {
        let cache = Arc::new(
            CacheService::new(&config.cache)
                .await
                .context("Failed to initialize cache service")?,
        );
        tracing::debug!(backend = cache.backend_name(), "Cache initialized");

        let topics = Arc::new(
            TopicService::from_cache_config(&config.cache)
                .await
                .context("Failed to initialize topic service")?,
        );
        tracing::debug!(backend = topics.backend_name(), "Topics initialized");

        let store = Arc::new(
            StoreService::new(&config.store)
                .await
                .context("Failed to initialize message store")?,
        );
        tracing::debug!(backend = store.store_name(), "Store initialized");

        let archive = Arc::new(
            ArchiveService::new(&config.archive).context("Failed to initialize archive log")?,
        );
        tracing::debug!(sink = archive.sink_name(), "Archive initialized");

        let breakers = Arc::new(Breakers::new());
        let shutdown = ShutdownService::new(
            Arc::clone(&topics),
            Arc::clone(&archive),
            Arc::clone(&store),
        );

        // Heal claims orphaned by a crash before accepting new work
        let queue = Arc::new(ReliableQueue::new(Arc::clone(&cache)));
        if let Err(e) = queue.recover().await {
            tracing::warn!(error = %e, "Startup queue recovery sweep failed");
        }

        let (archive_tx, archive_rx) = mpsc::channel(config.pipeline.buffer_capacity);

        let pipeline = Arc::new(ChatPipeline::new(
            Arc::clone(&cache),
            Arc::clone(&store),
            Arc::clone(&topics),
            Arc::clone(&queue),
            Arc::clone(&breakers),
            archive_tx,
        ));

        let batch_writer = BatchWriter::new(
            archive_rx,
            Arc::clone(&archive),
            Arc::clone(&queue),
            Arc::clone(&breakers),
            &config.pipeline,
        );
        shutdown
            .register(batch_writer.start(shutdown.subscribe()))
            .await;

        let queue_worker = QueueWorker::new(
            Arc::clone(&queue),
            Arc::clone(&archive),
            Arc::clone(&breakers),
            &config.pipeline,
        );
        shutdown
            .register(queue_worker.start(shutdown.subscribe()))
            .await;

        let (manager, manager_handle) = ConnectionManager::start(
            Arc::clone(&store),
            Arc::clone(&topics),
            Arc::clone(&breakers),
            shutdown.subscribe(),
        );
        shutdown.register(manager_handle).await;
        shutdown
            .register(start_global_relay(
                Arc::clone(&topics),
                Arc::clone(&manager),
                shutdown.subscribe(),
            ))
            .await;
        shutdown
            .register(start_chat_bridge(
                Arc::clone(&topics),
                Arc::clone(&manager),
                shutdown.subscribe(),
            ))
            .await;

        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&cache),
            Arc::clone(&breakers),
            &config.session,
        ));

        let state = ApiState {
            pipeline,
            sessions,
            manager,
            store,
            cache,
            breakers,
            shutdown: shutdown.clone(),
        };

        Ok(Self {
            config,
            state,
            shutdown,
        })
    }

    /// Serve until a shutdown signal, then drain and close in order
    pub async fn start(self) -> Result<()> {
        self.shutdown.install_signal_handlers();

        api::server::serve(self.state.clone(), &self.config.server).await?;

        // The HTTP server stopped (signal received): fan the shutdown
        // through workers and close the backing services.
        self.shutdown.shutdown().await;
        Ok(())
    }
}
