//! Vakit - prayer-time sync and reconciliation engine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Provider Layer                          │
//! │  - HTML country list, JSON city/district lists              │
//! │  - HTML prayer-time tables                                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Reconciler (diff, ordered batch apply)                   │
//! │  - Sync / Broom jobs (single-flight timers)                 │
//! │  - Query surface                                            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx)                                            │
//! │  - moka snapshot cache                                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `provider`: Fetching and parsing provider payloads
//! - `service`: Reconciliation, jobs and queries
//! - `data`: Database and cache layer
//! - `config`: Configuration management
//! - `error`: Error accumulator
//! - `metrics`: Prometheus registry

pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod provider;
pub mod service;

use std::sync::Arc;

/// Application state shared by the jobs and the query surface
#[derive(Clone)]
pub struct App {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Query snapshot cache
    pub cache: Arc<data::QueryCache>,

    /// Prayer-time provider
    pub provider: Arc<dyn provider::Provider>,

    pub reconciler: Arc<service::Reconciler>,

    pub query: service::QueryService,
}

impl App {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database (runs migrations)
    /// 2. Load the country name table
    /// 3. Build the provider client
    /// 4. Initialize caches
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> error::Result<Self> {
        tracing::info!("Initializing application state...");

        let db = data::Database::connect(&config.database.path, config.database.timeout()).await?;
        tracing::info!(path = %config.database.path.display(), "Database connected");

        let names = provider::NameTable::load(config.provider.names_path.as_deref())?;
        let provider = provider::HttpProvider::new(&config.provider, Arc::new(names))?;

        Ok(Self::with_provider(config, db, Arc::new(provider)))
    }

    /// Assemble state around an already connected database and any provider
    pub fn with_provider(
        config: config::AppConfig,
        db: data::Database,
        provider: Arc<dyn provider::Provider>,
    ) -> Self {
        let db = Arc::new(db);
        let cache = Arc::new(data::QueryCache::new(
            config.cache.max_entries,
            config.cache.timeout(),
        ));
        tracing::info!(
            max_entries = config.cache.max_entries,
            ttl_secs = config.cache.timeout_seconds,
            "Caches initialized"
        );

        let reconciler = Arc::new(service::Reconciler::new(
            db.clone(),
            provider.clone(),
            cache.clone(),
            service::ReconcileSettings::from_config(&config.sync, &config.provider),
        ));
        let query = service::QueryService::new(db.clone(), cache.clone());

        Self {
            config: Arc::new(config),
            db,
            cache,
            provider,
            reconciler,
            query,
        }
    }

    /// The sync job, guarded for single-flight execution
    pub fn sync_job(&self) -> service::ScheduledJob {
        service::ScheduledJob::new(Arc::new(service::SyncJob::new(self.reconciler.clone())))
    }

    /// The broom job, guarded for single-flight execution
    pub fn broom_job(&self) -> service::ScheduledJob {
        service::ScheduledJob::new(Arc::new(service::BroomJob::new(
            self.db.clone(),
            self.cache.clone(),
            self.config.broom.effect_days,
        )))
    }

    /// Start the timers of every enabled job
    pub fn start_jobs(&self) -> service::Scheduler {
        let mut scheduler = service::Scheduler::new();

        if self.config.sync.enabled {
            scheduler.schedule(
                &self.sync_job(),
                self.config.sync.initial_delay(),
                self.config.sync.interval(),
            );
        } else {
            tracing::info!("Sync job disabled");
        }

        if self.config.broom.enabled {
            scheduler.schedule(
                &self.broom_job(),
                self.config.broom.initial_delay(),
                self.config.broom.interval(),
            );
        } else {
            tracing::info!("Broom job disabled");
        }

        scheduler
    }
}
