/*!
Catalog of trackable targets.

The list of target identifiers is refreshed on a worker thread and read by
the control loop. Readers always see a complete snapshot: a refresh builds a
new snapshot and swaps it in whole, and a refresh that gives up leaves the
previous snapshot in place.
*/

use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info};

use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::shutdown::ShutdownSignal;

/// Catalog fetch failures. All of them are retried the same way.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Catalog server returned status {0}")]
    Status(u16),
}

/// Immutable list of target identifiers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogSnapshot {
    pub ids: Vec<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl CatalogSnapshot {
    pub fn new(ids: Vec<String>) -> Self {
        Self {
            ids,
            fetched_at: Some(Utc::now()),
        }
    }
}

/// Synchronised handle to the current snapshot
#[derive(Clone, Default)]
pub struct SharedCatalog {
    inner: Arc<RwLock<Arc<CatalogSnapshot>>>,
}

impl SharedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot. Holding it does not block writers.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Swap in a new snapshot
    pub fn replace(&self, snapshot: CatalogSnapshot) {
        let snapshot = Arc::new(snapshot);
        match self.inner.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }
}

/// Where target identifiers come from
#[allow(async_fn_in_trait)]
pub trait CatalogSource: Send + Sync + 'static {
    async fn fetch(&self) -> Result<Vec<String>, CatalogError>;
}

/// Whitespace-separated identifiers served over HTTP
pub struct HttpCatalog {
    client: reqwest::Client,
    url: String,
}

impl HttpCatalog {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into() })
    }
}

impl CatalogSource for HttpCatalog {
    async fn fetch(&self) -> Result<Vec<String>, CatalogError> {
        let response = self.client.get(&self.url).send().await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(CatalogError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        Ok(body.split_whitespace().map(str::to_string).collect())
    }
}

/// Runs catalog fetches on a worker thread, at most one at a time
pub struct CatalogRefresher<S: CatalogSource> {
    source: Arc<S>,
    catalog: SharedCatalog,
    policy: RetryPolicy,
    refresh_interval: Duration,
    shutdown: ShutdownSignal,
    worker: Option<JoinHandle<()>>,
    last_started: Option<Instant>,
}

impl<S: CatalogSource> CatalogRefresher<S> {
    pub fn new(
        source: S,
        catalog: SharedCatalog,
        policy: RetryPolicy,
        refresh_interval: Duration,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            source: Arc::new(source),
            catalog,
            policy,
            refresh_interval,
            shutdown,
            worker: None,
            last_started: None,
        }
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    pub fn is_refreshing(&self) -> bool {
        self.worker.as_ref().is_some_and(|worker| !worker.is_finished())
    }

    /// Start a refresh unless one is already running. With `block`, wait
    /// for it to finish.
    pub fn refresh(&mut self, block: bool) {
        if self.is_refreshing() {
            return;
        }

        let source = Arc::clone(&self.source);
        let catalog = self.catalog.clone();
        let policy = self.policy;
        let shutdown = self.shutdown.clone();

        let worker = thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("Failed to start catalog runtime: {}", e);
                    return;
                }
            };

            let fetched = runtime.block_on(retry_with_backoff("target catalog", policy, &shutdown, || {
                source.fetch()
            }));

            if let Some(ids) = fetched {
                info!("🛰️ Catalog refreshed: {} targets", ids.len());
                catalog.replace(CatalogSnapshot::new(ids));
            }
        });

        self.last_started = Some(Instant::now());

        if block {
            if worker.join().is_err() {
                error!("Catalog worker panicked");
            }
        } else {
            self.worker = Some(worker);
        }
    }

    /// Fire-and-forget refresh once the refresh interval has passed
    pub fn refresh_if_due(&mut self) {
        let due = self
            .last_started
            .map_or(true, |started| started.elapsed() >= self.refresh_interval);

        if due {
            self.refresh(false);
        }
    }
}
