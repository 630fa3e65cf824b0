//! Test server harness for integration tests.
//!
//! Spins up the real router on a random localhost port so tests can talk to
//! it over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use kanvas_core::{AutosaveConfig, ProjectStore};
use kanvas_server::orchestrator::{ModelConfig, OrchestratorConfig, PollConfig};
use kanvas_server::{router, AppState, GenerationProvider, RetryConfig, StorageClient};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Owner header used by the API.
pub const OWNER: &str = "x-user-id";

/// Orchestrator settings fast enough for tests.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry: RetryConfig::new(3, 10, 50, 2.0).without_jitter(),
        poll: PollConfig {
            interval: Duration::from_millis(10),
            image_timeout: Duration::from_secs(5),
            video_timeout: Duration::from_secs(5),
        },
        models: ModelConfig {
            image: "test/image".into(),
            video: "test/video".into(),
            analyze: "test/analyze".into(),
        },
    }
}

/// A test server instance with control handles.
pub struct TestServer {
    addr: SocketAddr,
    state: AppState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a server around `store` and `provider`.
    ///
    /// # Panics
    ///
    /// Panics if no port is available or server fails to bind.
    pub async fn start(
        store: ProjectStore,
        provider: Arc<dyn GenerationProvider>,
        storage: Option<StorageClient>,
        autosave: AutosaveConfig,
    ) -> Self {
        let port = portpicker::pick_unused_port().expect("no available port");
        let addr = SocketAddr::from(([127, 0, 0, 1], port));

        let state = AppState::new(store, provider, storage, autosave, fast_config());
        let app = router(state.clone());

        let listener = TcpListener::bind(addr).await.expect("failed to bind");
        let actual_addr = listener.local_addr().expect("failed to get local addr");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("server error");
        });

        // Give the server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        Self {
            addr: actual_addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    /// Get the server's socket address.
    #[allow(dead_code)]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Absolute URL for `path`.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Shared state (for test assertions).
    #[allow(dead_code)]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Gracefully shut down the server.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}
