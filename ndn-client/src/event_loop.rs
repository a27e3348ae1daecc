//! Cooperative event loop over several connections on one thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{select_all, FutureExt};
use tokio::runtime::Runtime;
use tracing::debug;

use crate::connection::Connection;
use crate::ClientError;

/// Longest single wait between housekeeping passes.
const MAX_WAIT: Duration = Duration::from_secs(1);

/// Stops a running [`EventLoop`] from a callback or another thread.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct EventLoop {
    connections: Vec<Connection>,
    runtime: Arc<Runtime>,
    running: Arc<AtomicBool>,
}

impl EventLoop {
    /// Waits are driven on the first connection's runtime.
    pub fn new(connections: Vec<Connection>) -> Result<Self, ClientError> {
        let runtime = match connections.first() {
            Some(c) => c.runtime().clone(),
            None => Arc::new(
                tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()?,
            ),
        };
        Ok(Self {
            connections,
            runtime,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.running.clone())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// One tick: housekeeping on every connection, wait for readiness or the earliest
    /// deadline, then dispatch the connections that became ready.
    pub fn run_once(&self) -> Result<(), ClientError> {
        let mut wait = MAX_WAIT;
        for conn in &self.connections {
            wait = wait.min(conn.process_scheduled()?);
        }
        let ready = self.wait_ready(wait);
        for i in ready {
            self.connections[i].run(Some(Duration::ZERO))?;
        }
        Ok(())
    }

    fn wait_ready(&self, wait: Duration) -> Vec<usize> {
        let waiting: Vec<_> = self
            .connections
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_connected())
            .map(|(i, c)| {
                async move {
                    // errors resurface from `run` on this connection
                    if let Err(e) = c.ready().await {
                        debug!(connection = i, error = %e, "readiness wait failed");
                    }
                    i
                }
                .boxed_local()
            })
            .collect();
        self.runtime.block_on(async {
            if waiting.is_empty() {
                tokio::time::sleep(wait).await;
                return Vec::new();
            }
            match tokio::time::timeout(wait, select_all(waiting)).await {
                Ok((first, _, rest)) => {
                    let mut ready: Vec<usize> =
                        rest.into_iter().filter_map(|f| f.now_or_never()).collect();
                    ready.push(first);
                    ready.sort_unstable();
                    ready
                }
                Err(_) => Vec::new(),
            }
        })
    }

    /// Loop until [`EventLoop::stop`] is called or a connection fails.
    pub fn run(&self) -> Result<(), ClientError> {
        self.running.store(true, Ordering::SeqCst);
        debug!(connections = self.connections.len(), "event loop started");
        while self.running.load(Ordering::SeqCst) {
            self.run_once()?;
        }
        debug!("event loop stopped");
        Ok(())
    }
}
