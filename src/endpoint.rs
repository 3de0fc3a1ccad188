//! Closable handles for the sockets owned by long-running services.
//!
//! A service's loops borrow its socket through an `Arc`, so aborting them is not enough
//! to free the port while the service itself is still referenced. [`Endpoint`] lets
//! `shutdown` drop the service's own reference, and [`stop_tasks`] waits until the
//! aborted loops have dropped theirs.

use anyhow::{Result, bail};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

pub struct Endpoint<T> {
    slot: Mutex<Option<Arc<T>>>,
}

impl<T> Endpoint<T> {
    pub fn new(value: T) -> Self {
        Self {
            slot: Mutex::new(Some(Arc::new(value))),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<T>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A handle to the open endpoint, or an error once it has been closed.
    pub fn get(&self) -> Result<Arc<T>> {
        match self.slot().as_ref() {
            Some(value) => Ok(value.clone()),
            None => bail!("Endpoint is closed"),
        }
    }

    /// Releases this handle's reference. The resource is freed once in-flight clones drop.
    pub fn close(&self) -> Option<Arc<T>> {
        self.slot().take()
    }

    pub fn is_closed(&self) -> bool {
        self.slot().is_none()
    }
}

impl Endpoint<UdpSocket> {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.get()?.local_addr()?)
    }
}

/// Aborts every task and waits for each to be dropped, along with whatever it captured.
pub async fn stop_tasks(handles: Vec<JoinHandle<()>>) {
    for handle in &handles {
        handle.abort();
    }

    for handle in handles {
        if let Err(e) = handle.await
            && !e.is_cancelled()
        {
            tracing::warn!("Background task ended abnormally: {}", e);
        }
    }
}
