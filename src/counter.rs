use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// Number of clients currently inside the echo loop.
///
/// Cloning yields another handle to the same count.
#[derive(Debug, Clone, Default)]
pub struct ActiveClients {
    count: Arc<Mutex<usize>>,
}

impl ActiveClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> usize {
        *self.lock()
    }

    /// Counts `peer` as connected until the returned guard is dropped.
    pub fn register(&self, peer: SocketAddr) -> ClientGuard {
        let mut count = self.lock();
        *count += 1;
        tracing::debug!("TCP current client count: {}", *count);
        ClientGuard {
            clients: self.clone(),
            peer,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, usize> {
        // Poisoning is ignored; the count is a plain integer.
        self.count.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug)]
pub struct ClientGuard {
    clients: ActiveClients,
    peer: SocketAddr,
}

impl ClientGuard {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let mut count = self.clients.lock();
        debug_assert!(*count > 0, "client count underflow");
        *count = count.saturating_sub(1);
        tracing::debug!("TCP current client count: {}", *count);
    }
}
