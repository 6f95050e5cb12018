use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks the externally reachable address recorded for a deployment.
pub trait IpAllocator: Send + Sync {
    /// `None` when there is no address to hand out.
    fn next_ip(&self) -> Option<String>;
}

/// Cycles through a fixed pool. Safe to share between concurrent deploys.
pub struct RoundRobinIps {
    pool: Vec<String>,
    next: AtomicUsize,
}

impl RoundRobinIps {
    pub fn new(pool: Vec<String>) -> Self {
        Self {
            pool,
            next: AtomicUsize::new(0),
        }
    }
}

impl IpAllocator for RoundRobinIps {
    fn next_ip(&self) -> Option<String> {
        if self.pool.is_empty() {
            return None;
        }

        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        Some(self.pool[index].clone())
    }
}
