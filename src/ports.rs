//! Free-port discovery for the worker service.
//!
//! Allocation is race-safe within the process: an in-memory reservation set
//! ensures two concurrent callers scanning overlapping ranges never receive
//! the same port; the loser simply moves on to the next candidate. A
//! reservation is held until `release()` is called (normally when the worker
//! process exits).

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Number of consecutive ports probed starting from the preferred port.
pub const PORT_SCAN_RANGE: u16 = 50;

#[derive(Debug, Error)]
#[error("no free port in range {start}..{end}")]
pub struct NoFreePortError {
    pub start: u16,
    pub end: u16,
}

#[derive(Default)]
pub struct PortAllocator {
    reserved: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<u16>> {
        self.reserved.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Find an unused port, scanning `preferred_start..preferred_start + N`.
    /// The returned port stays reserved until `release()` is called.
    pub async fn allocate(&self, preferred_start: u16) -> Result<u16, NoFreePortError> {
        let end = preferred_start.saturating_add(PORT_SCAN_RANGE);
        for port in preferred_start..end {
            if !self.try_reserve(port) {
                continue;
            }
            match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
                Ok(listener) => {
                    drop(listener);
                    tracing::debug!("allocated port {}", port);
                    return Ok(port);
                }
                Err(_) => self.release(port),
            }
        }
        Err(NoFreePortError {
            start: preferred_start,
            end,
        })
    }

    fn try_reserve(&self, port: u16) -> bool {
        self.lock().insert(port)
    }

    /// Return a port to the pool. Safe to call for ports that were never
    /// reserved.
    pub fn release(&self, port: u16) {
        if self.lock().remove(&port) {
            tracing::debug!("released port {}", port);
        }
    }

    pub fn reserved_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn allocates_from_preferred_start() {
        let allocator = PortAllocator::new();
        let port = allocator.allocate(47100).await.unwrap();
        assert!((47100..47100 + PORT_SCAN_RANGE).contains(&port));
        assert_eq!(allocator.reserved_count(), 1);
    }

    #[tokio::test]
    async fn sequential_allocations_are_distinct() {
        let allocator = PortAllocator::new();
        let a = allocator.allocate(47200).await.unwrap();
        let b = allocator.allocate(47200).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn concurrent_allocations_never_collide() {
        let allocator = Arc::new(PortAllocator::new());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let allocator = allocator.clone();
                tokio::spawn(async move { allocator.allocate(47300).await.unwrap() })
            })
            .collect();

        let mut seen = HashSet::new();
        for task in tasks {
            let port = task.await.unwrap();
            assert!(seen.insert(port), "port {} handed out twice", port);
        }
    }

    #[tokio::test]
    async fn exhausted_range_errors() {
        let allocator = PortAllocator::new();
        for _ in 0..PORT_SCAN_RANGE {
            // each success keeps its reservation, draining the range
            if allocator.allocate(47400).await.is_err() {
                break;
            }
        }
        let err = allocator.allocate(47400).await.unwrap_err();
        assert_eq!(err.start, 47400);
    }

    #[tokio::test]
    async fn release_makes_port_reusable() {
        let allocator = PortAllocator::new();
        let port = allocator.allocate(47500).await.unwrap();
        allocator.release(port);
        assert_eq!(allocator.reserved_count(), 0);
        let again = allocator.allocate(port).await.unwrap();
        assert_eq!(again, port);
    }
}
