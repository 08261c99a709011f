//! Upstream server selection. The default picks uniformly at random across
//! the configured backend list; tests inject a deterministic round-robin
//! selector instead so fragment/reassembly scenarios stay reproducible.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::seq::SliceRandom;

/// Chooses one address from a non-empty pool of upstream servers.
pub trait UpstreamSelector: Send + Sync {
    fn select<'a>(&self, pool: &'a [SocketAddr]) -> &'a SocketAddr;
}

/// Uniform random selection, the default for both binaries.
#[derive(Debug, Default)]
pub struct RandomSelector;

impl UpstreamSelector for RandomSelector {
    fn select<'a>(&self, pool: &'a [SocketAddr]) -> &'a SocketAddr {
        pool.choose(&mut rand::thread_rng())
            .expect("upstream pool must be non-empty")
    }
}

/// Deterministic round-robin selection, useful for tests that need
/// reproducible upstream fan-out.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    next: AtomicUsize,
}

impl UpstreamSelector for RoundRobinSelector {
    fn select<'a>(&self, pool: &'a [SocketAddr]) -> &'a SocketAddr {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % pool.len();
        &pool[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Vec<SocketAddr> {
        vec![
            "127.0.0.1:53".parse().unwrap(),
            "127.0.0.1:54".parse().unwrap(),
            "127.0.0.1:55".parse().unwrap(),
        ]
    }

    #[test]
    fn random_selector_picks_from_pool() {
        let pool = pool();
        let selector = RandomSelector;
        for _ in 0..20 {
            let picked = selector.select(&pool);
            assert!(pool.contains(picked));
        }
    }

    #[test]
    fn round_robin_cycles_in_order() {
        let pool = pool();
        let selector = RoundRobinSelector::default();
        let picks: Vec<_> = (0..6).map(|_| *selector.select(&pool)).collect();
        assert_eq!(picks, vec![pool[0], pool[1], pool[2], pool[0], pool[1], pool[2]]);
    }
}
