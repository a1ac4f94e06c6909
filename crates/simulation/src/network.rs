//! Simulated network conditions.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Number of replicas in the group.
    pub num_replicas: usize,
    /// Base one-way message latency.
    pub latency: Duration,
    /// Fraction of `latency` used as symmetric jitter (0.0 = none).
    pub jitter_fraction: f64,
    /// Probability that any single message is dropped.
    pub loss_rate: f64,
    /// Commands per proposal batch.
    pub blk_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            num_replicas: 4,
            latency: Duration::from_millis(10),
            jitter_fraction: 0.1,
            loss_rate: 0.0,
            blk_size: 1,
        }
    }
}

/// Latency/loss model for inter-replica messages.
#[derive(Debug, Clone)]
pub struct SimulatedNetwork {
    config: NetworkConfig,
}

impl SimulatedNetwork {
    /// Create a network model from the configuration.
    pub fn new(config: NetworkConfig) -> Self {
        Self { config }
    }

    /// Delivery delay for one message, or `None` if it is dropped.
    pub fn delay(&self, rng: &mut ChaCha8Rng) -> Option<Duration> {
        if self.config.loss_rate > 0.0 && rng.gen::<f64>() < self.config.loss_rate {
            return None;
        }
        let base = self.config.latency.as_secs_f64();
        let jitter = base * self.config.jitter_fraction * (2.0 * rng.gen::<f64>() - 1.0);
        Some(Duration::from_secs_f64((base + jitter).max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_no_loss_always_delivers() {
        let network = SimulatedNetwork::new(NetworkConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..100 {
            assert!(network.delay(&mut rng).is_some());
        }
    }

    #[test]
    fn test_full_loss_drops_everything() {
        let network = SimulatedNetwork::new(NetworkConfig {
            loss_rate: 1.0,
            ..Default::default()
        });
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..100 {
            assert!(network.delay(&mut rng).is_none());
        }
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let network = SimulatedNetwork::new(NetworkConfig {
            latency: Duration::from_millis(100),
            jitter_fraction: 0.5,
            ..Default::default()
        });
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..100 {
            let delay = network.delay(&mut rng).unwrap();
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(150));
        }
    }
}
