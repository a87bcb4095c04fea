//! Reconnection scheduling with exponential backoff
//!
//! The scheduler does not connect by itself. It arms a timer and, when the
//! timer fires, delivers the timer's generation on a channel. The owner
//! passes it back through [`ReconnectScheduler::fire`], which rejects stale
//! generations, and then performs the actual connect.

use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub base: Duration,
    /// Upper bound on any delay
    pub max: Duration,
    /// Relative jitter; 0.2 draws a factor from `[0.8, 1.2)`
    pub jitter: f64,
    /// The backoff doubles at most this many times
    pub max_exponent: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(10),
            jitter: 0.2,
            max_exponent: 6,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (0-based).
    /// Out-of-range `jitter` is clamped to `[0, 1]`, NaN counts as none.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exp = 1u32 << attempt.min(self.max_exponent).min(31);
        let raw = self.base.saturating_mul(exp);
        let jitter = if self.jitter.is_nan() {
            0.0
        } else {
            self.jitter.clamp(0.0, 1.0)
        };
        let factor = if jitter > 0.0 {
            rng.gen_range((1.0 - jitter)..(1.0 + jitter))
        } else {
            1.0
        };
        Duration::try_from_secs_f64(raw.as_secs_f64() * factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Client connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Reconnect state machine with generation-checked timers
#[derive(Debug)]
pub struct ReconnectScheduler {
    config: ReconnectConfig,
    state: ConnectionState,
    attempt: u32,
    generation: u64,
    auto_reconnect: bool,
    pending: Option<JoinHandle<()>>,
    fire_tx: mpsc::UnboundedSender<u64>,
}

impl ReconnectScheduler {
    /// Timers deliver their generation on `fire_tx`
    pub fn new(config: ReconnectConfig, fire_tx: mpsc::UnboundedSender<u64>) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            attempt: 0,
            generation: 0,
            auto_reconnect: true,
            pending: None,
            fire_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    pub fn is_scheduled(&self) -> bool {
        self.pending.is_some()
    }

    /// Arm a retry timer. Returns the delay, or `None` when connected,
    /// connecting, already scheduled, or auto-reconnect is off.
    pub fn schedule(&mut self) -> Option<Duration> {
        if self.state != ConnectionState::Disconnected
            || self.pending.is_some()
            || !self.auto_reconnect
        {
            return None;
        }

        let delay = self.config.delay_for(self.attempt, &mut rand::thread_rng());
        self.attempt = self.attempt.saturating_add(1);
        self.generation += 1;
        let gen = self.generation;
        let tx = self.fire_tx.clone();

        info!(attempt = self.attempt, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(gen);
        }));
        Some(delay)
    }

    /// A timer fired. Returns true if the owner should connect now.
    pub fn fire(&mut self, gen: u64) -> bool {
        if gen != self.generation {
            debug!(gen, current = self.generation, "Stale reconnect timer");
            return false;
        }
        self.pending = None;
        if !self.auto_reconnect || self.state != ConnectionState::Disconnected {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// Explicit connect: re-enables auto-reconnect and moves to `Connecting`.
    pub fn begin_connect(&mut self) {
        self.cancel();
        self.auto_reconnect = true;
        self.attempt = 0;
        self.state = ConnectionState::Connecting;
    }

    pub fn on_connected(&mut self) {
        self.cancel();
        self.state = ConnectionState::Connected;
        self.attempt = 0;
    }

    /// Connection closed or connect failed
    pub fn on_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Explicit disconnect: disables auto-reconnect until the next explicit connect.
    pub fn disconnect(&mut self) {
        self.cancel();
        self.auto_reconnect = false;
        self.state = ConnectionState::Disconnected;
    }

    /// Abort the pending timer, if any, and invalidate its generation.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
        self.generation += 1;
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.base, Duration::from_millis(500));
        assert_eq!(config.max, Duration::from_secs(10));
        assert_eq!(config.max_exponent, 6);
    }

    #[test]
    fn test_delay_without_jitter() {
        let config = ReconnectConfig {
            jitter: 0.0,
            ..ReconnectConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let delays: Vec<u64> = (0..8)
            .map(|a| config.delay_for(a, &mut rng).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 10000, 10000, 10000]);
    }

    #[test]
    fn test_delay_jitter_bounds() {
        let config = ReconnectConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..4 {
            let raw = 500.0 * f64::from(1u32 << attempt);
            for _ in 0..100 {
                let ms = config.delay_for(attempt, &mut rng).as_secs_f64() * 1000.0;
                assert!(ms >= raw * 0.8 - 1e-6 && ms < raw * 1.2 + 1e-6, "attempt {} ms {}", attempt, ms);
            }
        }
    }

    #[test]
    fn test_delays_non_decreasing_and_capped() {
        let config = ReconnectConfig::default();
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let delays: Vec<Duration> = (0..12).map(|a| config.delay_for(a, &mut rng)).collect();
            for pair in delays.windows(2) {
                assert!(pair[0] <= pair[1], "seed {} {:?}", seed, delays);
            }
            assert!(delays.iter().all(|d| *d <= config.max));
        }
    }

    #[test]
    fn test_exponent_capped() {
        let config = ReconnectConfig {
            max: Duration::from_secs(3600),
            jitter: 0.0,
            ..ReconnectConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(config.delay_for(6, &mut rng), Duration::from_millis(32_000));
        assert_eq!(config.delay_for(40, &mut rng), Duration::from_millis(32_000));
    }

    #[test]
    fn test_extreme_config_clamped() {
        let mut rng = StdRng::seed_from_u64(3);
        let wide = ReconnectConfig {
            max_exponent: 40,
            ..ReconnectConfig::default()
        };
        assert!(wide.delay_for(40, &mut rng) <= wide.max);

        let huge = ReconnectConfig {
            base: Duration::MAX,
            max: Duration::from_secs(3600),
            jitter: 0.5,
            max_exponent: 64,
        };
        for attempt in [0, 31, 32, u32::MAX] {
            assert_eq!(huge.delay_for(attempt, &mut rng), huge.max);
        }

        for jitter in [5.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = ReconnectConfig { jitter, ..ReconnectConfig::default() };
            for attempt in 0..10 {
                let delay = config.delay_for(attempt, &mut rng);
                assert!(delay <= config.max, "jitter {} delay {:?}", jitter, delay);
            }
        }

        let none = ReconnectConfig { jitter: f64::NAN, ..ReconnectConfig::default() };
        assert_eq!(none.delay_for(0, &mut rng), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_with_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sched = ReconnectScheduler::new(ReconnectConfig::default(), tx);

        let delay = sched.schedule().unwrap();
        assert!(sched.is_scheduled());
        assert_eq!(sched.attempt(), 1);
        assert!(delay >= Duration::from_millis(400) && delay < Duration::from_millis(600));

        let gen = rx.recv().await.unwrap();
        assert_eq!(gen, sched.generation());
        assert!(sched.fire(gen));
        assert_eq!(sched.state(), ConnectionState::Connecting);
        assert!(!sched.is_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_noop_conditions() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut sched = ReconnectScheduler::new(ReconnectConfig::default(), tx);

        assert!(sched.schedule().is_some());
        // already scheduled
        assert!(sched.schedule().is_none());

        sched.on_connected();
        assert!(sched.schedule().is_none());

        sched.disconnect();
        assert!(!sched.auto_reconnect());
        assert!(sched.schedule().is_none());

        sched.begin_connect();
        assert!(sched.schedule().is_none());
        sched.on_disconnected();
        assert!(sched.schedule().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sched = ReconnectScheduler::new(ReconnectConfig::default(), tx);

        sched.schedule().unwrap();
        let stale = sched.generation();
        sched.cancel();
        assert!(!sched.is_scheduled());
        assert!(!sched.fire(stale));

        sched.schedule().unwrap();
        let gen = rx.recv().await.unwrap();
        assert_ne!(gen, stale);
        assert!(sched.fire(gen));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_aborts_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sched = ReconnectScheduler::new(ReconnectConfig::default(), tx);

        sched.schedule().unwrap();
        sched.disconnect();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(sched.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_resets_on_success() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sched = ReconnectScheduler::new(ReconnectConfig::default(), tx);

        for _ in 0..3 {
            sched.schedule().unwrap();
            let gen = rx.recv().await.unwrap();
            assert!(sched.fire(gen));
            sched.on_disconnected();
        }
        assert_eq!(sched.attempt(), 3);

        sched.schedule().unwrap();
        let gen = rx.recv().await.unwrap();
        assert!(sched.fire(gen));
        sched.on_connected();
        assert_eq!(sched.attempt(), 0);
        assert_eq!(sched.state(), ConnectionState::Connected);
    }
}
