//! Shared server state wiring.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use browser_host::BrowserHost;
use intercept_engine::InterceptionEngine;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stealth::StealthInjector;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

pub struct AppState {
    pub host: Arc<BrowserHost>,
    pub engine: Arc<InterceptionEngine>,
    pub stealth: Arc<StealthInjector>,
    pub advanced_tools: AtomicBool,
    /// Stealth seed for the current connection; 0 means "not drawn yet".
    seed: Arc<AtomicU32>,
    /// Ticks consumed by input pacing; resets with the connection.
    pace: Arc<AtomicU64>,
    /// One tool invocation in flight at a time, from the agent's view.
    pub tool_gate: tokio::sync::Mutex<()>,
}

impl AppState {
    pub fn new(port: u16) -> Arc<Self> {
        let host = BrowserHost::new(port);
        let engine = Arc::new(InterceptionEngine::new());
        let stealth = Arc::new(StealthInjector::new());
        let seed = Arc::new(AtomicU32::new(0));
        let pace = Arc::new(AtomicU64::new(0));

        // The engine decides when a persistent session's life ends; the
        // session manager does the closing.
        {
            let sessions = host.sessions();
            engine.set_release_hook(Box::new(move |target_id, purpose| {
                sessions.close_persistent(target_id, purpose);
            }));
        }

        // Instance teardown clears every downstream table in one step.
        {
            let engine = engine.clone();
            let stealth = stealth.clone();
            let seed = seed.clone();
            let pace = pace.clone();
            host.on_teardown(Box::new(move || {
                engine.clear_all();
                stealth.clear();
                seed.store(0, Ordering::Relaxed);
                pace.store(0, Ordering::Relaxed);
            }));
        }

        let state = Arc::new(Self {
            host,
            engine,
            stealth,
            advanced_tools: AtomicBool::new(false),
            seed,
            pace,
            tool_gate: tokio::sync::Mutex::new(()),
        });

        state.clone().spawn_stealth_follower();
        state
    }

    /// Stealth seed for the current browser connection, drawn on first use.
    pub fn connection_seed(&self) -> u32 {
        let current = self.seed.load(Ordering::Relaxed);
        if current != 0 {
            return current;
        }
        let mut drawn = StealthInjector::draw_seed();
        while drawn == 0 {
            drawn = StealthInjector::draw_seed();
        }
        match self
            .seed
            .compare_exchange(0, drawn, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => drawn,
            Err(existing) => existing,
        }
    }

    pub fn advanced_enabled(&self) -> bool {
        self.advanced_tools.load(Ordering::Relaxed)
    }

    /// Next human-pace delay for synthetic input. The nth delay of a
    /// connection is a pure function of the connection seed and n, so
    /// replaying a connection seed reproduces the same pacing.
    pub fn next_pace_delay(&self, min_ms: u64, max_ms: u64) -> u64 {
        let tick = self.pace.fetch_add(1, Ordering::Relaxed);
        pace_delay(self.connection_seed(), tick, min_ms, max_ms)
    }

    /// Pages that open after stealth was applied get the patch too.
    fn spawn_stealth_follower(self: Arc<Self>) {
        let mut new_pages = self.host.subscribe_new_pages();
        tokio::spawn(async move {
            loop {
                match new_pages.recv().await {
                    Ok(target_id) => {
                        if self.stealth.applied_count() == 0 {
                            continue; // stealth not in use for this connection
                        }
                        let seed = self.connection_seed();
                        match self.host.sessions().ephemeral(&target_id).await {
                            Ok(channel) => {
                                if let Err(err) =
                                    self.stealth.apply(&target_id, &channel, seed, false).await
                                {
                                    warn!(target: "stealth", %err, target_id, "late stealth install failed");
                                }
                            }
                            Err(err) => {
                                debug!(target: "stealth", %err, target_id, "no session for new page")
                            }
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
}

fn pace_delay(seed: u32, tick: u64, min_ms: u64, max_ms: u64) -> u64 {
    if min_ms >= max_ms {
        return min_ms;
    }
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    tick.hash(&mut hasher);
    let mut rng = StdRng::seed_from_u64(hasher.finish());
    rng.gen_range(min_ms..=max_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pace_delays_are_deterministic_per_seed_and_tick() {
        for tick in 0..8 {
            assert_eq!(pace_delay(7, tick, 20, 120), pace_delay(7, tick, 20, 120));
        }
        let a: Vec<u64> = (0..32).map(|t| pace_delay(7, t, 20, 120)).collect();
        let b: Vec<u64> = (0..32).map(|t| pace_delay(8, t, 20, 120)).collect();
        assert_ne!(a, b, "different seeds must pace differently");
    }

    #[test]
    fn pace_delays_stay_inside_the_requested_window() {
        for tick in 0..256 {
            let ms = pace_delay(42, tick, 30, 90);
            assert!((30..=90).contains(&ms), "delay {ms} out of range");
        }
        assert_eq!(pace_delay(42, 0, 50, 50), 50);
    }
}
