//! Port-guessing discovery.
//!
//! Siblings are found by dialing the ports their app ids hash to, plus any
//! statically configured ports. Unreachable ports back off exponentially;
//! ports that answered but cannot sync with us wait the maximum delay.

use crate::config::NodeConfig;
use crate::port::preferred_port;
use crate::replicator::{stopped, SyncCore};
use loopsync_engine::AppId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};

/// A port worth dialing, with the app expected behind it if known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub port: u16,
    pub app_id: Option<AppId>,
}

/// Ports to probe for a domain, excluding our own.
pub(crate) fn candidates(config: &NodeConfig, base_port: u16, own_port: u16) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = Vec::new();
    let mut push = |port: u16, app_id: Option<&AppId>| {
        if port != own_port && port != 0 && !out.iter().any(|c| c.port == port) {
            out.push(Candidate {
                port,
                app_id: app_id.cloned(),
            });
        }
    };

    for app_id in config.known_apps.iter().filter(|a| **a != config.app_id) {
        let preferred = preferred_port(app_id, base_port);
        for depth in 0..=config.probe_depth {
            if let Some(port) = preferred.checked_add(depth) {
                push(port, Some(app_id));
            }
        }
    }
    for &port in &config.static_ports {
        push(port, None);
    }
    out
}

/// Per-port failure bookkeeping.
#[derive(Debug, Default)]
pub(crate) struct Backoff {
    ports: HashMap<u16, (u32, Instant)>,
}

impl Backoff {
    pub(crate) fn is_due(&self, port: u16, now: Instant) -> bool {
        self.ports.get(&port).map_or(true, |(_, next)| now >= *next)
    }

    pub(crate) fn fail(&mut self, port: u16, delay: impl FnOnce(u32) -> Duration, now: Instant) {
        let failures = self.ports.get(&port).map_or(0, |(f, _)| *f).saturating_add(1);
        self.ports.insert(port, (failures, now + delay(failures)));
    }

    pub(crate) fn reset(&mut self, port: u16) {
        self.ports.remove(&port);
    }
}

/// Probe candidates every `interval` until the manager stops.
pub(crate) async fn run(core: Arc<SyncCore>, interval: Duration, base_port: u16, own_port: u16) {
    let mut shutdown = core.shutdown_signal();
    let candidates = candidates(&core.config, base_port, own_port);
    if candidates.is_empty() {
        tracing::debug!(own_port, "nothing to discover");
        return;
    }
    tracing::debug!(own_port, candidates = candidates.len(), "discovery started");

    let mut backoff = Backoff::default();
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            _ = ticker.tick() => {
                tokio::select! {
                    _ = stopped(&mut shutdown) => break,
                    _ = probe_round(&core, &candidates, &mut backoff) => {}
                }
            }
        }
    }
    tracing::debug!(own_port, "discovery stopped");
}

async fn probe_round(core: &Arc<SyncCore>, candidates: &[Candidate], backoff: &mut Backoff) {
    for candidate in candidates {
        let port = candidate.port;
        let known = candidate
            .app_id
            .as_deref()
            .is_some_and(|app_id| core.peers.is_connected(app_id));
        if known || core.peers.has_dialed(port) || !backoff.is_due(port, Instant::now()) {
            continue;
        }

        match core.dial(core.config.host, port).await {
            Ok(peer) => {
                tracing::debug!(port, peer = %peer.app_id, "discovered peer");
                backoff.reset(port);
            }
            Err(e) => {
                let retry = &core.config.retry;
                let permanent = !e.is_transient();
                tracing::trace!(port, error = %e, permanent, "probe failed");
                backoff.fail(
                    port,
                    |failures| {
                        if permanent {
                            retry.max_delay
                        } else {
                            retry.delay_for_attempt(failures)
                        }
                    },
                    Instant::now(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_cover_known_apps_and_static_ports() {
        let config = NodeConfig::new("abc", "ABC", "1")
            .with_known_apps(["abc", "", "a"])
            .with_static_ports([9000, 8988])
            .with_probe_depth(1);
        // preferred("a", 8890) = 8987, preferred("", 8890) = 8890
        let ports: Vec<u16> = candidates(&config, 8890, 8891)
            .into_iter()
            .map(|c| c.port)
            .collect();
        assert_eq!(ports, vec![8890, 8987, 8988, 9000]);
    }

    #[test]
    fn candidates_remember_app_ids() {
        let config = NodeConfig::new("x", "X", "1")
            .with_known_apps(["abc"])
            .with_probe_depth(0);
        assert_eq!(
            candidates(&config, 8890, 1),
            vec![Candidate {
                port: 8944,
                app_id: Some("abc".into())
            }]
        );
    }

    #[test]
    fn backoff_grows_and_resets() {
        let now = Instant::now();
        let mut backoff = Backoff::default();
        let delay = |failures: u32| Duration::from_secs(u64::from(failures));

        assert!(backoff.is_due(9000, now));
        backoff.fail(9000, delay, now);
        assert!(!backoff.is_due(9000, now));
        assert!(backoff.is_due(9000, now + Duration::from_secs(1)));

        backoff.fail(9000, delay, now);
        assert!(!backoff.is_due(9000, now + Duration::from_secs(1)));
        assert!(backoff.is_due(9000, now + Duration::from_secs(2)));

        backoff.reset(9000);
        assert!(backoff.is_due(9000, now));
    }
}
