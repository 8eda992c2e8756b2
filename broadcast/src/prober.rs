use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use trace::RequestContext;
use tracing::{debug, warn};

use crate::BroadcastGroup;

/// How often the routing cache is refreshed when the caller has no opinion.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(300);

/// Background task that keeps a group's routing cache warm.
///
/// Probes once at startup and then on every tick until shut down. A probe
/// failure only logs: the next tick retries, and in the meantime requests
/// fall back to full fan-out.
#[derive(Debug)]
pub struct Prober {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl Prober {
    pub fn start(group: Arc<BroadcastGroup>, interval: Duration) -> Self {
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                let ctx = RequestContext::new();
                match group.probe_tlds(&ctx).await {
                    Ok(tlds) => {
                        debug!(
                            group = group.group_name(),
                            tlds = tlds.len(),
                            "probe refreshed routing cache"
                        );
                    }
                    Err(errors) => {
                        warn!(group = group.group_name(), %errors, "probe failed");
                    }
                }
            }
        });

        Self { shutdown, handle }
    }

    /// A handle that shuts the prober down when invoked.
    pub fn shutdown_handle(&self) -> impl Fn() {
        let shutdown = self.shutdown.clone();
        move || {
            shutdown.cancel();
        }
    }

    /// Stop probing and wait for the task to wind down.
    pub async fn join(self) {
        self.shutdown.cancel();
        // a cancelled prober never panics; a panic here is a programming
        // error worth surfacing
        self.handle.await.expect("prober task panicked");
    }
}
