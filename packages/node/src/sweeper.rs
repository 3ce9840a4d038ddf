//! Periodic expiration of searches and table entries.
//!
//! One task per peer ticks at the configured interval and calls
//! [`CompositionPeer::sweep`]. An entry outlives its deadline by at most one
//! interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::peer::CompositionPeer;

pub struct Sweeper {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Start sweeping `peer` every `period`.
    pub fn spawn(peer: Arc<CompositionPeer>, period: Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!("sweeper: {} every {period:?}", peer.peer_id());
            loop {
                tokio::select! {
                    _ = ticker.tick() => peer.sweep(Instant::now()),
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("sweeper: {} stopped", peer.peer_id());
        });
        Self { stop, handle }
    }

    /// Signal the task and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchMode;
    use crate::peer::tests::{drain, isolated};
    use crate::tables::SearchStatus;
    use svcompose::{PeerId, Service};

    #[tokio::test(start_paused = true)]
    async fn searches_expire_within_one_period() {
        let (peer, transport, listener) = isolated(SearchMode::Forward);
        let peer = Arc::new(peer);
        let target = Service::new("T", PeerId::from("p1")).with_inputs(["A"]).with_outputs(["B"]);
        let search = peer.start_composition(&target).unwrap();
        drain(&peer, &transport);

        let period = Duration::from_millis(100);
        let sweeper = Sweeper::spawn(Arc::clone(&peer), period);
        let deadline = peer.config().search_expiration;

        tokio::time::sleep(deadline - period).await;
        assert_eq!(peer.search_status(&search), SearchStatus::Running);

        tokio::time::sleep(period * 2).await;
        assert_eq!(peer.search_status(&search), SearchStatus::Unknown);
        assert!(listener.expired(&search));

        sweeper.stop().await;
    }
}
