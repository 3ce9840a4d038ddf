//! An in-process overlay of composition peers.
//!
//! [`LocalNetwork`] stands in for the broadcast and dissemination layers:
//!
//! - every peer gets an unbounded tokio channel and a receive task; frames
//!   travel through the binary codec exactly as they would on the wire;
//! - hop distances come from a breadth-first search over a static set of
//!   links;
//! - parameter holders are kept in one shared registry, which models a
//!   dissemination table that has fully converged.
//!
//! A route horizon limits the peers each peer "knows a route to", so the
//! relay path through collision peers can be exercised.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use svcompose::{Parameter, PeerId, Taxonomy};
use svcompose_wire::{decode, encode, Message};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::collaborators::{Dissemination, Route, Transport};
use crate::config::NodeConfig;
use crate::listener::{CompositionListener, LoggingListener};
use crate::peer::CompositionPeer;
use crate::sweeper::Sweeper;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Hop distance between every pair of connected peers.
fn all_distances(
    peers: &BTreeSet<PeerId>,
    links: &BTreeSet<(PeerId, PeerId)>,
) -> BTreeMap<(PeerId, PeerId), u32> {
    let mut adjacency: BTreeMap<&PeerId, BTreeSet<&PeerId>> = BTreeMap::new();
    for (a, b) in links {
        adjacency.entry(a).or_default().insert(b);
        adjacency.entry(b).or_default().insert(a);
    }
    let mut distances = BTreeMap::new();
    for start in peers {
        let mut seen: BTreeMap<&PeerId, u32> = BTreeMap::new();
        let mut queue = VecDeque::new();
        seen.insert(start, 0);
        queue.push_back(start);
        while let Some(current) = queue.pop_front() {
            let d = seen[current];
            for next in adjacency.get(current).into_iter().flatten() {
                if !seen.contains_key(next) {
                    seen.insert(next, d + 1);
                    queue.push_back(next);
                }
            }
        }
        for (peer, d) in seen {
            distances.insert((start.clone(), peer.clone()), d);
        }
    }
    distances
}

struct Shared {
    distances: BTreeMap<(PeerId, PeerId), u32>,
    route_horizon: Option<u32>,
    holders: Mutex<BTreeMap<Parameter, BTreeSet<PeerId>>>,
    inboxes: Mutex<BTreeMap<PeerId, mpsc::UnboundedSender<Vec<u8>>>>,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl Shared {
    fn holders(&self) -> MutexGuard<'_, BTreeMap<Parameter, BTreeSet<PeerId>>> {
        self.holders.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn inboxes(&self) -> MutexGuard<'_, BTreeMap<PeerId, mpsc::UnboundedSender<Vec<u8>>>> {
        self.inboxes.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn distance(&self, from: &PeerId, to: &PeerId) -> Option<u32> {
        if !self.inboxes().contains_key(to) {
            return None;
        }
        self.distances.get(&(from.clone(), to.clone())).copied()
    }

    fn delivered(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

// ---------------------------------------------------------------------------
// PeerLink
// ---------------------------------------------------------------------------

/// One peer's view of the network: its transport and dissemination table.
struct PeerLink {
    peer: PeerId,
    shared: Arc<Shared>,
}

impl Transport for PeerLink {
    fn send(&self, to: &PeerId, message: Message) {
        let frame = match encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("network: cannot encode {}: {e}", message.message_type());
                return;
            }
        };
        trace!("network: {} -> {to} {}", self.peer, message.message_type());
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        let sent = self
            .shared
            .inboxes()
            .get(to)
            .map(|inbox| inbox.send(frame).is_ok())
            .unwrap_or(false);
        if !sent {
            warn!("network: {to} is gone, dropping {}", message.message_type());
            self.shared.delivered();
        }
    }
}

impl Dissemination for PeerLink {
    fn distance(&self, parameter: &Parameter, neighbor: &PeerId) -> Option<u32> {
        let holders = self.shared.holders().get(parameter).cloned().unwrap_or_default();
        holders
            .iter()
            .filter_map(|h| self.shared.distance(neighbor, h))
            .min()
    }

    fn estimated_distance(&self, parameter: &Parameter) -> Option<u32> {
        self.distance(parameter, &self.peer)
    }

    fn route(&self, peer: &PeerId) -> Option<Route> {
        let distance = self.shared.distance(&self.peer, peer)?;
        match self.shared.route_horizon {
            Some(horizon) if distance > horizon => None,
            _ => Some(Route { distance }),
        }
    }

    fn known_parameters(&self) -> BTreeSet<Parameter> {
        self.shared.holders().keys().cloned().collect()
    }

    fn holders(&self, parameter: &Parameter) -> BTreeSet<PeerId> {
        self.shared.holders().get(parameter).cloned().unwrap_or_default()
    }

    fn publish(&self, added: &BTreeSet<Parameter>, removed: &BTreeSet<Parameter>) {
        let mut holders = self.shared.holders();
        for p in added {
            holders.entry(p.clone()).or_default().insert(self.peer.clone());
        }
        for p in removed {
            if let Some(set) = holders.get_mut(p) {
                set.remove(&self.peer);
                if set.is_empty() {
                    holders.remove(p);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct NetworkBuilder {
    taxonomy: Arc<dyn Taxonomy>,
    peers: Vec<NodeConfig>,
    links: BTreeSet<(PeerId, PeerId)>,
    route_horizon: Option<u32>,
    listener: Arc<dyn CompositionListener>,
    sweep: bool,
}

impl NetworkBuilder {
    pub fn peer(mut self, config: NodeConfig) -> Self {
        self.peers.push(config);
        self
    }

    pub fn link(mut self, a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (PeerId::new(a), PeerId::new(b));
        if a != b {
            self.links.insert((a.clone().min(b.clone()), a.max(b)));
        }
        self
    }

    /// Only peers at most `hops` away count as directly routable.
    pub fn route_horizon(mut self, hops: u32) -> Self {
        self.route_horizon = Some(hops);
        self
    }

    /// Listener shared by every peer. Defaults to [`LoggingListener`].
    pub fn listener(mut self, listener: Arc<dyn CompositionListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Whether to run an expiration sweeper per peer (on by default).
    pub fn sweep(mut self, enabled: bool) -> Self {
        self.sweep = enabled;
        self
    }

    /// Create the peers and spawn their tasks. Must be called inside a
    /// tokio runtime.
    pub fn build(self) -> LocalNetwork {
        let ids: BTreeSet<PeerId> = self.peers.iter().map(|c| c.peer_id.clone()).collect();
        let shared = Arc::new(Shared {
            distances: all_distances(&ids, &self.links),
            route_horizon: self.route_horizon,
            holders: Mutex::new(BTreeMap::new()),
            inboxes: Mutex::new(BTreeMap::new()),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        });

        let mut network = LocalNetwork {
            peers: BTreeMap::new(),
            shared,
            tasks: BTreeMap::new(),
            sweepers: BTreeMap::new(),
        };
        for config in self.peers {
            let id = config.peer_id.clone();
            let interval = config.sweep_interval;
            let link = Arc::new(PeerLink {
                peer: id.clone(),
                shared: Arc::clone(&network.shared),
            });
            let peer = Arc::new(CompositionPeer::new(
                config,
                Arc::clone(&self.taxonomy),
                link.clone(),
                link,
                Arc::clone(&self.listener),
            ));

            let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
            network.shared.inboxes().insert(id.clone(), tx);
            let alive = Arc::new(AtomicBool::new(true));
            let receiver = Arc::clone(&peer);
            let shared = Arc::clone(&network.shared);
            let running = Arc::clone(&alive);
            let task = tokio::spawn(async move {
                // Frames queued before removal are drained without being
                // handled so the in-flight count stays exact.
                while let Some(frame) = rx.recv().await {
                    if !running.load(Ordering::SeqCst) {
                        shared.delivered();
                        continue;
                    }
                    match decode(&frame) {
                        Ok(message) => receiver.handle(message),
                        Err(e) => warn!("network: {} received a bad frame: {e}", receiver.peer_id()),
                    }
                    shared.delivered();
                }
            });

            if self.sweep {
                network.sweepers.insert(id.clone(), Sweeper::spawn(Arc::clone(&peer), interval));
            }
            network.tasks.insert(id.clone(), (task, alive));
            network.peers.insert(id, peer);
        }
        debug!("network: {} peers, {} links", network.peers.len(), self.links.len());
        network
    }
}

// ---------------------------------------------------------------------------
// LocalNetwork
// ---------------------------------------------------------------------------

pub struct LocalNetwork {
    peers: BTreeMap<PeerId, Arc<CompositionPeer>>,
    shared: Arc<Shared>,
    tasks: BTreeMap<PeerId, (JoinHandle<()>, Arc<AtomicBool>)>,
    sweepers: BTreeMap<PeerId, Sweeper>,
}

impl LocalNetwork {
    pub fn builder(taxonomy: Arc<dyn Taxonomy>) -> NetworkBuilder {
        NetworkBuilder {
            taxonomy,
            peers: Vec::new(),
            links: BTreeSet::new(),
            route_horizon: None,
            listener: Arc::new(LoggingListener),
            sweep: true,
        }
    }

    pub fn peer(&self, id: &str) -> Option<&Arc<CompositionPeer>> {
        self.peers.get(&PeerId::from(id))
    }

    pub fn peers(&self) -> impl Iterator<Item = &Arc<CompositionPeer>> {
        self.peers.values()
    }

    /// Hop distance between two live peers.
    pub fn distance(&self, a: &str, b: &str) -> Option<u32> {
        self.shared.distance(&PeerId::from(a), &PeerId::from(b))
    }

    /// Wait until no message is queued or being handled. Returns `false` if
    /// the network was still busy after `timeout`.
    pub async fn settle(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let idle = self.shared.idle.notified();
                if self.shared.in_flight.load(Ordering::SeqCst) == 0 {
                    return;
                }
                idle.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Take a peer out of the overlay. Its parameters are withdrawn and
    /// every other peer forgets what it could only reach through it.
    pub async fn remove_peer(&mut self, id: &str) {
        let id = PeerId::from(id);
        if self.peers.remove(&id).is_none() {
            return;
        }
        if let Some(sweeper) = self.sweepers.remove(&id) {
            sweeper.stop().await;
        }
        if let Some((_, alive)) = self.tasks.get(&id) {
            alive.store(false, Ordering::SeqCst);
        }
        self.shared.inboxes().remove(&id);
        {
            let mut holders = self.shared.holders();
            for set in holders.values_mut() {
                set.remove(&id);
            }
            holders.retain(|_, set| !set.is_empty());
        }
        let lost: BTreeSet<PeerId> = [id.clone()].into_iter().collect();
        for peer in self.peers.values() {
            peer.lost_destinations(&lost);
        }
        debug!("network: {id} removed");
    }

    /// Stop every sweeper and receive task.
    pub async fn shutdown(self) {
        for sweeper in self.sweepers.into_values() {
            sweeper.stop().await;
        }
        for (task, _) in self.tasks.into_values() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNetwork")
            .field("peers", &self.peers.keys().collect::<Vec<_>>())
            .field("in_flight", &self.shared.in_flight.load(Ordering::SeqCst))
            .finish()
    }
}
