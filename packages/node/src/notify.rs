//! Hop-by-hop delivery of messages that follow a path of services.
//!
//! The head of the path is the service currently holding the message and
//! the tail is its destination. Each peer either takes a known shortcut to
//! the destination peer, when the dissemination layer knows a route no
//! longer than what is left of the path, or passes the message to the next
//! service.

use std::collections::BTreeSet;

use svcompose::{PeerId, Service};
use svcompose_wire::{CompositionModificationMessage, CompositionNotificationMessage, Message, PathMessage};
use tracing::{debug, trace, warn};

use crate::peer::CompositionPeer;

/// A path message this peer can relay.
pub trait PathNotification: PathMessage + Into<Message> {
    /// Mark the message as last sent by `peer`.
    fn relayed_by(&mut self, peer: PeerId);
}

impl PathNotification for CompositionNotificationMessage {
    fn relayed_by(&mut self, peer: PeerId) {
        self.source = peer;
    }
}

impl PathNotification for CompositionModificationMessage {
    fn relayed_by(&mut self, peer: PeerId) {
        self.source = peer;
    }
}

/// Peer changes along `path`, i.e. the hops a message following it takes.
fn peer_hops(path: &[Service]) -> u32 {
    let hops = path.windows(2).filter(|w| w[0].peer != w[1].peer).count();
    u32::try_from(hops).unwrap_or(u32::MAX)
}

impl CompositionPeer {
    /// Move `message` along its path. Returns it when its destination is
    /// hosted here; otherwise it has been sent on and `None` is returned.
    pub(crate) fn route_along_path<M: PathNotification>(&self, mut message: M) -> Option<M> {
        loop {
            let path = message.path().to_vec();
            let Some(destination) = path.last().cloned() else {
                warn!("notify: dropping a message with an empty path");
                return None;
            };
            if destination.peer == *self.peer_id() {
                message.set_path(vec![destination]);
                return Some(message);
            }

            if let Some(route) = self.dissemination.route(&destination.peer) {
                if route.distance <= peer_hops(&path) {
                    debug!("notify: shortcut to {} ({} hops)", destination.peer, route.distance);
                    message.set_path(vec![destination.clone()]);
                    message.relayed_by(self.peer_id().clone());
                    self.transport.send(&destination.peer, message.into());
                    return None;
                }
            }

            let next = match path.get(1) {
                Some(next) => next.clone(),
                None => destination,
            };
            if path.len() > 1 {
                message.set_path(path[1..].to_vec());
            }
            if next.peer == *self.peer_id() {
                continue;
            }
            trace!("notify: passing to {next}");
            message.relayed_by(self.peer_id().clone());
            let destinations: BTreeSet<Service> = [next].into_iter().collect();
            self.dispatch(vec![(message.into(), destinations)]);
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use svcompose::{Parameter, SearchId};

    use crate::collaborators::{Dissemination, Route};
    use crate::config::NodeConfig;
    use crate::listener::RecordingListener;
    use crate::peer::tests::{taxonomy, Loopback};

    use super::*;

    /// Knows a direct route to every peer at a fixed distance.
    struct Routes(u32);

    impl Dissemination for Routes {
        fn distance(&self, _: &Parameter, _: &PeerId) -> Option<u32> {
            None
        }
        fn estimated_distance(&self, _: &Parameter) -> Option<u32> {
            None
        }
        fn route(&self, _: &PeerId) -> Option<Route> {
            Some(Route { distance: self.0 })
        }
        fn known_parameters(&self) -> BTreeSet<Parameter> {
            BTreeSet::new()
        }
        fn holders(&self, _: &Parameter) -> BTreeSet<PeerId> {
            BTreeSet::new()
        }
        fn publish(&self, _: &BTreeSet<Parameter>, _: &BTreeSet<Parameter>) {}
    }

    fn peer(distance: u32) -> (CompositionPeer, Arc<Loopback>) {
        let transport = Arc::new(Loopback::default());
        let peer = CompositionPeer::new(
            NodeConfig::for_peer("p1"),
            taxonomy(),
            transport.clone(),
            Arc::new(Routes(distance)),
            Arc::new(RecordingListener::new()),
        );
        (peer, transport)
    }

    fn svc(name: &str, peer: &str) -> Service {
        Service::new(name, PeerId::from(peer))
    }

    fn modification(path: Vec<Service>) -> CompositionModificationMessage {
        CompositionModificationMessage::new(
            PeerId::from("p1"),
            SearchId::new(PeerId::from("p4"), 1),
            path,
            BTreeSet::new(),
        )
    }

    #[test]
    fn hops_count_peer_changes_only() {
        let path = [svc("A", "p1"), svc("B", "p1"), svc("C", "p2"), svc("D", "p3")];
        assert_eq!(peer_hops(&path), 2);
    }

    #[test]
    fn local_destinations_arrive_immediately() {
        let (peer, transport) = peer(1);
        let arrived = peer.route_along_path(modification(vec![svc("A", "p1"), svc("INIT", "p1")]));
        assert_eq!(arrived.map(|m| m.path), Some(vec![svc("INIT", "p1")]));
        assert!(transport.pop().is_none());
    }

    #[test]
    fn short_routes_jump_to_the_destination() {
        let (peer, transport) = peer(1);
        let path = vec![svc("A", "p1"), svc("B", "p2"), svc("C", "p3"), svc("G", "p4")];
        assert!(peer.route_along_path(modification(path)).is_none());

        let (to, message) = transport.pop().unwrap();
        assert_eq!(to, PeerId::from("p4"));
        match message {
            Message::CompositionModification(m) => assert_eq!(m.path, vec![svc("G", "p4")]),
            other => panic!("unexpected {}", other.message_type()),
        }
    }

    #[test]
    fn long_routes_follow_the_path() {
        let (peer, transport) = peer(5);
        let path = vec![svc("A", "p1"), svc("A2", "p1"), svc("B", "p2"), svc("G", "p4")];
        assert!(peer.route_along_path(modification(path)).is_none());

        let (to, message) = transport.pop().unwrap();
        assert_eq!(to, PeerId::from("p2"));
        match message {
            Message::CompositionModification(m) => {
                assert_eq!(m.path, vec![svc("B", "p2"), svc("G", "p4")]);
            }
            other => panic!("unexpected {}", other.message_type()),
        }
    }
}
