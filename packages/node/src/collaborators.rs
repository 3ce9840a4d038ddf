//! Interfaces to the layers the middleware relies on but does not own:
//! message delivery and the parameter-dissemination table.

use std::collections::BTreeSet;

use svcompose::{Parameter, PeerId};
use svcompose_wire::Message;

/// Point-to-point delivery.
///
/// `send` never blocks on the network; a message addressed to the local peer
/// is delivered back to it like any other.
pub trait Transport: Send + Sync {
    fn send(&self, to: &PeerId, message: Message);
}

/// A known route to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub distance: u32,
}

/// The local view of the parameter-dissemination table.
pub trait Dissemination: Send + Sync {
    /// Distance from `neighbor` to the closest holder of `parameter`.
    fn distance(&self, parameter: &Parameter, neighbor: &PeerId) -> Option<u32>;

    /// Distance from the local peer to the closest holder of `parameter`.
    fn estimated_distance(&self, parameter: &Parameter) -> Option<u32>;

    fn route(&self, peer: &PeerId) -> Option<Route>;

    fn knows_route_to(&self, peer: &PeerId) -> bool {
        self.route(peer).is_some()
    }

    /// Every parameter published anywhere in the overlay.
    fn known_parameters(&self) -> BTreeSet<Parameter>;

    /// Peers currently publishing `parameter`.
    fn holders(&self, parameter: &Parameter) -> BTreeSet<PeerId>;

    /// Publish and withdraw parameters of the local peer.
    fn publish(&self, added: &BTreeSet<Parameter>, removed: &BTreeSet<Parameter>);
}
