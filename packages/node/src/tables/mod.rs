//! In-memory search tables.
//!
//! Each table guards its state with its own mutex and expires entries on
//! request of the sweeper. Lookups of absent searches never fail: they
//! answer as if the search did not exist (unknown status, zero time, not
//! covered).

pub mod backward;
pub mod forward;
pub mod local;

pub use backward::BackwardTable;
pub use forward::ForwardTable;
pub use local::{ExpiredSearch, LocalSearchesTable, SearchStatus};
