//! The synchronous attention router: an 8-phase scoring pipeline that turns
//! a prompt plus historical state into a tiered file selection and an
//! assembled context blob, under a character budget.
//!
//! Phase order per turn: decay → keyword activation → learned boost →
//! co-activation spread → pinned floor → demoted penalty → predictive
//! pre-warm → cache-stability sort and budget enforcement.  The router is
//! the only component that mutates [`focal_state::AttentionState`], and only
//! within a turn.

pub mod assemble;
pub mod router;
pub mod sources;

pub use router::{RouteStats, Router, RoutingResult};
pub use sources::{Indexer, RepoMap};
