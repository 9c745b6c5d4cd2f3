//! The offline feedback learner.
//!
//! After every turn the learner observes which files were injected into
//! context and which the assistant actually used, and folds that into three
//! models the router consults on the next turn:
//!
//! * prompt-token → file **associations**, IDF-weighted so ubiquitous tokens
//!   carry no signal;
//! * an undirected **co-activation graph** of files that tend to be used
//!   together;
//! * per-file **rhythms** — the EWMA of the gap between activations.
//!
//! Influence is maturity-gated: below 25 observed turns the learner records
//! everything but answers every query with nothing.

pub mod coactivation;
pub mod learner;
pub mod rhythm;

pub use coactivation::CoactivationGraph;
pub use learner::{Learner, Maturity, LEARNED_VERSION, MATURITY_TURNS};
pub use rhythm::Rhythm;
