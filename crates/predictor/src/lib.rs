//! The pre-warm predictor.
//!
//! Where the learner answers "which files does this *token* pull in", the
//! predictor answers "which files is the assistant about to need" — from
//! explicit file-name mentions, sharply-discriminating keywords, and a
//! Markov transition table over recently-hot files.  When none of those
//! produce evidence it falls back to a recency/co-occurrence/popularity
//! blend with a hard confidence cap, so a guess can never promote a file to
//! Hot on its own.

pub mod model;
pub mod predict;

pub use model::{MODEL_VERSION, PredictorModel};
pub use predict::{Mode, Prediction};
