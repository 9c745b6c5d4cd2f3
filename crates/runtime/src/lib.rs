//! Session orchestration: the glue between the hook protocol and the
//! router/learner/predictor/plugin subsystems.
//!
//! Each hook event arrives in its own short-lived process.  The
//! latency-critical path is `user_prompt_submit` (advisories + routing,
//! nothing else); all learning happens on `stop`, after the host already has
//! its answer.  Cross-process state hand-off goes through the files in the
//! project's state directory, serialized by an advisory lock.

pub mod protocol;
pub mod session;

pub use protocol::{HookEvent, HookOutput};
pub use session::Session;
