//! Derived-state rules for message writes and user removal, and reply-tree
//! assembly.
//!
//! Every function here is stateless and runs against the caller's
//! transaction; the caller decides when to commit.

pub mod cascade;
pub mod change_detector;
pub mod dispatcher;
pub mod steps;
pub mod thread;

pub use cascade::{CascadeReport, on_user_removed};
pub use change_detector::{Classification, classify};
pub use dispatcher::{DispatchOutcome, SkipReason, on_write};
pub use steps::{StepLog, check_cancelled};
pub use thread::{ThreadNode, assemble_thread, fetch_thread};
