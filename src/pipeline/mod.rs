//! The per-URL processing pipeline.
//!
//! A task flows through page setup, navigation with redirect protection,
//! the request-interception dispatch core, optional challenge handling,
//! settle, interactions, and reloads, then emits a [`crate::rules::UrlResult`].

pub mod challenge;
pub mod intercept;
pub mod interact;
pub mod runner;
pub mod setup;
pub mod spoof;
pub mod types;

pub use challenge::{ChallengeHandler, ChallengeKind, NoopChallengeHandler};
pub use intercept::{
    classify_request, track_document_load, try_record, RequestDecision, SkipReason,
};
pub use runner::process_url_task;
pub use types::{PipelineOptions, RedirectState, TaskEnv, TaskFailure, TaskState, UrlTask};
