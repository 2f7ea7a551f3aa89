mod classify;
mod machine;
pub mod types;

pub use classify::{ActiveRun, ConversationSnapshot, Scenario, classify};
pub use machine::can_transition;
pub use types::{
    Checkpoint, CheckpointUpdate, Clarification, ConversationStatus, EventPayload,
    RetrievalOutput, Run, RunStatus,
};

/// UTC timestamp in a fixed-width RFC 3339 form, so stored values sort
/// lexicographically in time order.
pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn timestamp_before(age: chrono::Duration) -> String {
    (chrono::Utc::now() - age).to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
