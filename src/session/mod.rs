// Per-research run state that outlives a single worker process

pub mod messages;
pub mod progress;
pub mod recovery;

pub use messages::{append_message, read_messages, FollowUpMessage};
pub use progress::{read_snapshot, ProgressSnapshot, ProgressTracker};
pub use recovery::{recover_stale_runs, RecoveryReport};
