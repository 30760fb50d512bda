pub mod diff;
pub mod orchestrator;

pub use diff::{diff_documents, DocumentChanges};
pub use orchestrator::{SyncOrchestrator, SyncPhase};
