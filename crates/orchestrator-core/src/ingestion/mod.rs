//! Ingestion pipeline: extraction-to-commit orchestration and the
//! vector-sync outbox that keeps the vector store in step with graph
//! commits.

pub mod orchestrator;
pub mod outbox;

pub use orchestrator::{ExtractedRecord, IngestionOrchestrator, IngestionReport};
pub use outbox::{CoalescingOutbox, DrainReport, DurableOutboxDrainer};
