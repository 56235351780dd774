//! Core of the graph-augmented retrieval orchestrator: the Cypher
//! security pipeline, the four-path retrieval engine and reranker, the
//! resilience substrate (circuit breakers, distributed locks, bounded
//! task sets), the ingestion pipeline, and multi-tenancy enforcement.
//!
//! This crate is store-agnostic: every external dependency (graph
//! database, vector database, distributed cache, LLM/embedding
//! providers) is reached through a trait in [`traits`]. Concrete
//! adapters live in the sibling `orchestrator-neo4j`, `orchestrator-
//! qdrant`, and `orchestrator-redis` crates.

pub mod cache;
pub mod classifier;
pub mod config;
pub mod cypher;
pub mod entity_resolver;
pub mod error;
pub mod graph_analytics;
pub mod ingestion;
pub mod jobs;
pub mod llm_fallback;
pub mod model;
pub mod reranker;
pub mod resilience;
pub mod retrieval;
pub mod tenancy;
pub mod traits;
pub mod worker_pool;

pub use error::{OrchestratorError, Result};
