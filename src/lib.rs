//! Synthetic consumer sentiment simulation: LLM-driven personas answer
//! purchase-decision questions against time-filtered review evidence, and the
//! aggregated decisions are correlated against ground-truth series.

pub mod cache;
pub mod config;
pub mod dates;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod http_client;
pub mod ingest;
pub mod llm_client;
pub mod persona;
pub mod queries;
pub mod retriever;
pub mod retry;
pub mod store;
pub mod table;
