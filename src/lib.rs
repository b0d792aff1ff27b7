//! willforge: estate-document generation and practice management for a
//! solo Ontario practice.
//!
//! The crate is organized around four layers:
//! - `db`: the libSQL-backed persistence layer behind the [`db::Database`] trait
//! - `legal`: intake models, document generation, compliance, risk, billing,
//!   trust accounting, and the practice monitor
//! - `llm`: optional clause-drafting providers (OpenAI, Gemini)
//! - `channels::web`: the axum HTTP API

pub mod audit;
pub mod channels;
pub mod config;
pub mod db;
pub mod error;
pub mod legal;
pub mod llm;
pub mod settings;
