//! Score prediction from several football data feeds.
//!
//! Background schedulers keep a snapshot cache filled within per-provider
//! daily call budgets; predictions read that cache, redistribute the weight
//! of whatever is missing, and fall back to a fixed heuristic when too little
//! is usable.

pub mod cancel;
pub mod clock;
pub mod config;
pub mod context;
pub mod elo;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod fetch;
pub mod fixtures;
pub mod health;
pub mod league_params;
pub mod logging;
pub mod payload;
pub mod provider;
pub mod quota;
pub mod results;
pub mod scheduler;
pub mod snapshot_cache;
pub mod snapshot_store;
pub mod weights;
pub mod win_prob;
pub mod xg_model;

pub use config::EngineConfig;
pub use engine::{EngineBuilder, PredictionEngine, ScorePrediction};
pub use provider::{EntityKey, ProviderId, SnapshotKey, SourceType};
