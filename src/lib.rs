//! token-sentinel - stage-aware risk evaluation for bonding-curve token launches
//!
//! This crate tracks freshly launched tokens through their lifecycle and decides,
//! per stage, whether each one is safe enough to keep following or must be dropped.

pub mod pipeline;
pub mod types;

// Re-export main types for convenience
pub use pipeline::{PipelineBuilder, PipelineConfig, StageEvaluator, StageTransitionResult, TokenStage};
pub use types::{NewTokenEvent, TokenMetadata, TradeEvent};
