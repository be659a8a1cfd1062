//! Shared data structures for the video operational-intelligence pipeline
//!
//! This module defines the core types flowing between pipeline stages:
//! - Stage 1: ClipEvent (ingested video segment)
//! - Stage 2: ObservationEvent (structured read of a clip)
//! - Stage 3: DecisionEvent (trigger-rule judgement with recommended action)
//! - Stage 4: ActionEvent (terminal delivery outcome)
//!
//! Plus the canonical action vocabulary (`ActionType`, `Priority`) shared by
//! every stage.

mod action;
mod events;

pub use action::*;
pub use events::*;
