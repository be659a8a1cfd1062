//! Clip ingestion: source seam, spooling producer, retention janitor.

pub mod producer;
pub mod source;

pub use producer::{run_janitor, ClipProducer};
pub use source::{ClipFeed, ClipSource, LocalClip, SyntheticClipSource};
