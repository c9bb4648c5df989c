//! These models represent the objects passed across the bridge
//!
//! There are several related formats we need to interact with:
//! - caller messages and tool declarations, in an OpenAI-like flat JSON shape
//! - tool-call reports and stream chunks, sent back to the caller
//! - transcript entries and compiled schemas, handed to the generation engine
//!
//! We always immediately convert the caller formats into the internal structs
//! here. Because the engine's shapes differ from the caller's, the internal
//! models are not an exact match to either side.
pub mod chunk;
pub mod content;
pub mod message;
pub mod role;
pub mod schema;
pub mod tool;
pub mod transcript;
