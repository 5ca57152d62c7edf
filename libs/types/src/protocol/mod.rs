//! JSON frame models for both sides of the relay
//!
//! Every frame is a JSON object tagged by its `"type"` field.

pub mod downstream;
pub mod upstream;
