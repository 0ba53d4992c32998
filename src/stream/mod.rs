//! NDJSON stream handling for the CLI's stdout: line framing and
//! normalization into [`StreamEvent`](crate::models::event::StreamEvent)s.

pub mod codec;
pub mod parser;
