//! `OpenAI` chat completions <-> Bedrock Converse.
//!
//! Request and response conversion plus the streaming relay. Nothing in here
//! touches the network; [`crate::backend`] and [`crate::proxy`] do the I/O.

pub mod bedrock_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
