//! Response sources for SwarmClaw execution strategies.
//!
//! Strategies only ever see a `ResponseSource`. Production wires a
//! [`BackendSource`] around an [`OpenAiCompatProvider`]; tests and dry runs
//! wire a [`ScriptedSource`].

pub mod backend;
pub mod openai_compat;
pub mod scripted;

pub use backend::BackendSource;
pub use openai_compat::OpenAiCompatProvider;
pub use scripted::{ScriptedErrorKind, ScriptedResponse, ScriptedSource};
