//! ShellForge Context Engine
//!
//! Turns a query into a token-budgeted prompt:
//! - Relevance scoring and prioritization of retrieved items
//! - Context formatting under a token budget
//! - Task templates
//! - The assist engine tying retrieval, compression and generation together

pub mod assembler;
pub mod engine;
pub mod templates;

pub use assembler::{ContextAssembler, ContextGroups, ContextItem, ContextSource, PromptRequest};
pub use engine::{Assistance, AssistEngine, EngineBuilder};
pub use templates::TaskType;
