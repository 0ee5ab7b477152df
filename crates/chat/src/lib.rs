//! The conversation generation pipeline.
//!
//! One user message becomes one model-backed reply:
//!
//! 1. **Resolve** the model backend from the registry
//! 2. **Assemble** the prompt (rules, pre-prompt variables, memory window)
//! 3. **Match** the query against recorded annotations; a hit is replayed
//!    character by character and the model is never called
//! 4. **Invoke** the model, which streams chunks into the event queue
//!
//! Every generation ends with exactly one `MessageEnd` or `Error` event.

pub mod annotation;
pub mod memory;
pub mod prompt;
pub mod request;
pub mod runner;

pub use annotation::{AnnotationMatch, AnnotationMatcher};
pub use memory::TokenBufferMemory;
pub use prompt::{AssembledPrompt, AssemblyInput, PromptAssembler, PromptRules, PromptTemplate};
pub use request::{AppMode, GenerateRequest, ModelConfig};
pub use runner::GenerationRunner;
