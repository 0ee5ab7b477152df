//! Prompt assembly.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`rules`] | Built-in rule sets: section texts, order, prefixes, stops |
//! | [`template`] | `{{variable}}` placeholder parsing and substitution |
//! | [`assembler`] | Turns rules, pre-prompt, memory and query into messages |

pub mod assembler;
pub mod rules;
pub mod template;

pub use assembler::{AssembledPrompt, AssemblyInput, PromptAssembler, TemplateConfig};
pub use rules::{PromptRules, PromptSection};
pub use template::PromptTemplate;
