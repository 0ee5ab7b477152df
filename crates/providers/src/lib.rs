//! Model backend implementations for convogen.
//!
//! All backends implement `convogen_core::LargeLanguageModel`. The
//! [`ModelRegistry`] maps provider names to backends and is handed to the
//! generation runner at startup.

pub mod frame;
pub mod openai_compat;
pub mod preset;
pub mod registry;

pub use frame::FrameReader;
pub use openai_compat::{DEFAULT_TIMEOUT, OpenAiCompatModel};
pub use preset::{VendorPreset, preset_endpoint};
pub use registry::{ModelRegistry, OPENAI_COMPATIBLE};
