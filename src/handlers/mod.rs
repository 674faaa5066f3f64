pub mod commands;

pub use commands::{ComposerForm, GenerationSettings};
