pub mod composer;

pub use composer::{
    compose, optional_field, AspectRatio, Medium, Preset, PromptOptions, SAFE_PERSON_PHRASE,
};
