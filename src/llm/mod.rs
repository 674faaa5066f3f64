pub mod imagen;

pub use imagen::{
    generate_images, max_images_for_model, GeneratedImage, ImageGenerationError, ImagenRequest,
    PersonGeneration,
};
