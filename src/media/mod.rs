pub mod archive;
pub mod convert;

pub use archive::zip_gallery;
pub use convert::{convert_image, inspect_image, ImageInfo, OutputFormat};
