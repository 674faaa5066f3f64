use std::io::{Cursor, Write};

use anyhow::{Context, Result};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::state::GalleryImage;

/// Packs the whole gallery into an in-memory deflate ZIP, one entry per
/// image named by its gallery file name.
pub fn zip_gallery(items: &[GalleryImage]) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = ZipWriter::new(&mut cursor);
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for item in items {
            writer
                .start_file(item.file_name.as_str(), options)
                .with_context(|| format!("Failed to start ZIP entry {}", item.file_name))?;
            writer
                .write_all(&item.bytes)
                .with_context(|| format!("Failed to write ZIP entry {}", item.file_name))?;
        }

        writer.finish().context("Failed to finalize ZIP archive")?;
    }
    Ok(cursor.into_inner())
}
