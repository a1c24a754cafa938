//! Numbered image files under the storage root.
//!
//! Each saved image gets the next sequential id and lands at
//! `<root>/<id>.<ext>`. Bytes go to `<id>.<ext>.partial` first and are
//! renamed into place once the encoder and the file handle are done, so a
//! failed write never leaves a file behind at a numbered path.

use crate::config::OutputFormat;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// An image written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedImage {
    pub id: u64,
    pub path: PathBuf,
    pub format: OutputFormat,
}

pub struct ImageStore {
    root: PathBuf,
    format: OutputFormat,
    next_id: u64,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            root: root.into(),
            format,
            next_id: 0,
        }
    }

    /// Id the next successful save will use.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Creates the storage root if it does not exist yet.
    pub fn prepare(&self) -> Result<(), StoreError> {
        if self.root.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(&self.root).map_err(|source| StoreError::CreateRoot {
            path: self.root.clone(),
            source,
        })?;
        log::info!("[STORE] Created storage root {}", self.root.display());
        Ok(())
    }

    pub fn path_for(&self, id: u64) -> PathBuf {
        self.root.join(format!("{}.{}", id, self.format.extension()))
    }

    /// Encodes and writes one image. The id advances only on success.
    pub fn save(&mut self, image: &DynamicImage) -> Result<PersistedImage, StoreError> {
        let id = self.next_id;
        let path = self.path_for(id);
        let partial = path.with_extension(format!("{}.partial", self.format.extension()));

        if let Err(e) = self.write_encoded(&partial, image) {
            discard_partial(&partial);
            return Err(e);
        }

        if let Err(source) = fs::rename(&partial, &path) {
            discard_partial(&partial);
            return Err(StoreError::Io { path, source });
        }

        self.next_id += 1;
        Ok(PersistedImage {
            id,
            path,
            format: self.format,
        })
    }

    /// Writes `image` to `path`; the file handle is closed before returning.
    fn write_encoded(&self, path: &Path, image: &DynamicImage) -> Result<(), StoreError> {
        let file = File::create(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);

        match self.format {
            OutputFormat::Png => image
                .write_to(&mut writer, ImageFormat::Png)
                .map_err(|e| StoreError::Encode(e.to_string()))?,
            OutputFormat::Jpeg { quality } => {
                // JPEG carries no alpha channel.
                let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
                let encoder = JpegEncoder::new_with_quality(&mut writer, quality);
                rgb.write_with_encoder(encoder)
                    .map_err(|e| StoreError::Encode(e.to_string()))?;
            }
        }

        writer.flush().map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}

fn discard_partial(partial: &Path) {
    if let Err(e) = fs::remove_file(partial) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!(
                "[STORE] Could not remove partial file {}: {}",
                partial.display(),
                e
            );
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to create storage root {path}: {source}")]
    CreateRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Image encoding failed: {0}")]
    Encode(String),
}
