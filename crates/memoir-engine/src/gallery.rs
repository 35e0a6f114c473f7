use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::ImageFormat;
use memoir_contracts::images::DecodedImage;
use serde::Serialize;

use crate::error::PipelineError;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "webp", "gif"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedImage {
    pub file_name: String,
    pub path: PathBuf,
    /// `/gallery/<file_name>`
    pub public_path: String,
    pub bytes: usize,
}

/// Flat directory of generated images named by creation time in unix millis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gallery {
    dir: PathBuf,
}

impl Gallery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, image: &DecodedImage, at: DateTime<Utc>) -> Result<SavedImage, PipelineError> {
        fs::create_dir_all(&self.dir).map_err(|err| {
            PipelineError::Persist(format!(
                "failed to create gallery directory {}: {err}",
                self.dir.display()
            ))
        })?;
        let ext = extension_for(image);
        let mut stamp = at.timestamp_millis();
        loop {
            let file_name = format!("{stamp}.{ext}");
            let path = self.dir.join(&file_name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&image.bytes).map_err(|err| {
                        PipelineError::Persist(format!("failed to write {}: {err}", path.display()))
                    })?;
                    return Ok(SavedImage {
                        public_path: format!("/gallery/{file_name}"),
                        file_name,
                        path,
                        bytes: image.bytes.len(),
                    });
                }
                // Same millisecond as an earlier save.
                Err(err) if err.kind() == ErrorKind::AlreadyExists => stamp += 1,
                Err(err) => {
                    return Err(PipelineError::Persist(format!(
                        "failed to create {}: {err}",
                        path.display()
                    )))
                }
            }
        }
    }

    /// Public paths of stored images, newest first.
    pub fn list(&self) -> Result<Vec<String>, PipelineError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(PipelineError::Persist(format!(
                    "failed to read gallery {}: {err}",
                    self.dir.display()
                )))
            }
        };
        let mut files: Vec<(Option<i64>, String)> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| has_image_extension(name))
            .map(|name| (timestamp_of(&name), name))
            .collect();
        files.sort_by(|(a_stamp, a_name), (b_stamp, b_name)| {
            b_stamp.cmp(a_stamp).then_with(|| a_name.cmp(b_name))
        });
        Ok(files
            .into_iter()
            .map(|(_, name)| format!("/gallery/{name}"))
            .collect())
    }
}

fn extension_for(image: &DecodedImage) -> &'static str {
    let declared = match image.media_type.to_ascii_lowercase().as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    };
    declared
        .or_else(|| match image::guess_format(&image.bytes) {
            Ok(ImageFormat::Png) => Some("png"),
            Ok(ImageFormat::Jpeg) => Some("jpg"),
            Ok(ImageFormat::WebP) => Some("webp"),
            Ok(ImageFormat::Gif) => Some("gif"),
            _ => None,
        })
        .unwrap_or("png")
}

fn has_image_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn timestamp_of(name: &str) -> Option<i64> {
    Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.parse::<i64>().ok())
}
