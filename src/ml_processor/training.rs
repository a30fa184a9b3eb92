// Training data packaging for fine-tuning jobs

use crate::errors::{StudioError, StudioResult};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// Bundle training images into a flat zip archive.
///
/// Entries are stored under their file names only; duplicate names are rejected.
pub fn package_training_images(images: &[PathBuf], out_zip: &Path) -> StudioResult<usize> {
    if images.is_empty() {
        return Err(StudioError::validation("images", "no training images given"));
    }

    let mut names = Vec::with_capacity(images.len());
    for image in images {
        let ext = image
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return Err(StudioError::validation(
                "images",
                format!("unsupported training image: {}", image.display()),
            ));
        }

        let name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StudioError::validation("images", "image path has no file name"))?;
        if names.contains(&name) {
            return Err(StudioError::validation(
                "images",
                format!("duplicate file name in archive: {name}"),
            ));
        }
        names.push(name);
    }

    let file = File::create(out_zip).map_err(|e| StudioError::io("creating training zip", e))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (image, name) in images.iter().zip(&names) {
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| StudioError::io("adding zip entry", io::Error::other(e)))?;
        let mut source = BufReader::new(
            File::open(image).map_err(|e| StudioError::io("reading training image", e))?,
        );
        io::copy(&mut source, &mut writer)
            .map_err(|e| StudioError::io("writing zip entry", e))?;
    }

    writer
        .finish()
        .map_err(|e| StudioError::io("finishing training zip", io::Error::other(e)))?;

    Ok(names.len())
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingInput {
    pub instance_prompt: String,
    pub class_prompt: String,
    pub instance_data: String,
    pub max_train_steps: u32,
}

/// Request body for a dreambooth training job.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingRequest {
    pub input: TrainingInput,
    pub model: String,
    pub trainer_version: String,
    pub webhook_completed: String,
}
