use std::path::{Path, PathBuf};

use rocket::fs::TempFile;
use rocket::tokio::fs;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::AppError;

pub const DEFAULT_AVATAR_URL: &str = "/static/img/avatar-placeholder.png";
pub const MEDIA_URL_PREFIX: &str = "/media";
pub const AVATAR_DIR: &str = "avatars";
pub const MAX_AVATAR_BYTES: u64 = 5 * 1024 * 1024;
pub const ALLOWED_EXTENSIONS: [&str; 6] = [".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp"];

/// Where a profile's picture comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "value", rename_all = "lowercase")]
pub enum Avatar {
    Uploaded(String),
    External(String),
    Placeholder,
}

impl Avatar {
    pub fn url(&self) -> String {
        match self {
            Avatar::Uploaded(filename) => {
                format!("{}/{}/{}", MEDIA_URL_PREFIX, AVATAR_DIR, filename)
            }
            Avatar::External(url) => url.clone(),
            Avatar::Placeholder => DEFAULT_AVATAR_URL.to_string(),
        }
    }
}

/// Uploaded image first, then the external URL, then the placeholder.
/// Blank values count as absent.
pub fn resolve_avatar(uploaded_image: Option<&str>, external_url: Option<&str>) -> Avatar {
    let present = |value: Option<&str>| {
        value
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(String::from)
    };

    if let Some(image) = present(uploaded_image) {
        return Avatar::Uploaded(image);
    }

    match present(external_url) {
        Some(url) => Avatar::External(url),
        None => Avatar::Placeholder,
    }
}

/// Lowercased extension (with the dot) of an uploaded file name, if allowed.
pub fn avatar_extension(filename: &str) -> Result<String, AppError> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .ok_or_else(|| AppError::Validation("Unsupported file extension.".to_string()))?;

    if ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(extension)
    } else {
        Err(AppError::Validation("Unsupported file extension.".to_string()))
    }
}

pub fn validate_avatar_size(len: u64) -> Result<(), AppError> {
    if len > MAX_AVATAR_BYTES {
        return Err(AppError::Validation(
            "Avatar size must be less than 5MB".to_string(),
        ));
    }

    Ok(())
}

pub fn avatar_filename(user_id: i64, extension: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("avatar_{}_{}{}", user_id, &suffix[..8], extension)
}

/// Avatar images on local disk, served back under [`MEDIA_URL_PREFIX`].
#[derive(Debug, Clone)]
pub struct AvatarStore {
    media_root: PathBuf,
}

impl AvatarStore {
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
        }
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.media_root.join(AVATAR_DIR).join(filename)
    }

    /// Validates and stores an upload, returning the generated file name.
    #[instrument(skip(self, file))]
    pub async fn save(&self, user_id: i64, file: &mut TempFile<'_>) -> Result<String, AppError> {
        validate_avatar_size(file.len())?;

        let original_name = file
            .raw_name()
            .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str().to_string())
            .ok_or_else(|| AppError::Validation("Avatar file name is missing".to_string()))?;
        let extension = avatar_extension(&original_name)?;

        fs::create_dir_all(self.media_root.join(AVATAR_DIR)).await?;

        let filename = avatar_filename(user_id, &extension);
        file.move_copy_to(self.path_for(&filename)).await?;

        info!(filename = %filename, "Stored avatar");
        Ok(filename)
    }

    /// Deletes a stored avatar. Failures are logged and otherwise ignored.
    #[instrument(skip(self))]
    pub async fn remove(&self, filename: &str) {
        if let Err(err) = fs::remove_file(self.path_for(filename)).await {
            warn!(filename = %filename, error = %err, "Could not delete previous avatar");
        }
    }
}
