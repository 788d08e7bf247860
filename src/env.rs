use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::AppError;
use crate::pagination::DEFAULT_PAGE_SIZE;

const DEFAULT_DATABASE_URL: &str = "sqlite://qna_forum.db?mode=rwc";
const DEFAULT_MEDIA_ROOT: &str = "media";
const DEFAULT_SESSION_TTL_HOURS: i64 = 24;
const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;
const MAX_PAGE_SIZE: i64 = 500;

pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production";

    let env_files = if is_production {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        warn!("Warning: Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

/// Settings the forum reads from the process environment once at startup.
#[derive(Debug, Clone)]
pub struct ForumConfig {
    pub database_url: String,
    pub media_root: PathBuf,
    pub session_ttl_hours: i64,
    pub page_size: i64,
}

impl Default for ForumConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            media_root: PathBuf::from(DEFAULT_MEDIA_ROOT),
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ForumConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let database_url = dotenvy::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(defaults.database_url);

        let media_root = dotenvy::var("MEDIA_ROOT")
            .ok()
            .filter(|root| !root.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.media_root);

        let session_ttl_hours = bounded_number_var(
            "SESSION_TTL_HOURS",
            defaults.session_ttl_hours,
            MAX_SESSION_TTL_HOURS,
        )?;
        let page_size = bounded_number_var("PAGE_SIZE", defaults.page_size, MAX_PAGE_SIZE)?;

        Ok(Self {
            database_url,
            media_root,
            session_ttl_hours,
            page_size,
        })
    }
}

/// Reads a number in `1..=max`, or `default` when the variable is unset.
fn bounded_number_var(name: &str, default: i64, max: i64) -> Result<i64, AppError> {
    match dotenvy::var(name) {
        Ok(raw) => match raw.trim().parse::<i64>() {
            Ok(value) if (1..=max).contains(&value) => Ok(value),
            _ => Err(AppError::Internal(format!(
                "{} must be an integer between 1 and {}, got '{}'",
                name, max, raw
            ))),
        },
        Err(_) => Ok(default),
    }
}
