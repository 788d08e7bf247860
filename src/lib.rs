#[macro_use]
extern crate rocket;

pub mod api;
pub mod auth;
pub mod avatar;
pub mod db;
pub mod env;
pub mod error;
pub mod feed;
pub mod models;
pub mod pagination;
pub mod telemetry;
pub mod validation;
pub mod votes;
#[cfg(test)]
mod test;

use rocket::data::{Limits, ToByteUnit};
use rocket::fs::{FileServer, Options};
use rocket::{Build, Rocket};
use sqlx::SqlitePool;
use sqlx::migrate::Migrator;
use sqlx::sqlite::SqlitePoolOptions;
use thiserror::Error;
use tracing::info;

use crate::api::{
    api_accept_answer, api_ask_question, api_hot_questions, api_login, api_logout, api_me,
    api_post_answer, api_question_detail, api_questions, api_register, api_sidebar,
    api_tag_questions, api_update_profile, api_upload_avatar, api_vote, health,
};
use crate::auth::{default_api, unauthorized_api};
use crate::avatar::{AvatarStore, MEDIA_URL_PREFIX};
use crate::env::ForumConfig;
use crate::error::AppError;
use crate::telemetry::TelemetryFairing;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    Figment(rocket::figment::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("{0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("{0}")]
    Launch(#[from] rocket::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

impl From<rocket::figment::Error> for Error {
    fn from(value: rocket::figment::Error) -> Self {
        Error::Figment(value)
    }
}

/// Opens the pool and brings the schema up to date.
pub async fn connect(config: &ForumConfig) -> Result<SqlitePool, Error> {
    info!(database_url = %config.database_url, "Connecting to database");

    let pool = SqlitePoolOptions::new()
        .connect(&config.database_url)
        .await?;

    info!("Running database migrations...");
    MIGRATOR.run(&pool).await?;
    info!("Migrations completed successfully");

    Ok(pool)
}

pub fn init_rocket(pool: SqlitePool, config: ForumConfig) -> Rocket<Build> {
    info!("Starting Q&A forum");

    let limits = Limits::default()
        .limit("file", 6.mebibytes())
        .limit("data-form", 8.mebibytes());
    let figment = rocket::Config::figment().merge(("limits", limits));

    let media_root = config.media_root.clone();

    rocket::custom(figment)
        .manage(pool)
        .manage(AvatarStore::new(media_root.clone()))
        .manage(config)
        .mount(
            "/api",
            routes![
                api_vote,
                api_accept_answer,
                api_questions,
                api_hot_questions,
                api_tag_questions,
                api_question_detail,
                api_ask_question,
                api_post_answer,
                api_sidebar,
                api_register,
                api_login,
                api_logout,
                api_me,
                api_update_profile,
                api_upload_avatar,
                health,
            ],
        )
        .mount(MEDIA_URL_PREFIX, FileServer::new(media_root, Options::Missing))
        .register("/api", catchers![unauthorized_api, default_api])
        .attach(TelemetryFairing)
}
