use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde_json::{Value, json};
use sqlx::SqlitePool;

use crate::db::{get_profile_by_user, get_session_by_token, get_user};

use super::CurrentUser;

pub const SESSION_COOKIE: &str = "session_token";

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CurrentUser {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let auth_span = tracing::info_span!("user_auth_guard");
        let _guard = auth_span.enter();

        let token = request
            .cookies()
            .get_private(SESSION_COOKIE)
            .map(|c| c.value().to_string());

        let Some(token) = token else {
            return Outcome::Error((Status::Unauthorized, ()));
        };

        let db = match request.rocket().state::<SqlitePool>() {
            Some(pool) => pool,
            _ => {
                tracing::error!("Database pool not found in managed state");
                return Outcome::Error((Status::InternalServerError, ()));
            }
        };

        let session = match get_session_by_token(db, &token).await {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(error = ?err, "Invalid session token");
                return Outcome::Error((Status::Unauthorized, ()));
            }
        };

        if !session.is_valid() {
            tracing::warn!(user_id = session.user_id, "Session token expired");
            return Outcome::Error((Status::Unauthorized, ()));
        }

        let user = match get_user(db, session.user_id).await {
            Ok(user) => user,
            Err(err) => {
                tracing::error!(user_id = %session.user_id, error = ?err, "Failed to fetch user for valid session");
                return Outcome::Error((Status::InternalServerError, ()));
            }
        };

        match get_profile_by_user(db, user.id).await {
            Ok(profile) => {
                tracing::info!(username = %user.username, profile_id = profile.id, "User authenticated via session token");
                Outcome::Success(CurrentUser { user, profile })
            }
            Err(err) => {
                tracing::error!(user_id = %user.id, error = ?err, "User has no forum profile");
                Outcome::Error((Status::InternalServerError, ()))
            }
        }
    }
}

#[catch(401)]
pub fn unauthorized_api(_req: &Request) -> Custom<Json<Value>> {
    tracing::warn!("Unauthorized access attempt");

    Custom(
        Status::Unauthorized,
        Json(json!({
            "success": false,
            "error": "Unauthorized",
            "message": "Authentication required"
        })),
    )
}

#[catch(default)]
pub fn default_api(status: Status, _req: &Request) -> Custom<Json<Value>> {
    Custom(
        status,
        Json(json!({
            "success": false,
            "error": status.reason().unwrap_or("Error"),
            "code": status.code
        })),
    )
}
