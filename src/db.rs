use std::collections::{BTreeSet, HashMap};

use chrono::{NaiveDateTime, Utc};
use sqlx::{Pool, QueryBuilder, Sqlite, SqliteConnection, Transaction};
use tracing::{info, instrument};

use crate::{
    auth::{DbUser, DbUserSession, User, UserSession},
    error::AppError,
    models::{Answer, DbAnswer, DbProfile, DbQuestion, DbTag, Profile, Question, Tag},
};

#[cfg(not(test))]
const PASSWORD_HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const PASSWORD_HASH_COST: u32 = 4;

/// Opens a transaction that holds the SQLite write lock from its first
/// statement, so concurrent read-then-write sequences queue up instead of
/// failing with `SQLITE_BUSY` when they upgrade.
pub async fn begin_write(pool: &Pool<Sqlite>) -> Result<Transaction<'static, Sqlite>, AppError> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

pub const QUESTION_SELECT: &str = "SELECT q.id, q.profile_id,
        p.nickname AS author_nickname,
        p.avatar_image AS author_avatar_image,
        p.avatar_url AS author_avatar_url,
        q.title, q.text,
        (SELECT COALESCE(SUM(v.value), 0) FROM question_votes v WHERE v.question_id = q.id) AS vote_sum,
        (SELECT COUNT(*) FROM answers a WHERE a.question_id = q.id) AS answer_count,
        q.created_at, q.updated_at
     FROM questions q
     JOIN profiles p ON p.id = q.profile_id";

const ANSWER_SELECT: &str = "SELECT a.id, a.question_id, a.profile_id,
        p.nickname AS author_nickname,
        p.avatar_image AS author_avatar_image,
        p.avatar_url AS author_avatar_url,
        a.text, a.accepted,
        (SELECT COALESCE(SUM(v.value), 0) FROM answer_votes v WHERE v.answer_id = a.id) AS vote_sum,
        a.created_at, a.updated_at
     FROM answers a
     JOIN profiles p ON p.id = a.profile_id";

pub fn hash_password(password: &str) -> Result<String, AppError> {
    Ok(bcrypt::hash(password, PASSWORD_HASH_COST)?)
}

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>("SELECT id, username, email FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    info!("Finding user by username");
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, email FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(User::from))
}

async fn ensure_account_unique(
    pool: &Pool<Sqlite>,
    username: &str,
    email: &str,
    except_user_id: Option<i64>,
) -> Result<(), AppError> {
    let except = except_user_id.unwrap_or(-1);

    let username_taken: Option<i64> =
        sqlx::query_scalar("SELECT id FROM users WHERE username = ? AND id != ?")
            .bind(username)
            .bind(except)
            .fetch_optional(pool)
            .await?;

    if username_taken.is_some() {
        return Err(AppError::Validation("Username already exists".to_string()));
    }

    let email_taken: Option<i64> =
        sqlx::query_scalar("SELECT id FROM users WHERE email = ? AND id != ?")
            .bind(email)
            .bind(except)
            .fetch_optional(pool)
            .await?;

    if email_taken.is_some() {
        return Err(AppError::Validation(
            "Account with this email already exists".to_string(),
        ));
    }

    Ok(())
}

/// Creates a user and its profile in one transaction and returns both ids.
#[instrument(skip_all, fields(username))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    email: &str,
    password: &str,
    nickname: &str,
    avatar_url: Option<&str>,
) -> Result<(i64, i64), AppError> {
    info!("Creating new user");
    ensure_account_unique(pool, username, email, None).await?;

    let hashed_password = hash_password(password)?;
    create_user_with_hash(pool, username, email, &hashed_password, nickname, avatar_url).await
}

#[instrument(skip_all, fields(username))]
pub async fn create_user_with_hash(
    pool: &Pool<Sqlite>,
    username: &str,
    email: &str,
    password_hash: &str,
    nickname: &str,
    avatar_url: Option<&str>,
) -> Result<(i64, i64), AppError> {
    let now = Utc::now().naive_utc();
    let mut tx = begin_write(pool).await?;

    let user_id = sqlx::query(
        "INSERT INTO users (username, email, password, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|err| match AppError::from_write(err) {
        AppError::Constraint(_) => AppError::Validation("Username or email already exists".into()),
        other => other,
    })?
    .last_insert_rowid();

    let profile_id =
        sqlx::query("INSERT INTO profiles (user_id, nickname, avatar_url) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(nickname)
            .bind(avatar_url)
            .execute(&mut *tx)
            .await
            .map_err(AppError::from_write)?
            .last_insert_rowid();

    tx.commit().await?;

    Ok((user_id, profile_id))
}

/// Returns the user when the password matches its stored hash.
#[instrument(skip_all, fields(username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");

    #[derive(sqlx::FromRow)]
    struct Credentials {
        id: i64,
        username: String,
        email: String,
        password: String,
    }

    let row = sqlx::query_as::<_, Credentials>(
        "SELECT id, username, email, password FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => match bcrypt::verify(password, &row.password) {
            Ok(true) => Ok(Some(User {
                id: row.id,
                username: row.username,
                email: row.email,
            })),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

#[instrument]
pub async fn update_account(
    pool: &Pool<Sqlite>,
    user_id: i64,
    username: &str,
    email: &str,
) -> Result<(), AppError> {
    info!("Updating account");
    ensure_account_unique(pool, username, email, Some(user_id)).await?;

    sqlx::query("UPDATE users SET username = ?, email = ? WHERE id = ?")
        .bind(username)
        .bind(email)
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(AppError::from_write)?;

    Ok(())
}

#[instrument]
pub async fn get_profile(pool: &Pool<Sqlite>, id: i64) -> Result<Profile, AppError> {
    let row = sqlx::query_as::<_, DbProfile>(
        "SELECT id, user_id, nickname, avatar_image, avatar_url FROM profiles WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(Profile::from)
        .ok_or_else(|| AppError::NotFound(format!("Profile with id {} not found", id)))
}

#[instrument]
pub async fn get_profile_by_user(pool: &Pool<Sqlite>, user_id: i64) -> Result<Profile, AppError> {
    let row = sqlx::query_as::<_, DbProfile>(
        "SELECT id, user_id, nickname, avatar_image, avatar_url FROM profiles WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.map(Profile::from).ok_or_else(|| {
        AppError::NotFound(format!("Profile for user {} not found", user_id))
    })
}

#[instrument]
pub async fn update_profile(
    pool: &Pool<Sqlite>,
    profile_id: i64,
    nickname: &str,
    avatar_url: Option<&str>,
) -> Result<(), AppError> {
    info!("Updating profile");
    sqlx::query("UPDATE profiles SET nickname = ?, avatar_url = ? WHERE id = ?")
        .bind(nickname)
        .bind(avatar_url)
        .bind(profile_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Points the profile at a newly uploaded image and returns the file it
/// replaced, if any.
#[instrument]
pub async fn set_avatar_image(
    pool: &Pool<Sqlite>,
    profile_id: i64,
    filename: &str,
) -> Result<Option<String>, AppError> {
    info!("Replacing avatar image");
    let mut tx = begin_write(pool).await?;

    let previous: Option<Option<String>> =
        sqlx::query_scalar("SELECT avatar_image FROM profiles WHERE id = ?")
            .bind(profile_id)
            .fetch_optional(&mut *tx)
            .await?;

    let Some(previous) = previous else {
        return Err(AppError::NotFound(format!(
            "Profile with id {} not found",
            profile_id
        )));
    };

    sqlx::query("UPDATE profiles SET avatar_image = ? WHERE id = ?")
        .bind(filename)
        .bind(profile_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(previous.filter(|name| !name.is_empty()))
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query(
        "INSERT INTO user_sessions (user_id, token, created_at, expires_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(token)
    .bind(Utc::now().naive_utc())
    .bind(expires_at)
    .execute(pool)
    .await
    .map_err(AppError::from_write)?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Splits a comma separated tag list. Every entry must be non-empty and free
/// of whitespace once trimmed; repeated names collapse into one.
pub fn parse_tag_list(raw: &str) -> Result<Vec<String>, AppError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut seen = BTreeSet::new();
    let mut tags = Vec::new();

    for entry in raw.split(',') {
        let name = entry.trim();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(AppError::Validation("Invalid tags format".to_string()));
        }
        if seen.insert(name.to_string()) {
            tags.push(name.to_string());
        }
    }

    Ok(tags)
}

/// Inserts the tag unless the name already exists, then reads its id back.
pub async fn get_or_create_tag(conn: &mut SqliteConnection, name: &str) -> Result<i64, AppError> {
    sqlx::query("INSERT INTO tags (name) VALUES (?) ON CONFLICT (name) DO NOTHING")
        .bind(name)
        .execute(&mut *conn)
        .await
        .map_err(AppError::from_write)?;

    let id = sqlx::query_scalar("SELECT id FROM tags WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;

    Ok(id)
}

#[instrument]
pub async fn find_tag(pool: &Pool<Sqlite>, name: &str) -> Result<Option<Tag>, AppError> {
    let row = sqlx::query_as::<_, DbTag>("SELECT id, name FROM tags WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(Tag::from))
}

#[instrument]
pub async fn get_all_tags(pool: &Pool<Sqlite>) -> Result<Vec<Tag>, AppError> {
    let rows = sqlx::query_as::<_, DbTag>("SELECT id, name FROM tags ORDER BY name")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Tag::from).collect())
}

#[instrument]
pub async fn get_tags_for_question(
    pool: &Pool<Sqlite>,
    question_id: i64,
) -> Result<Vec<Tag>, AppError> {
    let rows = sqlx::query_as::<_, DbTag>(
        "SELECT t.id, t.name FROM tags t
         JOIN question_tags qt ON qt.tag_id = t.id
         WHERE qt.question_id = ?
         ORDER BY t.name",
    )
    .bind(question_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Tag::from).collect())
}

/// Tags for a batch of questions, keyed by question id.
#[instrument(skip(pool))]
pub async fn get_tags_for_questions(
    pool: &Pool<Sqlite>,
    question_ids: &[i64],
) -> Result<HashMap<i64, Vec<Tag>>, AppError> {
    let mut by_question: HashMap<i64, Vec<Tag>> = HashMap::new();
    if question_ids.is_empty() {
        return Ok(by_question);
    }

    #[derive(sqlx::FromRow)]
    struct Row {
        question_id: i64,
        id: i64,
        name: String,
    }

    let mut query = QueryBuilder::<Sqlite>::new(
        "SELECT qt.question_id, t.id, t.name FROM question_tags qt
         JOIN tags t ON t.id = qt.tag_id
         WHERE qt.question_id IN (",
    );
    let mut ids = query.separated(", ");
    for id in question_ids {
        ids.push_bind(*id);
    }
    query.push(") ORDER BY t.name");

    let rows = query.build_query_as::<Row>().fetch_all(pool).await?;
    for row in rows {
        by_question.entry(row.question_id).or_default().push(Tag {
            id: row.id,
            name: row.name,
        });
    }

    Ok(by_question)
}

/// Lowercases with full Unicode rules; search compares folded text on both sides.
pub fn fold_case(text: &str) -> String {
    text.to_lowercase()
}

/// Creates a question and attaches its tags, creating missing ones.
#[instrument(skip(pool, text))]
pub async fn create_question(
    pool: &Pool<Sqlite>,
    profile_id: i64,
    title: &str,
    text: &str,
    tags: &[String],
) -> Result<i64, AppError> {
    info!("Creating question");
    let now = Utc::now().naive_utc();
    let mut tx = begin_write(pool).await?;

    let question_id = sqlx::query(
        "INSERT INTO questions
             (profile_id, title, text, title_folded, text_folded, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(profile_id)
    .bind(title)
    .bind(text)
    .bind(fold_case(title))
    .bind(fold_case(text))
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(AppError::from_write)?
    .last_insert_rowid();

    for name in tags {
        let tag_id = get_or_create_tag(&mut tx, name).await?;

        sqlx::query(
            "INSERT INTO question_tags (question_id, tag_id) VALUES (?, ?)
             ON CONFLICT (question_id, tag_id) DO NOTHING",
        )
        .bind(question_id)
        .bind(tag_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from_write)?;
    }

    tx.commit().await?;

    Ok(question_id)
}

#[instrument]
pub async fn get_question(pool: &Pool<Sqlite>, id: i64) -> Result<Question, AppError> {
    let row = sqlx::query_as::<_, DbQuestion>(&format!("{} WHERE q.id = ?", QUESTION_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(Question::from)
        .ok_or_else(|| AppError::NotFound(format!("Question with id {} not found", id)))
}

#[instrument(skip(pool, text))]
pub async fn create_answer(
    pool: &Pool<Sqlite>,
    question_id: i64,
    profile_id: i64,
    text: &str,
) -> Result<i64, AppError> {
    info!("Creating answer");
    let now = Utc::now().naive_utc();
    let mut tx = begin_write(pool).await?;

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM questions WHERE id = ?")
        .bind(question_id)
        .fetch_optional(&mut *tx)
        .await?;

    if exists.is_none() {
        return Err(AppError::NotFound(format!(
            "Question with id {} not found",
            question_id
        )));
    }

    let answer_id = sqlx::query(
        "INSERT INTO answers (question_id, profile_id, text, accepted, created_at, updated_at)
         VALUES (?, ?, ?, FALSE, ?, ?)",
    )
    .bind(question_id)
    .bind(profile_id)
    .bind(text)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(AppError::from_write)?
    .last_insert_rowid();

    tx.commit().await?;

    Ok(answer_id)
}

#[instrument]
pub async fn get_answers_for_question(
    pool: &Pool<Sqlite>,
    question_id: i64,
) -> Result<Vec<Answer>, AppError> {
    let rows = sqlx::query_as::<_, DbAnswer>(&format!(
        "{} WHERE a.question_id = ? ORDER BY a.created_at ASC, a.id ASC",
        ANSWER_SELECT
    ))
    .bind(question_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Answer::from).collect())
}

#[instrument]
pub async fn get_answer(pool: &Pool<Sqlite>, id: i64) -> Result<Answer, AppError> {
    let row = sqlx::query_as::<_, DbAnswer>(&format!("{} WHERE a.id = ?", ANSWER_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(Answer::from)
        .ok_or_else(|| AppError::NotFound(format!("Answer with id {} not found", id)))
}

/// Profile that owns the question an answer belongs to.
#[instrument]
pub async fn get_answer_question_owner(
    pool: &Pool<Sqlite>,
    answer_id: i64,
) -> Result<i64, AppError> {
    let owner: Option<i64> = sqlx::query_scalar(
        "SELECT q.profile_id FROM answers a
         JOIN questions q ON q.id = a.question_id
         WHERE a.id = ?",
    )
    .bind(answer_id)
    .fetch_optional(pool)
    .await?;

    owner.ok_or_else(|| AppError::NotFound(format!("Answer with id {} not found", answer_id)))
}

/// Flips the accepted flag and returns its new value.
#[instrument]
pub async fn toggle_answer_accepted(pool: &Pool<Sqlite>, answer_id: i64) -> Result<bool, AppError> {
    info!("Toggling accepted answer");
    let accepted: Option<bool> = sqlx::query_scalar(
        "UPDATE answers SET accepted = NOT accepted, updated_at = ?
         WHERE id = ?
         RETURNING accepted",
    )
    .bind(Utc::now().naive_utc())
    .bind(answer_id)
    .fetch_optional(pool)
    .await?;

    accepted.ok_or_else(|| AppError::NotFound(format!("Answer with id {} not found", answer_id)))
}
