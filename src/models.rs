use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

use crate::avatar::{Avatar, resolve_avatar};

fn utc(naive: NaiveDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub id: i64,
    pub user_id: i64,
    pub nickname: String,
    pub avatar_image: Option<String>,
    pub avatar_url: Option<String>,
}

impl Profile {
    pub fn avatar(&self) -> Avatar {
        resolve_avatar(self.avatar_image.as_deref(), self.avatar_url.as_deref())
    }
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbProfile {
    pub id: i64,
    pub user_id: i64,
    pub nickname: String,
    pub avatar_image: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<DbProfile> for Profile {
    fn from(db: DbProfile) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            nickname: db.nickname,
            avatar_image: db.avatar_image,
            avatar_url: db.avatar_url,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbTag {
    pub id: i64,
    pub name: String,
}

impl From<DbTag> for Tag {
    fn from(db: DbTag) -> Self {
        Self {
            id: db.id,
            name: db.name,
        }
    }
}

/// A tag together with how many questions carry it.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TagPopularity {
    pub id: i64,
    pub name: String,
    pub question_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileActivity {
    pub id: i64,
    pub nickname: String,
    pub avatar_url: String,
    pub question_count: i64,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbProfileActivity {
    pub id: i64,
    pub nickname: String,
    pub avatar_image: Option<String>,
    pub avatar_url: Option<String>,
    pub question_count: i64,
}

impl From<DbProfileActivity> for ProfileActivity {
    fn from(db: DbProfileActivity) -> Self {
        Self {
            id: db.id,
            avatar_url: resolve_avatar(db.avatar_image.as_deref(), db.avatar_url.as_deref())
                .url(),
            nickname: db.nickname,
            question_count: db.question_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Author {
    pub profile_id: i64,
    pub nickname: String,
    pub avatar_url: String,
}

/// A question as it appears in feeds: author, vote total and answer count
/// are computed by the query.
#[derive(Debug, Clone, Serialize)]
pub struct Question {
    pub id: i64,
    pub author: Author,
    pub title: String,
    pub text: String,
    pub vote_sum: i64,
    pub answer_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbQuestion {
    pub id: i64,
    pub profile_id: i64,
    pub author_nickname: String,
    pub author_avatar_image: Option<String>,
    pub author_avatar_url: Option<String>,
    pub title: String,
    pub text: String,
    pub vote_sum: i64,
    pub answer_count: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<DbQuestion> for Question {
    fn from(db: DbQuestion) -> Self {
        let avatar = resolve_avatar(
            db.author_avatar_image.as_deref(),
            db.author_avatar_url.as_deref(),
        );

        Self {
            id: db.id,
            author: Author {
                profile_id: db.profile_id,
                nickname: db.author_nickname,
                avatar_url: avatar.url(),
            },
            title: db.title,
            text: db.text,
            vote_sum: db.vote_sum,
            answer_count: db.answer_count,
            created_at: utc(db.created_at),
            updated_at: utc(db.updated_at),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub id: i64,
    pub question_id: i64,
    pub author: Author,
    pub text: String,
    pub accepted: bool,
    pub vote_sum: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbAnswer {
    pub id: i64,
    pub question_id: i64,
    pub profile_id: i64,
    pub author_nickname: String,
    pub author_avatar_image: Option<String>,
    pub author_avatar_url: Option<String>,
    pub text: String,
    pub accepted: bool,
    pub vote_sum: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<DbAnswer> for Answer {
    fn from(db: DbAnswer) -> Self {
        let avatar = resolve_avatar(
            db.author_avatar_image.as_deref(),
            db.author_avatar_url.as_deref(),
        );

        Self {
            id: db.id,
            question_id: db.question_id,
            author: Author {
                profile_id: db.profile_id,
                nickname: db.author_nickname,
                avatar_url: avatar.url(),
            },
            text: db.text,
            accepted: db.accepted,
            vote_sum: db.vote_sum,
            created_at: utc(db.created_at),
            updated_at: utc(db.updated_at),
        }
    }
}
