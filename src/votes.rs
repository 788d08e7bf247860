use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::{Pool, QueryBuilder, Sqlite, SqliteConnection};
use tracing::{info, instrument};

use crate::error::AppError;

/// What a vote is cast on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteTarget {
    Question,
    Answer,
}

impl VoteTarget {
    fn target_table(self) -> &'static str {
        match self {
            VoteTarget::Question => "questions",
            VoteTarget::Answer => "answers",
        }
    }

    fn vote_table(self) -> &'static str {
        match self {
            VoteTarget::Question => "question_votes",
            VoteTarget::Answer => "answer_votes",
        }
    }

    fn target_column(self) -> &'static str {
        match self {
            VoteTarget::Question => "question_id",
            VoteTarget::Answer => "answer_id",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VoteTarget::Question => "question",
            VoteTarget::Answer => "answer",
        }
    }
}

impl fmt::Display for VoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteTarget {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "question" => Ok(VoteTarget::Question),
            "answer" => Ok(VoteTarget::Answer),
            _ => Err(AppError::Validation(format!("Unknown object type: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteDirection {
    #[serde(rename = "upvote")]
    Up,
    #[serde(rename = "downvote")]
    Down,
}

impl VoteDirection {
    pub fn value(self) -> i64 {
        match self {
            VoteDirection::Up => 1,
            VoteDirection::Down => -1,
        }
    }

    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            1 => Some(VoteDirection::Up),
            -1 => Some(VoteDirection::Down),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VoteDirection::Up => "upvote",
            VoteDirection::Down => "downvote",
        }
    }
}

impl fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteDirection {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upvote" => Ok(VoteDirection::Up),
            "downvote" => Ok(VoteDirection::Down),
            _ => Err(AppError::Validation(format!("Unknown vote type: {}", s))),
        }
    }
}

/// The row-level effect of one `cast_vote` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteChange {
    Created,
    Removed,
    Flipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteOutcome {
    pub new_total: i64,
    pub user_vote: Option<VoteDirection>,
    pub change: VoteChange,
}

/// Applies the vote toggle for `profile_id` on a question or answer.
///
/// No vote yet creates one, the same direction again removes it, and the
/// opposite direction flips it in place. The lookup, the single write and the
/// recomputed total all run in one write-locked transaction, so two identical
/// votes arriving together toggle on and then off.
#[instrument(skip(pool))]
pub async fn cast_vote(
    pool: &Pool<Sqlite>,
    profile_id: i64,
    target: VoteTarget,
    target_id: i64,
    direction: VoteDirection,
) -> Result<VoteOutcome, AppError> {
    let mut tx = crate::db::begin_write(pool).await?;

    let exists: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT id FROM {} WHERE id = ?",
        target.target_table()
    ))
    .bind(target_id)
    .fetch_optional(&mut *tx)
    .await?;

    if exists.is_none() {
        return Err(AppError::NotFound(format!(
            "{} with id {} not found",
            target, target_id
        )));
    }

    let existing: Option<(i64, i64)> = sqlx::query_as(&format!(
        "SELECT id, value FROM {} WHERE profile_id = ? AND {} = ?",
        target.vote_table(),
        target.target_column()
    ))
    .bind(profile_id)
    .bind(target_id)
    .fetch_optional(&mut *tx)
    .await?;

    let (change, user_vote) = match existing {
        None => {
            sqlx::query(&format!(
                "INSERT INTO {} (profile_id, {}, value) VALUES (?, ?, ?)",
                target.vote_table(),
                target.target_column()
            ))
            .bind(profile_id)
            .bind(target_id)
            .bind(direction.value())
            .execute(&mut *tx)
            .await
            .map_err(AppError::from_write)?;

            (VoteChange::Created, Some(direction))
        }
        Some((vote_id, value)) if value == direction.value() => {
            sqlx::query(&format!("DELETE FROM {} WHERE id = ?", target.vote_table()))
                .bind(vote_id)
                .execute(&mut *tx)
                .await?;

            (VoteChange::Removed, None)
        }
        Some((vote_id, _)) => {
            sqlx::query(&format!(
                "UPDATE {} SET value = ? WHERE id = ?",
                target.vote_table()
            ))
            .bind(direction.value())
            .bind(vote_id)
            .execute(&mut *tx)
            .await
            .map_err(AppError::from_write)?;

            (VoteChange::Flipped, Some(direction))
        }
    };

    let new_total = sum_votes(&mut tx, target, target_id).await?;

    tx.commit().await?;

    info!(
        change = ?change,
        new_total,
        user_vote = user_vote.map(VoteDirection::as_str),
        "Vote applied"
    );

    Ok(VoteOutcome {
        new_total,
        user_vote,
        change,
    })
}

async fn sum_votes(
    conn: &mut SqliteConnection,
    target: VoteTarget,
    target_id: i64,
) -> Result<i64, AppError> {
    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COALESCE(SUM(value), 0) FROM {} WHERE {} = ?",
        target.vote_table(),
        target.target_column()
    ))
    .bind(target_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(total)
}

/// Sum of all vote values on the target; 0 when nobody voted.
#[instrument(skip(pool))]
pub async fn vote_sum(
    pool: &Pool<Sqlite>,
    target: VoteTarget,
    target_id: i64,
) -> Result<i64, AppError> {
    let mut conn = pool.acquire().await?;
    sum_votes(&mut conn, target, target_id).await
}

#[instrument(skip(pool))]
pub async fn user_vote(
    pool: &Pool<Sqlite>,
    profile_id: i64,
    target: VoteTarget,
    target_id: i64,
) -> Result<Option<VoteDirection>, AppError> {
    let value: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT value FROM {} WHERE profile_id = ? AND {} = ?",
        target.vote_table(),
        target.target_column()
    ))
    .bind(profile_id)
    .bind(target_id)
    .fetch_optional(pool)
    .await?;

    Ok(value.and_then(VoteDirection::from_value))
}

/// The caller's votes on a batch of targets, keyed by target id.
#[instrument(skip(pool, target_ids))]
pub async fn user_votes(
    pool: &Pool<Sqlite>,
    profile_id: i64,
    target: VoteTarget,
    target_ids: &[i64],
) -> Result<HashMap<i64, VoteDirection>, AppError> {
    if target_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {}, value FROM {} WHERE profile_id = ",
        target.target_column(),
        target.vote_table()
    ));
    query.push_bind(profile_id);
    query.push(format!(" AND {} IN (", target.target_column()));
    let mut ids = query.separated(", ");
    for id in target_ids {
        ids.push_bind(*id);
    }
    query.push(")");

    let rows: Vec<(i64, i64)> = query.build_query_as().fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .filter_map(|(id, value)| VoteDirection::from_value(value).map(|vote| (id, vote)))
        .collect())
}
