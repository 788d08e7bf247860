use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};

use crate::db::{QUESTION_SELECT, fold_case};
use crate::error::AppError;
use crate::models::{
    DbProfileActivity, DbQuestion, ProfileActivity, Question, TagPopularity,
};
use crate::pagination::{Page, PageWindow};

/// An ordered view over questions. Building one runs nothing; the query is
/// issued when a page or the count is requested, so a feed can be read any
/// number of times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// Newest first.
    Recent,
    /// Highest vote total first, newest first among equals.
    MostUpvoted,
    /// `Recent`, restricted to one tag.
    Tagged(String),
    /// `Recent`, restricted to a case-insensitive match on title or text.
    Search(String),
}

pub fn recent() -> Feed {
    Feed::Recent
}

pub fn most_upvoted() -> Feed {
    Feed::MostUpvoted
}

pub fn by_tag(tag_name: &str) -> Feed {
    Feed::Tagged(tag_name.to_string())
}

pub fn search(query: &str) -> Feed {
    Feed::Search(query.trim().to_string())
}

/// Escapes LIKE wildcards so the user's text matches literally.
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

impl Feed {
    pub fn name(&self) -> &'static str {
        match self {
            Feed::Recent => "recent",
            Feed::MostUpvoted => "hot",
            Feed::Tagged(_) => "tag",
            Feed::Search(_) => "search",
        }
    }

    fn push_filter(&self, query: &mut QueryBuilder<'_, Sqlite>) {
        match self {
            Feed::Recent | Feed::MostUpvoted => {}
            Feed::Tagged(tag_name) => {
                query.push(
                    " WHERE q.id IN (SELECT qt.question_id FROM question_tags qt
                       JOIN tags t ON t.id = qt.tag_id WHERE t.name = ",
                );
                query.push_bind(tag_name.clone());
                query.push(")");
            }
            Feed::Search(text) => {
                let pattern = like_pattern(&fold_case(text));
                query.push(" WHERE (q.title_folded LIKE ");
                query.push_bind(pattern.clone());
                query.push(" ESCAPE '\\' OR q.text_folded LIKE ");
                query.push_bind(pattern);
                query.push(" ESCAPE '\\')");
            }
        }
    }

    fn order_clause(&self) -> &'static str {
        match self {
            Feed::MostUpvoted => " ORDER BY vote_sum DESC, q.created_at DESC, q.id DESC",
            _ => " ORDER BY q.created_at DESC, q.id DESC",
        }
    }

    #[instrument(skip(pool))]
    pub async fn count(&self, pool: &Pool<Sqlite>) -> Result<i64, AppError> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM questions q");
        self.push_filter(&mut query);

        let total: i64 = query.build_query_scalar().fetch_one(pool).await?;
        Ok(total)
    }

    #[instrument(skip(pool))]
    pub async fn fetch(
        &self,
        pool: &Pool<Sqlite>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Question>, AppError> {
        let mut query = QueryBuilder::<Sqlite>::new(QUESTION_SELECT);
        self.push_filter(&mut query);
        query.push(self.order_clause());
        query.push(" LIMIT ");
        query.push_bind(limit);
        query.push(" OFFSET ");
        query.push_bind(offset);

        let rows = query.build_query_as::<DbQuestion>().fetch_all(pool).await?;
        Ok(rows.into_iter().map(Question::from).collect())
    }

    /// Every question of the feed, in feed order.
    pub async fn all(&self, pool: &Pool<Sqlite>) -> Result<Vec<Question>, AppError> {
        self.fetch(pool, -1, 0).await
    }

    /// One page of the feed; the page number is clamped into range.
    #[instrument(skip(pool))]
    pub async fn page(
        &self,
        pool: &Pool<Sqlite>,
        page_number: i64,
        page_size: i64,
    ) -> Result<Page<Question>, AppError> {
        let total = self.count(pool).await?;
        let window = PageWindow::new(total, page_number, page_size);

        let items = if total == 0 {
            Vec::new()
        } else {
            self.fetch(pool, window.limit(), window.offset()).await?
        };

        info!(
            feed = self.name(),
            page = window.page_number,
            total_pages = window.total_pages,
            "Loaded feed page"
        );

        Ok(window.into_page(items))
    }
}

pub async fn tag_exists(pool: &Pool<Sqlite>, tag_name: &str) -> Result<bool, AppError> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM tags WHERE name = ?")
        .bind(tag_name)
        .fetch_optional(pool)
        .await?;

    Ok(found.is_some())
}

#[instrument(skip(pool))]
pub async fn most_popular_tags(
    pool: &Pool<Sqlite>,
    limit: i64,
) -> Result<Vec<TagPopularity>, AppError> {
    let rows = sqlx::query_as::<_, TagPopularity>(
        "SELECT t.id, t.name, COUNT(qt.question_id) AS question_count
         FROM tags t
         LEFT JOIN question_tags qt ON qt.tag_id = t.id
         GROUP BY t.id, t.name
         ORDER BY question_count DESC, t.name ASC
         LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn most_active_profiles(
    pool: &Pool<Sqlite>,
    limit: i64,
) -> Result<Vec<ProfileActivity>, AppError> {
    let rows = sqlx::query_as::<_, DbProfileActivity>(
        "SELECT p.id, p.nickname, p.avatar_image, p.avatar_url,
                COUNT(q.id) AS question_count
         FROM profiles p
         LEFT JOIN questions q ON q.profile_id = p.id
         GROUP BY p.id, p.nickname, p.avatar_image, p.avatar_url
         ORDER BY question_count DESC, p.id ASC
         LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ProfileActivity::from).collect())
}
