pub mod test_db {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::{Pool, Sqlite};

    use crate::MIGRATOR;
    use crate::db::{create_answer, create_question, create_user, parse_tag_list};
    use crate::error::AppError;
    use crate::telemetry::init_test_tracing;

    pub static STANDARD_PASSWORD: &str = "password123";

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        questions: Vec<TestQuestion>,
        answers: Vec<TestAnswer>,
    }

    pub struct TestUser {
        pub username: String,
        pub nickname: String,
        pub password: String,
    }

    pub struct TestQuestion {
        pub title: String,
        pub text: String,
        pub author: String,
        pub tags: String,
    }

    pub struct TestAnswer {
        pub question_title: String,
        pub author: String,
        pub text: String,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn user(mut self, username: &str, nickname: &str) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                nickname: nickname.to_string(),
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn user_with_password(mut self, username: &str, nickname: &str, password: &str) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                nickname: nickname.to_string(),
                password: password.to_string(),
            });
            self
        }

        /// `tags` is a comma separated list, as a client would send it.
        pub fn question(mut self, title: &str, author: &str, tags: &str) -> Self {
            self.questions.push(TestQuestion {
                title: title.to_string(),
                text: format!("Details about: {}", title),
                author: author.to_string(),
                tags: tags.to_string(),
            });
            self
        }

        pub fn answer(mut self, question_title: &str, author: &str, text: &str) -> Self {
            self.answers.push(TestAnswer {
                question_title: question_title.to_string(),
                author: author.to_string(),
                text: text.to_string(),
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            let pool = memory_pool().await?;
            self.build_on(pool).await
        }

        /// Builds on a database file with several connections, for tests that
        /// need real concurrent writers.
        pub async fn build_on_file(self, path: &Path) -> Result<TestDb, AppError> {
            let pool = file_pool(path).await?;
            self.build_on(pool).await
        }

        async fn build_on(self, pool: Pool<Sqlite>) -> Result<TestDb, AppError> {
            init_test_tracing();

            let mut user_id_map = HashMap::new();
            let mut profile_id_map = HashMap::new();
            let mut question_id_map = HashMap::new();
            let mut answer_id_map = HashMap::new();

            for user in &self.users {
                let (user_id, profile_id) = create_user(
                    &pool,
                    &user.username,
                    &format!("{}@example.com", user.username),
                    &user.password,
                    &user.nickname,
                    None,
                )
                .await?;

                user_id_map.insert(user.username.clone(), user_id);
                profile_id_map.insert(user.username.clone(), profile_id);
            }

            for question in &self.questions {
                let profile_id = *profile_id_map.get(&question.author).ok_or_else(|| {
                    AppError::NotFound(format!("No test user named {}", question.author))
                })?;
                let tags = parse_tag_list(&question.tags)?;

                let id = create_question(&pool, profile_id, &question.title, &question.text, &tags)
                    .await?;
                question_id_map.insert(question.title.clone(), id);
            }

            for answer in &self.answers {
                let profile_id = *profile_id_map.get(&answer.author).ok_or_else(|| {
                    AppError::NotFound(format!("No test user named {}", answer.author))
                })?;
                let question_id = *question_id_map.get(&answer.question_title).ok_or_else(|| {
                    AppError::NotFound(format!("No test question titled {}", answer.question_title))
                })?;

                let id = create_answer(&pool, question_id, profile_id, &answer.text).await?;
                answer_id_map.insert(answer.text.clone(), id);
            }

            Ok(TestDb {
                pool,
                user_id_map,
                profile_id_map,
                question_id_map,
                answer_id_map,
            })
        }
    }

    /// A migrated in-memory database. One connection that never expires, so
    /// every query sees the same database.
    pub async fn memory_pool() -> Result<Pool<Sqlite>, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(pool)
    }

    pub async fn file_pool(path: &Path) -> Result<Pool<Sqlite>, AppError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(pool)
    }

    /// A fresh database path under the system temp dir.
    pub fn temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("qna-forum-test-{}.db", uuid::Uuid::new_v4()))
    }

    /// Removes a file database along with its WAL side files.
    pub fn remove_db_files(path: &Path) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.as_os_str().to_owned();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub profile_id_map: HashMap<String, i64>,
        pub question_id_map: HashMap<String, i64>,
        pub answer_id_map: HashMap<String, i64>,
    }

    impl TestDb {
        pub fn user_id(&self, username: &str) -> Option<i64> {
            self.user_id_map.get(username).copied()
        }

        pub fn profile_id(&self, username: &str) -> Option<i64> {
            self.profile_id_map.get(username).copied()
        }

        pub fn question_id(&self, title: &str) -> Option<i64> {
            self.question_id_map.get(title).copied()
        }

        pub fn answer_id(&self, text: &str) -> Option<i64> {
            self.answer_id_map.get(text).copied()
        }

        /// Pins a question's creation time so ordering ties can be set up.
        pub async fn set_question_created_at(
            &self,
            question_id: i64,
            created_at: &str,
        ) -> Result<(), sqlx::Error> {
            sqlx::query("UPDATE questions SET created_at = ? WHERE id = ?")
                .bind(created_at)
                .bind(question_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }
}

pub mod test_utils {
    use std::path::PathBuf;

    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;
    use uuid::Uuid;

    use crate::env::ForumConfig;
    use crate::init_rocket;

    pub use super::test_db::{
        STANDARD_PASSWORD, TestDb, TestDbBuilder, remove_db_files, temp_db_path,
    };

    pub const ASKER: &str = "asker";
    pub const ANSWERER: &str = "answerer";
    pub const VOTER: &str = "voter";
    pub const LIFETIMES_TITLE: &str = "How do lifetimes work?";
    pub const SQLITE_TITLE: &str = "Is SQLite fast enough?";
    pub const BORROW_ANSWER: &str = "Read the chapter on borrowing.";

    /// Three users, two questions and one answer.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .user(ASKER, "Asker")
            .user(ANSWERER, "Answerer")
            .user(VOTER, "Voter")
            .question(LIFETIMES_TITLE, ASKER, "rust,lifetimes")
            .question(SQLITE_TITLE, ANSWERER, "sqlite")
            .answer(LIFETIMES_TITLE, ANSWERER, BORROW_ANSWER)
            .build()
            .await
            .expect("Failed to build test database")
    }

    pub fn test_media_root() -> PathBuf {
        std::env::temp_dir().join(format!("qna-forum-test-{}", Uuid::new_v4().simple()))
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let config = ForumConfig {
            media_root: test_media_root(),
            page_size: 2,
            ..ForumConfig::default()
        };

        let rocket = init_rocket(test_db.pool.clone(), config);
        let client = Client::tracked(rocket)
            .await
            .expect("valid rocket instance");

        (client, test_db)
    }

    pub async fn login_test_user(client: &Client, username: &str, password: &str) {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": username,
                    "password": password
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        assert!(
            response.cookies().get("session_token").is_some(),
            "login did not set a session cookie for {}",
            username
        );
    }
}
