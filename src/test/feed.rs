#[cfg(test)]
mod tests {
    use crate::{
        feed::{self, Feed, most_active_profiles, most_popular_tags, tag_exists},
        test::test_utils::TestDbBuilder,
        votes::{VoteDirection, VoteTarget, cast_vote},
    };

    fn titles(questions: &[crate::models::Question]) -> Vec<&str> {
        questions.iter().map(|q| q.title.as_str()).collect()
    }

    #[rocket::async_test]
    async fn test_recent_feed_is_newest_first() {
        let test_db = TestDbBuilder::new()
            .user("alice", "Alice")
            .question("First", "alice", "")
            .question("Second", "alice", "")
            .question("Third", "alice", "")
            .build()
            .await
            .expect("Failed to build test database");

        test_db
            .set_question_created_at(test_db.question_id("First").unwrap(), "2025-01-01 10:00:00")
            .await
            .unwrap();
        test_db
            .set_question_created_at(test_db.question_id("Second").unwrap(), "2025-01-03 10:00:00")
            .await
            .unwrap();
        test_db
            .set_question_created_at(test_db.question_id("Third").unwrap(), "2025-01-02 10:00:00")
            .await
            .unwrap();

        let questions = feed::recent().all(&test_db.pool).await.unwrap();
        assert_eq!(titles(&questions), vec!["Second", "Third", "First"]);
    }

    #[rocket::async_test]
    async fn test_recent_feed_breaks_ties_by_id() {
        let test_db = TestDbBuilder::new()
            .user("alice", "Alice")
            .question("Older id", "alice", "")
            .question("Newer id", "alice", "")
            .build()
            .await
            .unwrap();

        for title in ["Older id", "Newer id"] {
            test_db
                .set_question_created_at(test_db.question_id(title).unwrap(), "2025-02-01 12:00:00")
                .await
                .unwrap();
        }

        let questions = feed::recent().all(&test_db.pool).await.unwrap();
        assert_eq!(titles(&questions), vec!["Newer id", "Older id"]);
    }

    #[rocket::async_test]
    async fn test_most_upvoted_orders_by_vote_total() {
        let test_db = TestDbBuilder::new()
            .user("alice", "Alice")
            .user("bob", "Bob")
            .question("Unpopular", "alice", "")
            .question("Popular", "alice", "")
            .question("Ignored", "alice", "")
            .question("Also ignored", "alice", "")
            .build()
            .await
            .unwrap();
        let pool = &test_db.pool;
        let alice = test_db.profile_id("alice").unwrap();
        let bob = test_db.profile_id("bob").unwrap();

        let popular = test_db.question_id("Popular").unwrap();
        let unpopular = test_db.question_id("Unpopular").unwrap();
        cast_vote(pool, alice, VoteTarget::Question, popular, VoteDirection::Up).await.unwrap();
        cast_vote(pool, bob, VoteTarget::Question, popular, VoteDirection::Up).await.unwrap();
        cast_vote(pool, bob, VoteTarget::Question, unpopular, VoteDirection::Down).await.unwrap();

        test_db
            .set_question_created_at(test_db.question_id("Ignored").unwrap(), "2025-01-01 00:00:00")
            .await
            .unwrap();
        test_db
            .set_question_created_at(test_db.question_id("Also ignored").unwrap(), "2025-06-01 00:00:00")
            .await
            .unwrap();

        let questions = feed::most_upvoted().all(pool).await.unwrap();
        assert_eq!(
            titles(&questions),
            vec!["Popular", "Also ignored", "Ignored", "Unpopular"]
        );
        assert_eq!(questions[0].vote_sum, 2);
        assert_eq!(questions[3].vote_sum, -1);
    }

    #[rocket::async_test]
    async fn test_most_upvoted_ties_prefer_newer() {
        let test_db = TestDbBuilder::new()
            .user("alice", "Alice")
            .question("Older", "alice", "")
            .question("Newer", "alice", "")
            .build()
            .await
            .unwrap();
        let alice = test_db.profile_id("alice").unwrap();

        for (title, created_at) in [("Older", "2025-03-01 08:00:00"), ("Newer", "2025-03-02 08:00:00")] {
            let id = test_db.question_id(title).unwrap();
            test_db.set_question_created_at(id, created_at).await.unwrap();
            cast_vote(&test_db.pool, alice, VoteTarget::Question, id, VoteDirection::Up)
                .await
                .unwrap();
        }

        let questions = feed::most_upvoted().all(&test_db.pool).await.unwrap();
        assert_eq!(titles(&questions), vec!["Newer", "Older"]);
        assert!(questions.iter().all(|q| q.vote_sum == 1));
    }

    #[rocket::async_test]
    async fn test_tagged_feed_matches_exact_name() {
        let test_db = TestDbBuilder::new()
            .user("alice", "Alice")
            .question("Lower", "alice", "rust")
            .question("Upper", "alice", "Rust")
            .question("Both", "alice", "rust,sqlite")
            .question("Untagged", "alice", "")
            .build()
            .await
            .unwrap();

        let questions = feed::by_tag("rust").all(&test_db.pool).await.unwrap();
        let mut found = titles(&questions);
        found.sort();
        assert_eq!(found, vec!["Both", "Lower"]);

        let questions = feed::by_tag("Rust").all(&test_db.pool).await.unwrap();
        assert_eq!(titles(&questions), vec!["Upper"]);

        assert!(feed::by_tag("python").all(&test_db.pool).await.unwrap().is_empty());
        assert!(tag_exists(&test_db.pool, "sqlite").await.unwrap());
        assert!(!tag_exists(&test_db.pool, "python").await.unwrap());
    }

    #[rocket::async_test]
    async fn test_search_feed_matches_title_or_text() {
        let test_db = TestDbBuilder::new()
            .user("alice", "Alice")
            .question("Borrow checker errors", "alice", "")
            .question("Async runtimes", "alice", "")
            .question("100% coverage", "alice", "")
            .build()
            .await
            .unwrap();

        let questions = feed::search("BORROW").all(&test_db.pool).await.unwrap();
        assert_eq!(titles(&questions), vec!["Borrow checker errors"]);

        // Builder text is "Details about: <title>"
        let questions = feed::search("details").all(&test_db.pool).await.unwrap();
        assert_eq!(questions.len(), 3);

        let questions = feed::search("100%").all(&test_db.pool).await.unwrap();
        assert_eq!(titles(&questions), vec!["100% coverage"]);

        let questions = feed::search("0% c").all(&test_db.pool).await.unwrap();
        assert_eq!(questions.len(), 1);

        let questions = feed::search("%").all(&test_db.pool).await.unwrap();
        assert_eq!(questions.len(), 1, "wildcards must match literally");

        assert!(feed::search("tokio").all(&test_db.pool).await.unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn test_search_folds_non_ascii_case() {
        let test_db = TestDbBuilder::new()
            .user("alice", "Alice")
            .question("Привет мир", "alice", "")
            .question("Straße ÜBER alles", "alice", "")
            .build()
            .await
            .unwrap();

        for query in ["ПРИВЕТ", "привет", "Мир"] {
            let questions = feed::search(query).all(&test_db.pool).await.unwrap();
            assert_eq!(titles(&questions), vec!["Привет мир"], "query {}", query);
        }

        let questions = feed::search("über").all(&test_db.pool).await.unwrap();
        assert_eq!(titles(&questions), vec!["Straße ÜBER alles"]);

        let page = feed::search("пРиВеТ").page(&test_db.pool, 1, 10).await.unwrap();
        assert_eq!(page.total_items, 1);
    }

    #[rocket::async_test]
    async fn test_feed_pages() {
        let mut builder = TestDbBuilder::new().user("alice", "Alice");
        for i in 1..=25 {
            builder = builder.question(&format!("Question {:02}", i), "alice", "");
        }
        let test_db = builder.build().await.unwrap();

        for i in 1..=25 {
            let id = test_db.question_id(&format!("Question {:02}", i)).unwrap();
            test_db
                .set_question_created_at(id, &format!("2025-01-{:02} 00:00:00", i))
                .await
                .unwrap();
        }

        let page = Feed::Recent.page(&test_db.pool, 1, 10).await.unwrap();
        assert_eq!(page.total_items, 25);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 10);
        assert_eq!(page.items[0].title, "Question 25");
        assert!(page.has_next);
        assert!(!page.has_prev);

        // Past the end clamps to the last page
        let page = Feed::Recent.page(&test_db.pool, 99, 10).await.unwrap();
        assert_eq!(page.page_number, 3);
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.items[4].title, "Question 01");
        assert!(!page.has_next);

        let page = Feed::Recent.page(&test_db.pool, 0, 10).await.unwrap();
        assert_eq!(page.page_number, 1);
    }

    #[rocket::async_test]
    async fn test_empty_feed_has_one_page() {
        let test_db = TestDbBuilder::new().user("alice", "Alice").build().await.unwrap();

        let page = feed::recent().page(&test_db.pool, 3, 10).await.unwrap();
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.page_number, 1);
        assert!(page.items.is_empty());
    }

    #[rocket::async_test]
    async fn test_feed_can_be_read_repeatedly() {
        let test_db = TestDbBuilder::new()
            .user("alice", "Alice")
            .question("Only", "alice", "")
            .build()
            .await
            .unwrap();

        let feed = feed::recent();
        let first = feed.all(&test_db.pool).await.unwrap();
        let second = feed.all(&test_db.pool).await.unwrap();
        assert_eq!(titles(&first), titles(&second));
        assert_eq!(feed.count(&test_db.pool).await.unwrap(), 1);
    }

    #[rocket::async_test]
    async fn test_sidebar_rankings() {
        let test_db = TestDbBuilder::new()
            .user("alice", "Alice")
            .user("bob", "Bob")
            .user("carol", "Carol")
            .question("Q1", "bob", "rust,sqlite")
            .question("Q2", "bob", "rust")
            .question("Q3", "alice", "rust,web")
            .build()
            .await
            .unwrap();

        let tags = most_popular_tags(&test_db.pool, 2).await.unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].name, "rust");
        assert_eq!(tags[0].question_count, 3);
        assert_eq!(tags[1].name, "sqlite");

        let profiles = most_active_profiles(&test_db.pool, 7).await.unwrap();
        assert_eq!(profiles.len(), 3);
        assert_eq!(profiles[0].nickname, "Bob");
        assert_eq!(profiles[0].question_count, 2);
        assert_eq!(profiles[2].nickname, "Carol");
        assert_eq!(profiles[2].question_count, 0);
        assert_eq!(profiles[2].avatar_url, crate::avatar::DEFAULT_AVATAR_URL);
    }
}
