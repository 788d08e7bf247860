use anyhow::{Context, bail};
use rand::Rng;
use rand::seq::IndexedRandom;
use sqlx::SqlitePool;

use qna_forum::db::{create_answer, create_question, create_user_with_hash, hash_password};
use qna_forum::env::{ForumConfig, load_environment};
use qna_forum::telemetry::init_tracing;
use qna_forum::votes::{VoteDirection, VoteTarget, cast_vote};

const DEFAULT_RATIO: usize = 100;
const QUESTION_RATIO: usize = 10;
const ANSWER_RATIO: usize = 100;
const VOTE_RATIO: usize = 200;
const SEED_PASSWORD: &str = "password";

const WORDS: [&str; 40] = [
    "rust", "python", "django", "sqlite", "async", "tokio", "rocket", "thread", "memory",
    "pointer", "borrow", "lifetime", "trait", "macro", "closure", "iterator", "vector", "string",
    "parser", "socket", "server", "client", "cache", "index", "query", "schema", "migration",
    "docker", "linux", "kernel", "compiler", "linker", "network", "protocol", "json", "regex",
    "testing", "logging", "config", "deploy",
];

const FIRST_NAMES: [&str; 12] = [
    "alex", "maria", "ivan", "olga", "sam", "kate", "nick", "anna", "leo", "nina", "max", "vera",
];

fn sentence(rng: &mut impl Rng, min: usize, max: usize) -> String {
    let len = rng.random_range(min..=max);
    let words: Vec<&str> = (0..len)
        .filter_map(|_| WORDS.choose(rng).copied())
        .collect();

    let mut text = words.join(" ");
    if let Some(first) = text.get(0..1) {
        text = first.to_uppercase() + &text[1..];
    }
    text
}

fn paragraph(rng: &mut impl Rng) -> String {
    let count = rng.random_range(2..=5);
    (0..count)
        .map(|_| sentence(rng, 5, 12) + ".")
        .collect::<Vec<_>>()
        .join(" ")
}

async fn generate_profiles(pool: &SqlitePool, count: usize) -> anyhow::Result<Vec<i64>> {
    println!("Generating {} profiles...", count);
    let password_hash = hash_password(SEED_PASSWORD)?;
    let mut rng = rand::rng();
    let mut profiles = Vec::with_capacity(count);

    for i in 0..count {
        let name = FIRST_NAMES.choose(&mut rng).copied().unwrap_or("user");
        let username = format!("{}{}_{}", name, rng.random_range(10..100), i);
        let email = format!("{}@example.com", username);
        let nickname = format!("{} {}", name, i);

        let (_, profile_id) =
            create_user_with_hash(pool, &username, &email, &password_hash, &nickname, None).await?;
        profiles.push(profile_id);
    }

    println!("Successfully created {} users", count);
    Ok(profiles)
}

fn generate_tags(count: usize) -> Vec<String> {
    println!("Generating {} tags...", count);
    let mut rng = rand::rng();

    (0..count)
        .map(|i| {
            let word = WORDS.choose(&mut rng).copied().unwrap_or("tag");
            format!("{}{}", word, i)
        })
        .collect()
}

async fn generate_questions(
    pool: &SqlitePool,
    count: usize,
    profiles: &[i64],
    tags: &[String],
) -> anyhow::Result<Vec<i64>> {
    println!("Generating {} questions...", count);
    let mut questions = Vec::with_capacity(count);

    for _ in 0..count {
        let (profile_id, title, text, question_tags) = {
            let mut rng = rand::rng();
            let profile_id = *profiles.choose(&mut rng).context("no profiles")?;
            let title = sentence(&mut rng, 4, 10) + "?";
            let text = paragraph(&mut rng);
            let tag_count = rng.random_range(1..=5).min(tags.len());
            let question_tags: Vec<String> = tags
                .choose_multiple(&mut rng, tag_count)
                .cloned()
                .collect();
            (profile_id, title, text, question_tags)
        };

        questions.push(create_question(pool, profile_id, &title, &text, &question_tags).await?);
    }

    println!("Successfully created {} questions", count);
    Ok(questions)
}

async fn generate_answers(
    pool: &SqlitePool,
    count: usize,
    profiles: &[i64],
    questions: &[i64],
) -> anyhow::Result<Vec<i64>> {
    println!("Generating {} answers...", count);
    let mut answers = Vec::with_capacity(count);

    for _ in 0..count {
        let (profile_id, question_id, text) = {
            let mut rng = rand::rng();
            (
                *profiles.choose(&mut rng).context("no profiles")?,
                *questions.choose(&mut rng).context("no questions")?,
                paragraph(&mut rng),
            )
        };

        answers.push(create_answer(pool, question_id, profile_id, &text).await?);
    }

    println!("Successfully created {} answers", count);
    Ok(answers)
}

/// Each round casts one question vote and one answer vote.
async fn generate_votes(
    pool: &SqlitePool,
    count: usize,
    profiles: &[i64],
    questions: &[i64],
    answers: &[i64],
) -> anyhow::Result<()> {
    println!("Generating {} votes...", count);

    for _ in 0..count / 2 {
        let (profile_id, question_id, answer_id, question_vote, answer_vote) = {
            let mut rng = rand::rng();
            let mut direction = || {
                if rng.random_bool(0.5) {
                    VoteDirection::Up
                } else {
                    VoteDirection::Down
                }
            };
            let (question_vote, answer_vote) = (direction(), direction());
            (
                *profiles.choose(&mut rng).context("no profiles")?,
                *questions.choose(&mut rng).context("no questions")?,
                *answers.choose(&mut rng).context("no answers")?,
                question_vote,
                answer_vote,
            )
        };

        cast_vote(pool, profile_id, VoteTarget::Question, question_id, question_vote).await?;
        cast_vote(pool, profile_id, VoteTarget::Answer, answer_id, answer_vote).await?;
    }

    println!("Successfully cast {} votes", count);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(err) = load_environment() {
        eprintln!("Failed to load environment files: {}", err);
    }
    init_tracing()?;

    let ratio = match std::env::args().nth(1) {
        Some(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("ratio must be a positive integer, got '{}'", raw))?,
        None => DEFAULT_RATIO,
    };
    if ratio == 0 {
        bail!("ratio must be a positive integer");
    }

    let config = ForumConfig::from_env()?;
    let pool = qna_forum::connect(&config)
        .await
        .map_err(|err| anyhow::anyhow!("{}", err))?;

    println!("Filling the database (ratio = {})", ratio);

    let profiles = generate_profiles(&pool, ratio).await?;
    let tags = generate_tags(ratio);
    let questions = generate_questions(&pool, ratio * QUESTION_RATIO, &profiles, &tags).await?;
    let answers = generate_answers(&pool, ratio * ANSWER_RATIO, &profiles, &questions).await?;
    generate_votes(&pool, ratio * VOTE_RATIO, &profiles, &questions, &answers).await?;

    Ok(())
}
