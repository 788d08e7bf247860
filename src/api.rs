use std::borrow::Cow;

use chrono::Utc;
use rocket::State;
use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use serde_json::Value;
use sqlx::{Pool, Sqlite};
use validator::{Validate, ValidationError};

use crate::auth::{CurrentUser, OwnerAction, SESSION_COOKIE, User};
use crate::avatar::AvatarStore;
use crate::db::{
    authenticate_user, create_answer, create_question, create_user, create_user_session,
    get_answer_question_owner, get_answers_for_question, get_profile, get_question,
    get_tags_for_question, get_tags_for_questions, invalidate_session, parse_tag_list,
    set_avatar_image, toggle_answer_accepted, update_account, update_profile,
};
use crate::env::ForumConfig;
use crate::error::AppError;
use crate::feed::{self, Feed};
use crate::models::{Answer, Profile, ProfileActivity, Question, Tag, TagPopularity};
use crate::pagination::{Page, parse_page_number};
use crate::validation::{AppErrorExt, JsonValidateExt, TAG_LIST, ValidationResponse};
use crate::votes::{VoteDirection, VoteTarget, cast_vote, user_vote, user_votes};

pub const SIDEBAR_LIMIT: i64 = 7;

type ApiError = Custom<Json<ValidationResponse>>;

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut error = ValidationError::new("blank");
        error.message = Some(Cow::from("This field is required"));
        return Err(error);
    }
    Ok(())
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub profile_id: i64,
    pub nickname: String,
    pub avatar_url: String,
}

impl UserData {
    pub fn new(user: &User, profile: &Profile) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            profile_id: profile.id,
            nickname: profile.nickname.clone(),
            avatar_url: profile.avatar().url(),
        }
    }
}

impl From<&CurrentUser> for UserData {
    fn from(current: &CurrentUser) -> Self {
        Self::new(&current.user, &current.profile)
    }
}

fn start_session(cookies: &CookieJar<'_>, token: String, ttl_hours: i64) {
    cookies.add_private(
        Cookie::build((SESSION_COOKIE, token))
            .same_site(SameSite::Lax)
            .http_only(true)
            .max_age(rocket::time::Duration::hours(ttl_hours)),
    );
}

async fn open_session(
    db: &Pool<Sqlite>,
    cookies: &CookieJar<'_>,
    config: &ForumConfig,
    user_id: i64,
) -> Result<(), AppError> {
    let token = crate::auth::UserSession::generate_token();
    let expires_at = Utc::now() + chrono::Duration::hours(config.session_ttl_hours);

    create_user_session(db, user_id, &token, expires_at.naive_utc()).await?;
    start_session(cookies, token, config.session_ttl_hours);

    Ok(())
}

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub error: Option<String>,
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<ForumConfig>,
) -> Result<Json<LoginResponse>, ApiError> {
    let validated = login.validate_custom()?;

    match authenticate_user(db, &validated.username, &validated.password)
        .await
        .validate_custom()?
    {
        Some(user) => {
            open_session(db, cookies, config, user.id)
                .await
                .validate_custom()?;

            let profile = crate::db::get_profile_by_user(db, user.id)
                .await
                .validate_custom()?;

            Ok(Json(LoginResponse {
                success: true,
                user: Some(UserData::new(&user, &profile)),
                error: None,
            }))
        }
        None => Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some("Invalid username or password".to_string()),
        })),
    }
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &State<Pool<Sqlite>>) -> Json<Value> {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(err) = invalidate_session(db, &token).await {
            err.log_and_record("Logout");
        }
    }

    cookies.remove_private(Cookie::from(SESSION_COOKIE));

    Json(serde_json::json!({ "success": true }))
}

#[get("/me")]
pub async fn api_me(user: CurrentUser) -> Json<UserData> {
    Json(UserData::from(&user))
}

#[derive(Deserialize, Validate)]
#[validate(schema(function = "passwords_match", skip_on_field_errors = false))]
pub struct RegisterRequest {
    #[validate(
        length(min = 1, max = 100, message = "Username must be 1-100 characters"),
        custom(function = "not_blank")
    )]
    username: String,
    #[validate(email(message = "Enter a valid email address"))]
    email: String,
    #[validate(
        length(min = 1, max = 100, message = "Nickname must be 1-100 characters"),
        custom(function = "not_blank")
    )]
    nickname: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
    password2: String,
    #[validate(url(message = "Avatar URL must be a valid URL"))]
    avatar_url: Option<String>,
}

fn passwords_match(request: &RegisterRequest) -> Result<(), ValidationError> {
    if request.password != request.password2 {
        let mut error = ValidationError::new("password_mismatch");
        error.message = Some(Cow::from("Passwords do not match"));
        return Err(error);
    }
    Ok(())
}

#[post("/register", data = "<registration>")]
pub async fn api_register(
    registration: Json<RegisterRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<ForumConfig>,
) -> Result<Custom<Json<UserData>>, ApiError> {
    let validated = registration.validate_custom()?;
    let username = validated.username.trim();
    let nickname = validated.nickname.trim();

    let (user_id, profile_id) = create_user(
        db,
        username,
        &validated.email,
        &validated.password,
        nickname,
        validated.avatar_url.as_deref(),
    )
    .await
    .validate_custom()?;

    open_session(db, cookies, config, user_id)
        .await
        .validate_custom()?;

    let user = crate::db::get_user(db, user_id).await.validate_custom()?;
    let profile = get_profile(db, profile_id).await.validate_custom()?;

    Ok(Custom(Status::Created, Json(UserData::new(&user, &profile))))
}

#[derive(Deserialize, Validate)]
pub struct ProfileUpdateRequest {
    #[validate(
        length(min = 1, max = 100, message = "Username must be 1-100 characters"),
        custom(function = "not_blank")
    )]
    username: String,
    #[validate(email(message = "Enter a valid email address"))]
    email: String,
    #[validate(
        length(min = 1, max = 100, message = "Nickname must be 1-100 characters"),
        custom(function = "not_blank")
    )]
    nickname: String,
    #[validate(url(message = "Avatar URL must be a valid URL"))]
    avatar_url: Option<String>,
}

#[put("/profile", data = "<update>")]
pub async fn api_update_profile(
    update: Json<ProfileUpdateRequest>,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<UserData>, ApiError> {
    let validated = update.validate_custom()?;

    update_account(db, user.user.id, validated.username.trim(), &validated.email)
        .await
        .validate_custom()?;
    update_profile(
        db,
        user.profile.id,
        validated.nickname.trim(),
        validated.avatar_url.as_deref(),
    )
    .await
    .validate_custom()?;

    let account = crate::db::get_user(db, user.user.id)
        .await
        .validate_custom()?;
    let profile = get_profile(db, user.profile.id).await.validate_custom()?;

    Ok(Json(UserData::new(&account, &profile)))
}

#[derive(FromForm)]
pub struct AvatarUpload<'r> {
    avatar: TempFile<'r>,
}

#[post("/profile/avatar", data = "<upload>")]
pub async fn api_upload_avatar(
    user: CurrentUser,
    mut upload: Form<AvatarUpload<'_>>,
    db: &State<Pool<Sqlite>>,
    store: &State<AvatarStore>,
) -> Result<Json<UserData>, ApiError> {
    let filename = store
        .save(user.user.id, &mut upload.avatar)
        .await
        .validate_custom()?;

    let previous = match set_avatar_image(db, user.profile.id, &filename).await {
        Ok(previous) => previous,
        Err(err) => {
            store.remove(&filename).await;
            return Err(err).validate_custom();
        }
    };

    if let Some(previous) = previous {
        store.remove(&previous).await;
    }

    let profile = get_profile(db, user.profile.id).await.validate_custom()?;
    Ok(Json(UserData::new(&user.user, &profile)))
}

#[derive(Serialize)]
pub struct QuestionItem {
    #[serde(flatten)]
    pub question: Question,
    pub tags: Vec<Tag>,
    pub user_vote: Option<VoteDirection>,
}

#[derive(Serialize)]
pub struct FeedResponse {
    pub feed: &'static str,
    pub query: Option<String>,
    pub tag: Option<String>,
    pub page: Page<QuestionItem>,
}

/// Attaches tags and the caller's own votes to a page of questions.
async fn enrich_page(
    db: &Pool<Sqlite>,
    user: Option<&CurrentUser>,
    page: Page<Question>,
) -> Result<Page<QuestionItem>, AppError> {
    let ids: Vec<i64> = page.items.iter().map(|q| q.id).collect();
    let mut tags = get_tags_for_questions(db, &ids).await?;
    let votes = match user {
        Some(user) => user_votes(db, user.profile_id(), VoteTarget::Question, &ids).await?,
        None => Default::default(),
    };

    Ok(page.map(|question| QuestionItem {
        tags: tags.remove(&question.id).unwrap_or_default(),
        user_vote: votes.get(&question.id).copied(),
        question,
    }))
}

async fn feed_response(
    db: &Pool<Sqlite>,
    config: &ForumConfig,
    user: Option<&CurrentUser>,
    feed: Feed,
    page: Option<&str>,
) -> Result<FeedResponse, AppError> {
    let page = feed
        .page(db, parse_page_number(page), config.page_size)
        .await?;
    let page = enrich_page(db, user, page).await?;

    let (query, tag) = match &feed {
        Feed::Search(query) => (Some(query.clone()), None),
        Feed::Tagged(tag) => (None, Some(tag.clone())),
        _ => (None, None),
    };

    Ok(FeedResponse {
        feed: feed.name(),
        query,
        tag,
        page,
    })
}

#[get("/questions?<page>&<q>")]
pub async fn api_questions(
    page: Option<&str>,
    q: Option<&str>,
    user: Option<CurrentUser>,
    db: &State<Pool<Sqlite>>,
    config: &State<ForumConfig>,
) -> Result<Json<FeedResponse>, AppError> {
    let feed = match q.map(str::trim).filter(|q| !q.is_empty()) {
        Some(query) => feed::search(query),
        None => feed::recent(),
    };

    Ok(Json(
        feed_response(db, config, user.as_ref(), feed, page).await?,
    ))
}

#[get("/questions/hot?<page>")]
pub async fn api_hot_questions(
    page: Option<&str>,
    user: Option<CurrentUser>,
    db: &State<Pool<Sqlite>>,
    config: &State<ForumConfig>,
) -> Result<Json<FeedResponse>, AppError> {
    Ok(Json(
        feed_response(db, config, user.as_ref(), feed::most_upvoted(), page).await?,
    ))
}

#[get("/tags/<name>/questions?<page>")]
pub async fn api_tag_questions(
    name: &str,
    page: Option<&str>,
    user: Option<CurrentUser>,
    db: &State<Pool<Sqlite>>,
    config: &State<ForumConfig>,
) -> Result<Json<FeedResponse>, AppError> {
    if !feed::tag_exists(db, name).await? {
        return Err(AppError::NotFound(format!("Tag '{}' does not exist", name)));
    }

    Ok(Json(
        feed_response(db, config, user.as_ref(), feed::by_tag(name), page).await?,
    ))
}

#[derive(Serialize)]
pub struct AnswerItem {
    #[serde(flatten)]
    pub answer: Answer,
    pub user_vote: Option<VoteDirection>,
}

#[derive(Serialize)]
pub struct QuestionDetailResponse {
    pub question: QuestionItem,
    pub answers: Vec<AnswerItem>,
    pub can_accept: bool,
}

#[get("/questions/<id>")]
pub async fn api_question_detail(
    id: i64,
    user: Option<CurrentUser>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<QuestionDetailResponse>, AppError> {
    let question = get_question(db, id).await?;
    let tags = get_tags_for_question(db, id).await?;
    let answers = get_answers_for_question(db, id).await?;

    let (question_vote, answer_votes) = match &user {
        Some(user) => {
            let answer_ids: Vec<i64> = answers.iter().map(|a| a.id).collect();
            (
                user_vote(db, user.profile_id(), VoteTarget::Question, id).await?,
                user_votes(db, user.profile_id(), VoteTarget::Answer, &answer_ids).await?,
            )
        }
        None => (None, Default::default()),
    };

    let can_accept = user
        .as_ref()
        .is_some_and(|user| user.owns(question.author.profile_id));

    Ok(Json(QuestionDetailResponse {
        question: QuestionItem {
            question,
            tags,
            user_vote: question_vote,
        },
        answers: answers
            .into_iter()
            .map(|answer| AnswerItem {
                user_vote: answer_votes.get(&answer.id).copied(),
                answer,
            })
            .collect(),
        can_accept,
    }))
}

#[derive(Deserialize, Validate)]
pub struct QuestionRequest {
    #[validate(
        length(min = 1, max = 255, message = "Title must be 1-255 characters"),
        custom(function = "not_blank")
    )]
    title: String,
    #[validate(custom(function = "not_blank"))]
    text: String,
    #[serde(default)]
    #[validate(regex(path = *TAG_LIST, message = "Invalid tags format"))]
    tags: String,
}

#[derive(Serialize, Deserialize)]
pub struct CreatedResponse {
    pub success: bool,
    pub id: i64,
}

#[post("/questions", data = "<question>")]
pub async fn api_ask_question(
    question: Json<QuestionRequest>,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<CreatedResponse>>, ApiError> {
    let validated = question.validate_custom()?;
    let tags = parse_tag_list(&validated.tags).validate_custom()?;

    let id = create_question(
        db,
        user.profile_id(),
        validated.title.trim(),
        &validated.text,
        &tags,
    )
    .await
    .validate_custom()?;

    Ok(Custom(
        Status::Created,
        Json(CreatedResponse { success: true, id }),
    ))
}

#[derive(Deserialize, Validate)]
pub struct AnswerRequest {
    #[validate(custom(function = "not_blank"))]
    text: String,
}

#[post("/questions/<id>/answers", data = "<answer>")]
pub async fn api_post_answer(
    id: i64,
    answer: Json<AnswerRequest>,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<CreatedResponse>>, ApiError> {
    let validated = answer.validate_custom()?;

    let answer_id = create_answer(db, id, user.profile_id(), &validated.text)
        .await
        .validate_custom()?;

    Ok(Custom(
        Status::Created,
        Json(CreatedResponse {
            success: true,
            id: answer_id,
        }),
    ))
}

#[derive(Deserialize)]
pub struct VoteRequest {
    #[serde(default)]
    object_type: Option<String>,
    #[serde(default)]
    object_id: Option<Value>,
    #[serde(default)]
    vote_type: Option<String>,
}

/// Accepts the id as a JSON number or a numeric string.
fn parse_object_id(raw: Option<&Value>) -> Result<i64, AppError> {
    let id = match raw {
        Some(Value::Number(number)) => number.as_i64(),
        Some(Value::String(text)) => text.trim().parse::<i64>().ok(),
        _ => None,
    };

    id.filter(|id| *id > 0)
        .ok_or_else(|| AppError::Validation("object_id must be a positive integer".to_string()))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct VoteResponse {
    pub success: bool,
    pub new_rating: i64,
    pub user_vote: Option<VoteDirection>,
}

#[post("/vote", data = "<vote>")]
pub async fn api_vote(
    user: CurrentUser,
    vote: Result<Json<VoteRequest>, rocket::serde::json::Error<'_>>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<VoteResponse>, ApiError> {
    let vote = vote
        .map_err(|err| AppError::Validation(format!("Malformed vote body: {}", err)))
        .validate_custom()?
        .into_inner();

    let target: VoteTarget = vote
        .object_type
        .as_deref()
        .unwrap_or_default()
        .parse::<VoteTarget>()
        .validate_custom()?;
    let direction: VoteDirection = vote
        .vote_type
        .as_deref()
        .unwrap_or_default()
        .parse::<VoteDirection>()
        .validate_custom()?;
    let target_id = parse_object_id(vote.object_id.as_ref()).validate_custom()?;

    let outcome = cast_vote(db, user.profile_id(), target, target_id, direction)
        .await
        .validate_custom()?;

    Ok(Json(VoteResponse {
        success: true,
        new_rating: outcome.new_total,
        user_vote: outcome.user_vote,
    }))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AcceptResponse {
    pub success: bool,
    pub is_correct: bool,
}

#[post("/answer/<id>/accept")]
pub async fn api_accept_answer(
    id: i64,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AcceptResponse>, ApiError> {
    let owner = get_answer_question_owner(db, id).await.validate_custom()?;
    user.require_owner(owner, OwnerAction::AcceptAnswer)
        .validate_custom()?;

    let accepted = toggle_answer_accepted(db, id).await.validate_custom()?;

    Ok(Json(AcceptResponse {
        success: true,
        is_correct: accepted,
    }))
}

#[derive(Serialize)]
pub struct SidebarResponse {
    pub tags: Vec<TagPopularity>,
    pub profiles: Vec<ProfileActivity>,
}

#[get("/sidebar")]
pub async fn api_sidebar(db: &State<Pool<Sqlite>>) -> Result<Json<SidebarResponse>, AppError> {
    let tags = feed::most_popular_tags(db, SIDEBAR_LIMIT).await?;
    let profiles = feed::most_active_profiles(db, SIDEBAR_LIMIT).await?;

    Ok(Json(SidebarResponse { tags, profiles }))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}
