use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Request, State, rejection::JsonRejection},
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use chrono::{Local, NaiveDate};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

use crate::functions::{
    ChatRequest, ChatResponse, FunctionError, Functions, MealPlanResponse, RecipesResponse,
};
use nutrisense_core::db::Database;
use nutrisense_core::mealplan::MealPlanPreferences;
use nutrisense_core::models::{
    HealthEntry, MealPlan, NewHealthEntry, NewMealPlan, Profile, ProfileUpdate, new_user_id,
    validate_activity_level, validate_gender, week_start,
};
use nutrisense_core::realtime::{ChangeFeed, ChangeFilter};
use nutrisense_core::spoonacular::RecipeQuery;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Database>>,
    feed: ChangeFeed,
    functions: Arc<Functions>,
    api_key: Option<String>,
}

impl AppState {
    fn new(db: Database, functions: Functions, api_key: Option<String>) -> Self {
        let feed = db.feed().clone();
        Self {
            db: Arc::new(Mutex::new(db)),
            feed,
            functions: Arc::new(functions),
            api_key,
        }
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct SignupRequest {
    user_id: Option<String>,
}

#[derive(Deserialize)]
struct CreateHealthRequest {
    date: Option<String>,
    steps: Option<i64>,
    sleep_hours: Option<f64>,
    mood: Option<i64>,
}

#[derive(Deserialize)]
struct CreateMealPlanRequest {
    week_start_date: Option<String>,
    meals: Value,
    grocery_list: Option<Value>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                tracing::error!(error = %format!("{err:#}"), "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

fn invalid_body(rejection: &JsonRejection) -> FunctionError {
    FunctionError::Validation(rejection.body_text())
}

fn parse_request_date(raw: Option<&str>) -> Result<NaiveDate, ApiError> {
    match raw {
        None => Ok(Local::now().date_naive()),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| ApiError::BadRequest(format!("Invalid date '{s}'. Use YYYY-MM-DD"))),
    }
}

fn ensure_user(db: &Database, user_id: &str) -> Result<(), ApiError> {
    if db.profile_exists(user_id).context("database error")? {
        Ok(())
    } else {
        Err(ApiError::NotFound(format!("No profile for user '{user_id}'")))
    }
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
            header::CONTENT_TYPE,
        ])
}

// --- Proxy functions ---

async fn generate_meal_plan(
    State(state): State<AppState>,
    payload: Result<Json<MealPlanPreferences>, JsonRejection>,
) -> Result<Json<MealPlanResponse>, FunctionError> {
    let Json(prefs) = payload.map_err(|r| invalid_body(&r))?;
    state.functions.generate_meal_plan(&prefs).await.map(Json)
}

async fn nutritionist_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, FunctionError> {
    let Json(request) = payload.map_err(|r| invalid_body(&r))?;
    state.functions.chat(&request).await.map(Json)
}

async fn recipe_suggestions(
    State(state): State<AppState>,
    payload: Result<Json<RecipeQuery>, JsonRejection>,
) -> Result<Json<RecipesResponse>, FunctionError> {
    let Json(query) = payload.map_err(|r| invalid_body(&r))?;
    state.functions.recipe_suggestions(&query).await.map(Json)
}

// --- Data API ---

async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Profile>), ApiError> {
    let Json(req) = payload?;
    let user_id = match req.user_id {
        Some(id) if id.trim().is_empty() => {
            return Err(ApiError::BadRequest("user_id must not be empty".to_string()));
        }
        Some(id) => id.trim().to_string(),
        None => new_user_id(),
    };
    let profile = state
        .db()
        .create_profile(&user_id)
        .context("database error")?;
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Profile>, ApiError> {
    let profile = state.db().get_profile(&user_id).context("database error")?;
    profile
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No profile for user '{user_id}'")))
}

async fn update_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    payload: Result<Json<ProfileUpdate>, JsonRejection>,
) -> Result<Json<Profile>, ApiError> {
    let Json(mut update) = payload?;
    if let Some(Some(level)) = &update.activity_level {
        let level = validate_activity_level(level).map_err(|e| ApiError::BadRequest(e.to_string()))?;
        update.activity_level = Some(Some(level));
    }
    if let Some(Some(gender)) = &update.gender {
        let gender = validate_gender(gender).map_err(|e| ApiError::BadRequest(e.to_string()))?;
        update.gender = Some(Some(gender));
    }

    let db = state.db();
    ensure_user(&db, &user_id)?;
    let profile = db
        .update_profile(&user_id, &update)
        .context("database error")?;
    Ok(Json(profile))
}

async fn list_health(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<HealthEntry>>, ApiError> {
    let db = state.db();
    ensure_user(&db, &user_id)?;
    let entries = db
        .list_health_entries(&user_id)
        .context("database error")?;
    Ok(Json(entries))
}

async fn create_health(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    payload: Result<Json<CreateHealthRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<HealthEntry>), ApiError> {
    let Json(req) = payload?;
    let entry = NewHealthEntry {
        date: parse_request_date(req.date.as_deref())?,
        steps: req.steps,
        sleep_hours: req.sleep_hours,
        mood: req.mood,
    };

    let db = state.db();
    ensure_user(&db, &user_id)?;
    let created = db
        .insert_health_entry(&user_id, &entry)
        .context("database error")?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_meal_plans(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<MealPlan>>, ApiError> {
    let db = state.db();
    ensure_user(&db, &user_id)?;
    let plans = db.list_meal_plans(&user_id).context("database error")?;
    Ok(Json(plans))
}

async fn create_meal_plan(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    payload: Result<Json<CreateMealPlanRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MealPlan>), ApiError> {
    let Json(req) = payload?;
    if !req.meals.is_object() {
        return Err(ApiError::BadRequest("meals must be a JSON object".to_string()));
    }
    let week_start_date = match req.week_start_date.as_deref() {
        Some(raw) => parse_request_date(Some(raw))?,
        None => week_start(Local::now().date_naive()),
    };
    let plan = NewMealPlan {
        week_start_date,
        meals: req.meals,
        grocery_list: req.grocery_list.filter(|g| !g.is_null()),
    };

    let db = state.db();
    ensure_user(&db, &user_id)?;
    let created = db
        .insert_meal_plan(&user_id, &plan)
        .context("database error")?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_meal_plan(
    State(state): State<AppState>,
    Path((user_id, id)): Path<(String, String)>,
) -> Result<Json<MealPlan>, ApiError> {
    let plan = state
        .db()
        .get_meal_plan(&user_id, &id)
        .context("database error")?;
    plan.map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Meal plan '{id}' not found")))
}

/// Server-sent events carrying every change to the user's rows.
async fn change_stream(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    ensure_user(&state.db(), &user_id)?;

    let channel = format!("sse-{user_id}-{:016x}", rand::random::<u64>());
    let mut subscription = state
        .feed
        .subscribe(channel, ChangeFilter::all_tables(&user_id))
        .context("failed to open change channel")?;
    tracing::info!(user = %user_id, "change stream connected");

    let stream = async_stream::stream! {
        yield Ok::<_, Infallible>(Event::default().event("connected").data(user_id.clone()));

        while let Some(change) = subscription.next().await {
            match Event::default().event("change").json_data(&change) {
                Ok(event) => yield Ok(event),
                Err(e) => tracing::warn!(error = %e, "failed to encode change event"),
            }
        }
        tracing::info!(user = %user_id, "change stream closed");
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/functions/v1/generate-meal-plan", post(generate_meal_plan))
        .route(
            "/functions/v1/ai-nutritionist-chat",
            post(nutritionist_chat),
        )
        .route(
            "/functions/v1/get-recipe-suggestions",
            post(recipe_suggestions),
        )
        .route("/api/users", post(signup))
        .route(
            "/api/users/{user_id}/profile",
            get(get_profile).put(update_profile),
        )
        .route(
            "/api/users/{user_id}/health",
            get(list_health).post(create_health),
        )
        .route(
            "/api/users/{user_id}/meal-plans",
            get(list_meal_plans).post(create_meal_plan),
        )
        .route("/api/users/{user_id}/meal-plans/{id}", get(get_meal_plan))
        .route("/api/users/{user_id}/changes", get(change_stream))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .layer(cors_layer())
        .with_state(state)
}

// --- Server startup ---

/// First and last four characters of the key, or a mask when it is too short to split.
fn key_hint(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

pub async fn start_server(
    db: Database,
    functions: Functions,
    port: u16,
    bind: &str,
    api_key: Option<String>,
) -> anyhow::Result<()> {
    let state = AppState::new(db, functions, api_key.clone());
    let app = build_router(state);

    if let Some(ref key) = api_key {
        eprintln!(
            "API key: {} (see api_key file in data directory)",
            key_hint(key)
        );
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    eprintln!("Listening on http://{bind}:{port}");
    tracing::info!(%bind, port, "server started");
    axum::serve(listener, app).await?;

    Ok(())
}
