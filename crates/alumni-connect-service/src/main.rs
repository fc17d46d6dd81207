mod config;

use anyhow::Result;
use alumni_connect_api::{
    AddCommentRequest, AlumniConnectApi, ApprovalRequest, CreateEventRequest, CreatePostRequest,
    MigrateResult, RegisterUserRequest, ReviewEventRequest, ScheduleMeetingRequest, UserProfile,
};
use alumni_connect_core::{
    CommentRecord, ConnectError, DirectoryEntry, EventId, EventRecord, FileId, IdentityContext,
    LikeState, MeetingRecord, PostId, PostRecord, PostView, StoredFile, UserId,
};
use alumni_connect_store_sqlite::{SchemaStatus, StorageError};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, FromRequestParts, Path, Query, State};
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Args, ServiceConfig};

const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");
const USER_ID_HEADER: &str = "x-user-id";
const FILE_NAME_HEADER: &str = "x-file-name";
const FILE_SHA256_HEADER: &str = "x-file-sha256";

#[derive(Debug, Clone)]
struct ServiceState {
    api: AlumniConnectApi,
    max_upload_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    status: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct FailBody {
    status: &'static str,
    message: String,
}

/// Any handler failure. Typed domain causes map to client statuses; the rest
/// become an empty 500.
#[derive(Debug)]
struct ServiceError(anyhow::Error);

impl<E> From<E> for ServiceError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl ServiceError {
    fn classify(&self) -> Option<(StatusCode, String)> {
        for cause in self.0.chain() {
            if let Some(err) = cause.downcast_ref::<ConnectError>() {
                let status = match err {
                    ConnectError::Validation(_) => StatusCode::BAD_REQUEST,
                    ConnectError::AuthenticationMissing => StatusCode::UNAUTHORIZED,
                    ConnectError::Forbidden(_) => StatusCode::FORBIDDEN,
                    ConnectError::NotFound(_) => StatusCode::NOT_FOUND,
                };
                return Some((status, err.to_string()));
            }
            if let Some(err) = cause.downcast_ref::<StorageError>() {
                let status = match err {
                    StorageError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
                    StorageError::FileNotFound(_) => StatusCode::NOT_FOUND,
                    StorageError::Validation(_) => StatusCode::BAD_REQUEST,
                    StorageError::Corrupt(_) | StorageError::Sqlite(_) | StorageError::Io(_) => {
                        return None;
                    }
                };
                return Some((status, err.to_string()));
            }
        }
        None
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        match self.classify() {
            Some((status, message)) => {
                if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
                    warn!(%status, %message, "request rejected");
                }
                (status, Json(FailBody { status: "fail", message })).into_response()
            }
            None => {
                error!(error = %format!("{:#}", self.0), "request failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// Identity forwarded by the upstream authenticator in `x-user-id`.
struct Requester(IdentityContext);

#[axum::async_trait]
impl FromRequestParts<ServiceState> for Requester {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServiceState,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| UserId::parse(raw).ok())
            .ok_or(ConnectError::AuthenticationMissing)?;
        let identity = state.api.identity(user_id)?;
        Ok(Self(identity))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct AlumniDirectory {
    alumni: Vec<DirectoryEntry>,
}

#[derive(Debug, Clone, Serialize)]
struct StudentDirectory {
    students: Vec<DirectoryEntry>,
}

#[derive(Debug, Clone, Serialize)]
struct PendingQueue {
    pending: Vec<DirectoryEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct FeedQuery {
    limit: Option<u32>,
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope { status: "success", data }
}

type JsonResult<T> = Result<Json<ServiceEnvelope<T>>, ServiceError>;
type CreatedResult<T> = Result<(StatusCode, Json<ServiceEnvelope<T>>), ServiceError>;

fn app(state: ServiceState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/users/register", post(users_register))
        .route("/users/me", get(users_me))
        .route("/users/alumni", get(users_alumni))
        .route("/users/students", get(users_students))
        .route("/users/pending", get(users_pending))
        .route("/users/:user_id/approval", post(users_approval))
        .route("/events", get(events_list).post(events_create))
        .route("/events/:event_id/review", post(events_review))
        .route("/meetings", get(meetings_list).post(meetings_schedule))
        .route("/posts", get(posts_feed).post(posts_create))
        .route("/posts/:post_id/comments", post(posts_comment))
        .route("/posts/:post_id/like", post(posts_like))
        .route("/files", post(files_upload))
        .route("/files/:file_id", get(files_download))
        .layer(body_limit)
        .with_state(state)
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::load(Args::parse())?;
    init_tracing(&config.log_filter);

    let state = ServiceState {
        api: AlumniConnectApi::new(config.db.clone()),
        max_upload_bytes: config.max_upload_bytes,
    };
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(bind = %config.bind, db = %config.db.display(), "alumni connect service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(State(state): State<ServiceState>) -> JsonResult<SchemaStatus> {
    Ok(Json(envelope(state.api.schema_status()?)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> JsonResult<MigrateResult> {
    Ok(Json(envelope(state.api.migrate(request.dry_run)?)))
}

async fn users_register(
    State(state): State<ServiceState>,
    Json(request): Json<RegisterUserRequest>,
) -> CreatedResult<UserProfile> {
    let profile = state.api.register_user(request)?;
    Ok((StatusCode::CREATED, Json(envelope(profile))))
}

async fn users_me(
    State(state): State<ServiceState>,
    Requester(identity): Requester,
) -> JsonResult<UserProfile> {
    Ok(Json(envelope(state.api.profile(&identity)?)))
}

async fn users_alumni(
    State(state): State<ServiceState>,
    Requester(identity): Requester,
) -> JsonResult<AlumniDirectory> {
    let alumni = state.api.list_alumni(&identity)?;
    Ok(Json(envelope(AlumniDirectory { alumni })))
}

async fn users_students(
    State(state): State<ServiceState>,
    Requester(identity): Requester,
) -> JsonResult<StudentDirectory> {
    let students = state.api.list_students(&identity)?;
    Ok(Json(envelope(StudentDirectory { students })))
}

async fn users_pending(
    State(state): State<ServiceState>,
    Requester(identity): Requester,
) -> JsonResult<PendingQueue> {
    let pending = state.api.list_pending_alumni(&identity)?;
    Ok(Json(envelope(PendingQueue { pending })))
}

async fn users_approval(
    State(state): State<ServiceState>,
    Requester(identity): Requester,
    Path(user_id): Path<String>,
    Json(request): Json<ApprovalRequest>,
) -> JsonResult<UserProfile> {
    let user_id = UserId::parse(&user_id)?;
    Ok(Json(envelope(state.api.approve_user(&identity, user_id, request.approved)?)))
}

async fn events_list(
    State(state): State<ServiceState>,
    Requester(identity): Requester,
) -> JsonResult<Vec<EventRecord>> {
    Ok(Json(envelope(state.api.list_events(&identity)?)))
}

async fn events_create(
    State(state): State<ServiceState>,
    Requester(identity): Requester,
    Json(request): Json<CreateEventRequest>,
) -> CreatedResult<EventRecord> {
    let event = state.api.create_event(&identity, request)?;
    Ok((StatusCode::CREATED, Json(envelope(event))))
}

async fn events_review(
    State(state): State<ServiceState>,
    Requester(identity): Requester,
    Path(event_id): Path<String>,
    Json(request): Json<ReviewEventRequest>,
) -> JsonResult<EventRecord> {
    let event_id = EventId::parse(&event_id)?;
    Ok(Json(envelope(state.api.review_event(&identity, event_id, request)?)))
}

async fn meetings_list(
    State(state): State<ServiceState>,
    Requester(identity): Requester,
) -> JsonResult<Vec<MeetingRecord>> {
    Ok(Json(envelope(state.api.list_meetings(&identity)?)))
}

async fn meetings_schedule(
    State(state): State<ServiceState>,
    Requester(identity): Requester,
    Json(request): Json<ScheduleMeetingRequest>,
) -> CreatedResult<MeetingRecord> {
    let meeting = state.api.schedule_meeting(&identity, request)?;
    Ok((StatusCode::CREATED, Json(envelope(meeting))))
}

async fn posts_feed(
    State(state): State<ServiceState>,
    Requester(identity): Requester,
    Query(query): Query<FeedQuery>,
) -> JsonResult<Vec<PostView>> {
    Ok(Json(envelope(state.api.feed(&identity, query.limit)?)))
}

async fn posts_create(
    State(state): State<ServiceState>,
    Requester(identity): Requester,
    Json(request): Json<CreatePostRequest>,
) -> CreatedResult<PostRecord> {
    let post = state.api.create_post(&identity, request)?;
    Ok((StatusCode::CREATED, Json(envelope(post))))
}

async fn posts_comment(
    State(state): State<ServiceState>,
    Requester(identity): Requester,
    Path(post_id): Path<String>,
    Json(request): Json<AddCommentRequest>,
) -> CreatedResult<CommentRecord> {
    let post_id = PostId::parse(&post_id)?;
    let comment = state.api.add_comment(&identity, post_id, request)?;
    Ok((StatusCode::CREATED, Json(envelope(comment))))
}

async fn posts_like(
    State(state): State<ServiceState>,
    Requester(identity): Requester,
    Path(post_id): Path<String>,
) -> JsonResult<LikeState> {
    let post_id = PostId::parse(&post_id)?;
    Ok(Json(envelope(state.api.toggle_like(&identity, post_id)?)))
}

async fn files_upload(
    State(state): State<ServiceState>,
    Requester(identity): Requester,
    headers: HeaderMap,
    body: Bytes,
) -> CreatedResult<StoredFile> {
    let filename = headers
        .get(FILE_NAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ConnectError::Validation(format!("{FILE_NAME_HEADER} header is required")))?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let stored = state.api.upload_file(&identity, filename, content_type, &body)?;
    Ok((StatusCode::CREATED, Json(envelope(stored))))
}

async fn files_download(
    State(state): State<ServiceState>,
    Requester(_identity): Requester,
    Path(file_id): Path<String>,
) -> Result<Response, ServiceError> {
    let file_id = FileId::parse(&file_id)?;
    let (metadata, bytes) = state.api.download_file(file_id)?;
    let headers = [
        (header::CONTENT_TYPE, metadata.content_type),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", metadata.filename.replace('"', "_")),
        ),
        (HeaderName::from_static(FILE_SHA256_HEADER), metadata.sha256),
    ];
    Ok((StatusCode::OK, headers, bytes).into_response())
}
