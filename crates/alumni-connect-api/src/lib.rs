use std::path::{Path, PathBuf};

use alumni_connect_core::{
    check_event_review, check_meeting_host, initial_event_status, project_directory,
    validate_body, CommentId, CommentRecord, ConnectError, DirectoryEntry, EventDecision, EventId,
    EventRecord, FileId, IdentityContext, LikeState, MeetingId, MeetingRecord, PostId, PostRecord,
    PostView, Role, StoredFile, TargetKind, UserId, UserRecord,
};
use alumni_connect_store_sqlite::{
    IntegrityReport, SchemaStatus, SqliteStore, StorageClient, UploadRequest,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};
use tracing::{debug, info};

pub const API_CONTRACT_VERSION: &str = "api.v1";
pub const DEFAULT_FEED_LIMIT: u32 = 50;
pub const MAX_FEED_LIMIT: u32 = 200;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterUserRequest {
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: String,
    pub role: Role,
    pub department: Option<String>,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: UserRecord,
    #[serde(rename = "fullName")]
    pub full_name: String,
}

impl From<UserRecord> for UserProfile {
    fn from(user: UserRecord) -> Self {
        let full_name = user.full_name();
        Self { user, full_name }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub approved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateEventRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub location: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub starts_at: OffsetDateTime,
    pub department: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewEventRequest {
    pub decision: EventDecision,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleMeetingRequest {
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    pub duration_minutes: u32,
    pub link: String,
    pub department: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatePostRequest {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddCommentRequest {
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct AlumniConnectApi {
    db_path: PathBuf,
}

impl AlumniConnectApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        let mut store = SqliteStore::open(&self.db_path)?;
        store.migrate()?;
        Ok(store)
    }

    fn open_bucket(&self) -> Result<StorageClient> {
        let mut bucket = StorageClient::new(self.db_path.clone());
        bucket.open()?;
        Ok(bucket)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = SqliteStore::open(&self.db_path)?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = SqliteStore::open(&self.db_path)?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        store.migrate()?;
        let after = store.schema_status()?;
        info!(
            from = before.current_version,
            to = after.current_version,
            "database migrated"
        );
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: before.pending_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Write a consistent copy of the database to `out_file`.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or the backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        let store = self.open_store()?;
        store.backup_database(out_file)?;
        info!(out = %out_file.display(), "database backup written");
        Ok(())
    }

    /// Replace the database with a backup and migrate it.
    ///
    /// # Errors
    /// Returns an error when the backup is missing or cannot be restored.
    pub fn restore_database(&self, in_file: &Path) -> Result<SchemaStatus> {
        let mut store = SqliteStore::open(&self.db_path)?;
        store.restore_database(in_file)?;
        info!(from = %in_file.display(), "database restored");
        store.schema_status()
    }

    /// Run `SQLite` integrity probes.
    ///
    /// # Errors
    /// Returns an error when a probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let store = SqliteStore::open(&self.db_path)?;
        store.integrity_check()
    }

    /// Resolve an upstream-authenticated user id into a request identity.
    ///
    /// # Errors
    /// Returns [`ConnectError::AuthenticationMissing`] when the user does not exist.
    pub fn identity(&self, user_id: UserId) -> Result<IdentityContext> {
        let store = self.open_store()?;
        let user = store.get_user(user_id)?.ok_or(ConnectError::AuthenticationMissing)?;
        Ok(user.identity())
    }

    /// Load the requester's own profile.
    ///
    /// # Errors
    /// Returns [`ConnectError::NotFound`] when the requester record vanished.
    pub fn profile(&self, identity: &IdentityContext) -> Result<UserProfile> {
        let store = self.open_store()?;
        let user = store
            .get_user(identity.user_id)?
            .ok_or_else(|| ConnectError::NotFound(format!("user {}", identity.user_id)))?;
        Ok(user.into())
    }

    /// Self-service registration. Alumni start unapproved.
    ///
    /// # Errors
    /// Returns [`ConnectError::Validation`] for privileged roles, invalid fields
    /// or an already registered email.
    pub fn register_user(&self, input: RegisterUserRequest) -> Result<UserProfile> {
        if !input.role.self_registrable() {
            return Err(ConnectError::Validation(format!(
                "role {} cannot self-register",
                input.role
            ))
            .into());
        }
        let approved = input.role != Role::Alumni;
        self.create_user(input, approved)
    }

    /// Operator-side user creation for any role.
    ///
    /// # Errors
    /// Returns [`ConnectError::Validation`] for invalid fields or a duplicate email.
    pub fn create_user(&self, input: RegisterUserRequest, approved: bool) -> Result<UserProfile> {
        let mut store = self.open_store()?;
        let user = UserRecord {
            user_id: UserId::new(),
            first_name: input.first_name.trim().to_string(),
            last_name: clean_label(input.last_name),
            email: input.email.trim().to_lowercase(),
            role: input.role,
            department: clean_label(input.department),
            branch: clean_label(input.branch),
            approved,
            created_at: OffsetDateTime::now_utc(),
        };
        store.insert_user(&user)?;
        info!(user_id = %user.user_id, role = %user.role, approved, "user created");
        Ok(user.into())
    }

    /// Approve or revoke an alumni registration.
    ///
    /// # Errors
    /// Returns [`ConnectError::Forbidden`] outside the requester's moderation scope,
    /// [`ConnectError::NotFound`] for unknown users, and [`ConnectError::Validation`]
    /// for non-alumni targets.
    pub fn approve_user(
        &self,
        identity: &IdentityContext,
        user_id: UserId,
        approved: bool,
    ) -> Result<UserProfile> {
        let mut store = self.open_store()?;
        let target = store
            .get_user(user_id)?
            .ok_or_else(|| ConnectError::NotFound(format!("user {user_id}")))?;
        if !identity.moderates_department(target.department.as_deref()) {
            return Err(ConnectError::Forbidden(format!(
                "{} cannot approve users of this department",
                identity.role
            ))
            .into());
        }
        if target.role != Role::Alumni {
            return Err(ConnectError::Validation(format!(
                "only alumni registrations need approval; user is {}",
                target.role
            ))
            .into());
        }

        let updated = store
            .set_user_approval(user_id, approved)?
            .ok_or_else(|| ConnectError::NotFound(format!("user {user_id}")))?;
        info!(user_id = %user_id, reviewer = %identity.user_id, approved, "alumni approval updated");
        Ok(updated.into())
    }

    /// Approved alumni visible to the requester.
    ///
    /// # Errors
    /// Returns an error when the directory query fails.
    pub fn list_alumni(&self, identity: &IdentityContext) -> Result<Vec<DirectoryEntry>> {
        self.directory(identity, TargetKind::AlumniDirectory)
    }

    /// Students visible to staff requesters.
    ///
    /// # Errors
    /// Returns [`ConnectError::Forbidden`] for students and alumni.
    pub fn list_students(&self, identity: &IdentityContext) -> Result<Vec<DirectoryEntry>> {
        if !identity.role.is_staff() {
            return Err(
                ConnectError::Forbidden(format!("{} cannot list students", identity.role)).into()
            );
        }
        self.directory(identity, TargetKind::StudentDirectory)
    }

    /// Alumni registrations awaiting approval in the requester's scope.
    ///
    /// # Errors
    /// Returns [`ConnectError::Forbidden`] for non-moderators.
    pub fn list_pending_alumni(&self, identity: &IdentityContext) -> Result<Vec<DirectoryEntry>> {
        if !identity.role.is_moderator() {
            return Err(ConnectError::Forbidden(format!(
                "{} cannot review registrations",
                identity.role
            ))
            .into());
        }
        self.directory(identity, TargetKind::PendingAlumni)
    }

    fn directory(
        &self,
        identity: &IdentityContext,
        target: TargetKind,
    ) -> Result<Vec<DirectoryEntry>> {
        let store = self.open_store()?;
        let predicate = identity.visibility(target);
        debug!(
            requester = %identity.user_id,
            role = %identity.role,
            target = target.as_str(),
            ?predicate,
            "evaluated directory visibility"
        );
        let users = store.list_users(&predicate)?;
        Ok(project_directory(&users))
    }

    /// Create an event; moderators' events start approved.
    ///
    /// # Errors
    /// Returns [`ConnectError::Forbidden`] for students and unapproved alumni,
    /// or [`ConnectError::Validation`] for a blank title.
    pub fn create_event(
        &self,
        identity: &IdentityContext,
        input: CreateEventRequest,
    ) -> Result<EventRecord> {
        let status = initial_event_status(identity)?;
        let mut store = self.open_store()?;
        let event = EventRecord {
            event_id: EventId::new(),
            title: input.title.trim().to_string(),
            description: input.description,
            location: clean_label(input.location),
            starts_at: input.starts_at.to_offset(UtcOffset::UTC),
            department: clean_label(input.department).or_else(|| identity.department.clone()),
            created_by: identity.user_id,
            status,
            reviewed_by: if identity.role.is_moderator() { Some(identity.user_id) } else { None },
            created_at: OffsetDateTime::now_utc(),
        };
        store.insert_event(&event)?;
        info!(event_id = %event.event_id, status = event.status.as_str(), "event created");
        Ok(event)
    }

    /// Approve or reject a pending event.
    ///
    /// # Errors
    /// Returns [`ConnectError::NotFound`], [`ConnectError::Forbidden`] or
    /// [`ConnectError::Validation`] per the review rules.
    pub fn review_event(
        &self,
        identity: &IdentityContext,
        event_id: EventId,
        input: ReviewEventRequest,
    ) -> Result<EventRecord> {
        let mut store = self.open_store()?;
        let event = store
            .get_event(event_id)?
            .ok_or_else(|| ConnectError::NotFound(format!("event {event_id}")))?;
        check_event_review(identity, &event)?;
        let reviewed = store.review_event(event_id, input.decision.status(), identity.user_id)?;
        info!(
            event_id = %event_id,
            reviewer = %identity.user_id,
            status = reviewed.status.as_str(),
            "event reviewed"
        );
        Ok(reviewed)
    }

    /// Events visible to the requester, earliest start first.
    ///
    /// # Errors
    /// Returns an error when the event query fails.
    pub fn list_events(&self, identity: &IdentityContext) -> Result<Vec<EventRecord>> {
        let store = self.open_store()?;
        let events = store.list_events()?;
        Ok(events.into_iter().filter(|event| event.visible_to(identity)).collect())
    }

    /// Schedule a meeting hosted by the requester.
    ///
    /// # Errors
    /// Returns [`ConnectError::Forbidden`] for students and unapproved alumni,
    /// or [`ConnectError::Validation`] for invalid meeting fields.
    pub fn schedule_meeting(
        &self,
        identity: &IdentityContext,
        input: ScheduleMeetingRequest,
    ) -> Result<MeetingRecord> {
        check_meeting_host(identity)?;
        let mut store = self.open_store()?;
        let meeting = MeetingRecord {
            meeting_id: MeetingId::new(),
            title: input.title.trim().to_string(),
            host: identity.user_id,
            scheduled_at: input.scheduled_at.to_offset(UtcOffset::UTC),
            duration_minutes: input.duration_minutes,
            link: input.link.trim().to_string(),
            department: clean_label(input.department).or_else(|| identity.department.clone()),
            created_at: OffsetDateTime::now_utc(),
        };
        store.insert_meeting(&meeting)?;
        info!(meeting_id = %meeting.meeting_id, host = %identity.user_id, "meeting scheduled");
        Ok(meeting)
    }

    /// Meetings visible to the requester, earliest first.
    ///
    /// # Errors
    /// Returns an error when the meeting query fails.
    pub fn list_meetings(&self, identity: &IdentityContext) -> Result<Vec<MeetingRecord>> {
        let store = self.open_store()?;
        let meetings = store.list_meetings()?;
        Ok(meetings.into_iter().filter(|meeting| meeting.visible_to(identity)).collect())
    }

    /// Publish a post.
    ///
    /// # Errors
    /// Returns [`ConnectError::Forbidden`] for unapproved alumni or
    /// [`ConnectError::Validation`] for an invalid body.
    pub fn create_post(
        &self,
        identity: &IdentityContext,
        input: CreatePostRequest,
    ) -> Result<PostRecord> {
        identity.require_active()?;
        validate_body("post", &input.body)?;
        let mut store = self.open_store()?;
        let post = PostRecord {
            post_id: PostId::new(),
            author: identity.user_id,
            body: input.body,
            created_at: OffsetDateTime::now_utc(),
        };
        store.insert_post(&post)?;
        info!(post_id = %post.post_id, author = %identity.user_id, "post created");
        Ok(post)
    }

    /// Comment on a post.
    ///
    /// # Errors
    /// Returns [`ConnectError::NotFound`] for unknown posts, plus the same
    /// failures as [`AlumniConnectApi::create_post`].
    pub fn add_comment(
        &self,
        identity: &IdentityContext,
        post_id: PostId,
        input: AddCommentRequest,
    ) -> Result<CommentRecord> {
        identity.require_active()?;
        validate_body("comment", &input.body)?;
        let mut store = self.open_store()?;
        let comment = CommentRecord {
            comment_id: CommentId::new(),
            post_id,
            author: identity.user_id,
            body: input.body,
            created_at: OffsetDateTime::now_utc(),
        };
        store.insert_comment(&comment)?;
        Ok(comment)
    }

    /// Toggle the requester's like on a post.
    ///
    /// # Errors
    /// Returns [`ConnectError::NotFound`] for unknown posts.
    pub fn toggle_like(&self, identity: &IdentityContext, post_id: PostId) -> Result<LikeState> {
        let mut store = self.open_store()?;
        store.toggle_like(post_id, identity.user_id)
    }

    /// Newest posts with comments and like state for the requester.
    ///
    /// # Errors
    /// Returns an error when the feed queries fail.
    pub fn feed(&self, identity: &IdentityContext, limit: Option<u32>) -> Result<Vec<PostView>> {
        let limit = limit.unwrap_or(DEFAULT_FEED_LIMIT).clamp(1, MAX_FEED_LIMIT);
        let store = self.open_store()?;
        store.list_post_feed(identity.user_id, limit)
    }

    /// Store an uploaded file in the bucket.
    ///
    /// # Errors
    /// Returns [`ConnectError::Forbidden`] for unapproved alumni, or a storage
    /// error when the upload fails.
    pub fn upload_file(
        &self,
        identity: &IdentityContext,
        filename: &str,
        content_type: Option<String>,
        bytes: &[u8],
    ) -> Result<StoredFile> {
        identity.require_active()?;
        let mut bucket = self.open_bucket()?;
        let stored = bucket.upload(
            UploadRequest {
                filename: filename.to_string(),
                content_type,
                uploaded_by: Some(identity.user_id),
            },
            bytes,
        )?;
        info!(
            file_id = %stored.file_id,
            length = stored.length,
            uploaded_by = %identity.user_id,
            "file uploaded"
        );
        Ok(stored)
    }

    /// Read a stored file.
    ///
    /// # Errors
    /// Returns a storage error when the file is unknown or unreadable.
    pub fn download_file(&self, file_id: FileId) -> Result<(StoredFile, Vec<u8>)> {
        let bucket = self.open_bucket()?;
        Ok(bucket.download(file_id)?)
    }
}

fn clean_label(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}
