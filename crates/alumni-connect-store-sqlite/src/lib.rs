use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use alumni_connect_core::{
    full_name, normalize_key, CommentId, CommentRecord, CommentView, ConnectError, EventId,
    EventRecord, EventStatus, LikeState, MeetingId, MeetingRecord, PostId, PostRecord, PostView,
    Role, UserId, UserRecord, VisibilityPredicate,
};
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, DatabaseName, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};
use ulid::Ulid;

mod bucket;

pub use bucket::{StorageClient, StorageError, UploadRequest, DEFAULT_CHUNK_SIZE};

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS users (
  user_id TEXT PRIMARY KEY,
  first_name TEXT NOT NULL,
  last_name TEXT,
  email TEXT NOT NULL UNIQUE,
  role TEXT NOT NULL CHECK (role IN ('student','alumni','professor','collegeadmin','admin')),
  department TEXT,
  department_key TEXT,
  branch TEXT,
  branch_key TEXT,
  approved INTEGER NOT NULL CHECK (approved IN (0, 1)),
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
  event_id TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  description TEXT NOT NULL,
  location TEXT,
  starts_at TEXT NOT NULL,
  department TEXT,
  created_by TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('pending','approved','rejected')),
  reviewed_by TEXT,
  created_at TEXT NOT NULL,
  FOREIGN KEY (created_by) REFERENCES users(user_id),
  FOREIGN KEY (reviewed_by) REFERENCES users(user_id)
);

CREATE INDEX IF NOT EXISTS idx_users_role_approved ON users(role, approved);
CREATE INDEX IF NOT EXISTS idx_users_department_key ON users(department_key);
CREATE INDEX IF NOT EXISTS idx_events_status ON events(status);
";

const MIGRATION_002_SQL: &str = r"
CREATE TABLE IF NOT EXISTS meetings (
  meeting_id TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  host TEXT NOT NULL,
  scheduled_at TEXT NOT NULL,
  duration_minutes INTEGER NOT NULL CHECK (duration_minutes >= 1),
  link TEXT NOT NULL,
  department TEXT,
  created_at TEXT NOT NULL,
  FOREIGN KEY (host) REFERENCES users(user_id)
);

CREATE TABLE IF NOT EXISTS posts (
  post_id TEXT PRIMARY KEY,
  author TEXT NOT NULL,
  body TEXT NOT NULL,
  created_at TEXT NOT NULL,
  FOREIGN KEY (author) REFERENCES users(user_id)
);

CREATE TABLE IF NOT EXISTS post_comments (
  comment_id TEXT PRIMARY KEY,
  post_id TEXT NOT NULL,
  author TEXT NOT NULL,
  body TEXT NOT NULL,
  created_at TEXT NOT NULL,
  FOREIGN KEY (post_id) REFERENCES posts(post_id),
  FOREIGN KEY (author) REFERENCES users(user_id)
);

CREATE TABLE IF NOT EXISTS post_likes (
  post_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  created_at TEXT NOT NULL,
  PRIMARY KEY (post_id, user_id),
  FOREIGN KEY (post_id) REFERENCES posts(post_id),
  FOREIGN KEY (user_id) REFERENCES users(user_id)
);

CREATE INDEX IF NOT EXISTS idx_meetings_scheduled_at ON meetings(scheduled_at);
CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at);
CREATE INDEX IF NOT EXISTS idx_post_comments_post ON post_comments(post_id);
";

const MIGRATIONS: [(i64, &str); 2] = [(1, MIGRATION_001_SQL), (2, MIGRATION_002_SQL)];

const USER_COLUMNS: &str =
    "user_id, first_name, last_name, email, role, department, branch, approved, created_at";

const EVENT_COLUMNS: &str = "event_id, title, description, location, starts_at, department,
     created_by, status, reviewed_by, created_at";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: Option<i64>,
    pub parent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open a SQLite-backed store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = MIGRATIONS
            .iter()
            .map(|(version, _)| *version)
            .filter(|version| *version > current_version)
            .collect::<Vec<_>>();

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when the database is newer than this build or any step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let current = current_schema_version(&self.conn)?;
        if current > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {current}; expected at most {LATEST_SCHEMA_VERSION}"
            ));
        }

        for (version, sql) in MIGRATIONS {
            if version <= current {
                continue;
            }

            let tx = self
                .conn
                .transaction()
                .with_context(|| format!("failed to start migration v{version} transaction"))?;
            tx.execute_batch(sql).with_context(|| format!("failed to apply migration v{version}"))?;
            tx.execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![version, now_timestamp()?],
            )
            .with_context(|| format!("failed to record migration version {version}"))?;
            tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        }

        Ok(())
    }

    /// Copy the main database into `out_file` with the online backup API.
    ///
    /// # Errors
    /// Returns an error when the parent directory cannot be created or the copy fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create backup directory {}", parent.display())
            })?;
        }
        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to write sqlite backup to {}", out_file.display()))
    }

    /// Replace the main database with `in_file`, then bring it to the latest schema.
    ///
    /// # Errors
    /// Returns an error when the backup is missing, unreadable, or cannot be migrated.
    pub fn restore_database(&mut self, in_file: &Path) -> Result<()> {
        if !in_file.exists() {
            return Err(anyhow!("backup file does not exist: {}", in_file.display()));
        }
        self.conn
            .restore(DatabaseName::Main, in_file, None::<fn(rusqlite::backup::Progress)>)
            .with_context(|| format!("failed to restore sqlite backup {}", in_file.display()))?;
        self.migrate()
    }

    /// Run `quick_check` and `foreign_key_check` alongside the schema status.
    ///
    /// # Errors
    /// Returns an error when a probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let foreign_key_violations = stmt
            .query_map([], |row| {
                Ok(ForeignKeyViolation {
                    table: row.get(0)?,
                    rowid: row.get(1)?,
                    parent: row.get(2)?,
                })
            })
            .context("failed to run PRAGMA foreign_key_check")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read foreign key violations")?;

        Ok(IntegrityReport {
            ok: quick_check_message == "ok" && foreign_key_violations.is_empty(),
            quick_check_message,
            foreign_key_violations,
            schema_status: self.schema_status()?,
        })
    }

    /// Persist one validated user record.
    ///
    /// # Errors
    /// Returns [`ConnectError::Validation`] for invalid records or a duplicate email,
    /// or an error when the insert fails.
    pub fn insert_user(&mut self, user: &UserRecord) -> Result<()> {
        user.validate()?;
        self.conn
            .execute(
                "INSERT INTO users(
                    user_id, first_name, last_name, email, role,
                    department, department_key, branch, branch_key, approved, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    user.user_id.to_string(),
                    user.first_name,
                    user.last_name,
                    user.email,
                    user.role.as_str(),
                    user.department,
                    user.department.as_deref().map(normalize_key),
                    user.branch,
                    user.branch.as_deref().map(normalize_key),
                    user.approved,
                    sortable_timestamp(user.created_at)?,
                ],
            )
            .map_err(|err| {
                if is_unique_violation(&err, "users.email") {
                    anyhow::Error::from(ConnectError::Validation(format!(
                        "email already registered: {}",
                        user.email
                    )))
                } else {
                    anyhow::Error::new(err).context("failed to insert user")
                }
            })?;
        Ok(())
    }

    /// Fetch one user by identifier.
    ///
    /// # Errors
    /// Returns an error when the lookup or row decoding fails.
    pub fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![user_id.to_string()], RawUser::from_row)
            .optional()
            .context("failed to load user")?;
        row.map(RawUser::decode).transpose()
    }

    /// Fetch one user by exact email.
    ///
    /// # Errors
    /// Returns an error when the lookup or row decoding fails.
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
        let row = self
            .conn
            .query_row(&sql, params![email], RawUser::from_row)
            .optional()
            .context("failed to load user by email")?;
        row.map(RawUser::decode).transpose()
    }

    /// Set the approval flag of a user and return the updated record.
    ///
    /// # Errors
    /// Returns an error when the update or reload fails.
    pub fn set_user_approval(
        &mut self,
        user_id: UserId,
        approved: bool,
    ) -> Result<Option<UserRecord>> {
        let changed = self
            .conn
            .execute(
                "UPDATE users SET approved = ?1 WHERE user_id = ?2",
                params![approved, user_id.to_string()],
            )
            .context("failed to update user approval")?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_user(user_id)
    }

    /// Execute a visibility predicate as one parameterised query, in insertion order.
    ///
    /// # Errors
    /// Returns an error when the query or row decoding fails.
    pub fn list_users(&self, predicate: &VisibilityPredicate) -> Result<Vec<UserRecord>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE role = ?1
               AND (?2 IS NULL OR approved = ?2)
               AND (?3 IS NULL OR department_key = ?3)
               AND (?4 IS NULL OR branch_key = ?4)
             ORDER BY rowid ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                predicate.role.as_str(),
                predicate.approved,
                predicate.department_key,
                predicate.branch_key,
            ],
            RawUser::from_row,
        )?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?.decode()?);
        }
        Ok(users)
    }

    /// Persist one validated event.
    ///
    /// # Errors
    /// Returns an error when validation or the insert fails.
    pub fn insert_event(&mut self, event: &EventRecord) -> Result<()> {
        event.validate()?;
        self.conn
            .execute(
                "INSERT INTO events(
                    event_id, title, description, location, starts_at, department,
                    created_by, status, reviewed_by, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    event.event_id.to_string(),
                    event.title,
                    event.description,
                    event.location,
                    sortable_timestamp(event.starts_at)?,
                    event.department,
                    event.created_by.to_string(),
                    event.status.as_str(),
                    event.reviewed_by.map(|id| id.to_string()),
                    sortable_timestamp(event.created_at)?,
                ],
            )
            .context("failed to insert event")?;
        Ok(())
    }

    /// Fetch one event by identifier.
    ///
    /// # Errors
    /// Returns an error when the lookup or row decoding fails.
    pub fn get_event(&self, event_id: EventId) -> Result<Option<EventRecord>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE event_id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![event_id.to_string()], RawEvent::from_row)
            .optional()
            .context("failed to load event")?;
        row.map(RawEvent::decode).transpose()
    }

    /// Record a review decision on a pending event.
    ///
    /// # Errors
    /// Returns [`ConnectError::Validation`] when the event is no longer pending,
    /// or an error when the update fails.
    pub fn review_event(
        &mut self,
        event_id: EventId,
        status: EventStatus,
        reviewer: UserId,
    ) -> Result<EventRecord> {
        let changed = self
            .conn
            .execute(
                "UPDATE events SET status = ?1, reviewed_by = ?2
                 WHERE event_id = ?3 AND status = 'pending'",
                params![status.as_str(), reviewer.to_string(), event_id.to_string()],
            )
            .context("failed to update event status")?;
        if changed == 0 {
            return Err(ConnectError::Validation(format!(
                "event {event_id} is not pending review"
            ))
            .into());
        }
        self.get_event(event_id)?
            .ok_or_else(|| anyhow!("event disappeared after review: {event_id}"))
    }

    /// List all events by start time.
    ///
    /// # Errors
    /// Returns an error when the query or row decoding fails.
    pub fn list_events(&self) -> Result<Vec<EventRecord>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY starts_at ASC, rowid ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], RawEvent::from_row)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?.decode()?);
        }
        Ok(events)
    }

    /// Persist one validated meeting.
    ///
    /// # Errors
    /// Returns an error when validation or the insert fails.
    pub fn insert_meeting(&mut self, meeting: &MeetingRecord) -> Result<()> {
        meeting.validate()?;
        self.conn
            .execute(
                "INSERT INTO meetings(
                    meeting_id, title, host, scheduled_at, duration_minutes, link, department, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    meeting.meeting_id.to_string(),
                    meeting.title,
                    meeting.host.to_string(),
                    sortable_timestamp(meeting.scheduled_at)?,
                    meeting.duration_minutes,
                    meeting.link,
                    meeting.department,
                    sortable_timestamp(meeting.created_at)?,
                ],
            )
            .context("failed to insert meeting")?;
        Ok(())
    }

    /// List all meetings by scheduled time.
    ///
    /// # Errors
    /// Returns an error when the query or row decoding fails.
    pub fn list_meetings(&self) -> Result<Vec<MeetingRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT meeting_id, title, host, scheduled_at, duration_minutes, link, department, created_at
             FROM meetings
             ORDER BY scheduled_at ASC, rowid ASC",
        )?;
        let mut rows = stmt.query([])?;

        let mut meetings = Vec::new();
        while let Some(row) = rows.next()? {
            meetings.push(MeetingRecord {
                meeting_id: MeetingId(parse_ulid(&row.get::<_, String>(0)?)?),
                title: row.get(1)?,
                host: UserId(parse_ulid(&row.get::<_, String>(2)?)?),
                scheduled_at: parse_rfc3339(&row.get::<_, String>(3)?)?,
                duration_minutes: row.get(4)?,
                link: row.get(5)?,
                department: row.get(6)?,
                created_at: parse_rfc3339(&row.get::<_, String>(7)?)?,
            });
        }
        Ok(meetings)
    }

    /// Persist one post.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub fn insert_post(&mut self, post: &PostRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO posts(post_id, author, body, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    post.post_id.to_string(),
                    post.author.to_string(),
                    post.body,
                    sortable_timestamp(post.created_at)?,
                ],
            )
            .context("failed to insert post")?;
        Ok(())
    }

    /// Persist one comment on an existing post.
    ///
    /// # Errors
    /// Returns [`ConnectError::NotFound`] when the post does not exist.
    pub fn insert_comment(&mut self, comment: &CommentRecord) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        ensure_post_exists(&tx, comment.post_id)?;
        tx.execute(
            "INSERT INTO post_comments(comment_id, post_id, author, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                comment.comment_id.to_string(),
                comment.post_id.to_string(),
                comment.author.to_string(),
                comment.body,
                sortable_timestamp(comment.created_at)?,
            ],
        )
        .context("failed to insert comment")?;
        tx.commit().context("failed to commit comment transaction")?;
        Ok(())
    }

    /// Flip the like of `user_id` on `post_id` and report the new state.
    ///
    /// # Errors
    /// Returns [`ConnectError::NotFound`] when the post does not exist.
    pub fn toggle_like(&mut self, post_id: PostId, user_id: UserId) -> Result<LikeState> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        ensure_post_exists(&tx, post_id)?;

        let removed = tx
            .execute(
                "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
                params![post_id.to_string(), user_id.to_string()],
            )
            .context("failed to remove like")?;
        if removed == 0 {
            tx.execute(
                "INSERT INTO post_likes(post_id, user_id, created_at) VALUES (?1, ?2, ?3)",
                params![post_id.to_string(), user_id.to_string(), now_timestamp()?],
            )
            .context("failed to insert like")?;
        }

        let like_count = tx
            .query_row(
                "SELECT COUNT(*) FROM post_likes WHERE post_id = ?1",
                params![post_id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .context("failed to count likes")?;
        tx.commit().context("failed to commit like transaction")?;

        Ok(LikeState {
            post_id,
            liked: removed == 0,
            like_count: u64::try_from(like_count).unwrap_or_default(),
        })
    }

    /// Load the newest `limit` posts with like counts and comments for `viewer`.
    ///
    /// Runs two queries regardless of how many posts are returned.
    ///
    /// # Errors
    /// Returns an error when a query or row decoding fails.
    pub fn list_post_feed(&self, viewer: UserId, limit: u32) -> Result<Vec<PostView>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.post_id, p.author, u.first_name, u.last_name, p.body, p.created_at,
                    (SELECT COUNT(*) FROM post_likes l WHERE l.post_id = p.post_id),
                    EXISTS(SELECT 1 FROM post_likes l WHERE l.post_id = p.post_id AND l.user_id = ?1)
             FROM posts p
             JOIN users u ON u.user_id = p.author
             ORDER BY p.created_at DESC, p.rowid DESC
             LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![viewer.to_string(), limit])?;

        let mut posts = Vec::new();
        while let Some(row) = rows.next()? {
            let first_name: String = row.get(2)?;
            let last_name: Option<String> = row.get(3)?;
            posts.push(PostView {
                post_id: PostId(parse_ulid(&row.get::<_, String>(0)?)?),
                author: UserId(parse_ulid(&row.get::<_, String>(1)?)?),
                author_name: full_name(&first_name, last_name.as_deref()),
                body: row.get(4)?,
                created_at: parse_rfc3339(&row.get::<_, String>(5)?)?,
                like_count: u64::try_from(row.get::<_, i64>(6)?).unwrap_or_default(),
                liked_by_me: row.get(7)?,
                comments: Vec::new(),
            });
        }

        let mut comments = self.comments_for_feed(limit)?;
        for post in &mut posts {
            if let Some(thread) = comments.remove(&post.post_id) {
                post.comments = thread;
            }
        }
        Ok(posts)
    }

    fn comments_for_feed(&self, limit: u32) -> Result<BTreeMap<PostId, Vec<CommentView>>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.comment_id, c.post_id, c.author, u.first_name, u.last_name, c.body, c.created_at
             FROM post_comments c
             JOIN users u ON u.user_id = c.author
             WHERE c.post_id IN (
               SELECT post_id FROM posts ORDER BY created_at DESC, rowid DESC LIMIT ?1
             )
             ORDER BY c.created_at ASC, c.rowid ASC",
        )?;
        let mut rows = stmt.query(params![limit])?;

        let mut threads: BTreeMap<PostId, Vec<CommentView>> = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let post_id = PostId(parse_ulid(&row.get::<_, String>(1)?)?);
            let first_name: String = row.get(3)?;
            let last_name: Option<String> = row.get(4)?;
            threads.entry(post_id).or_default().push(CommentView {
                comment_id: CommentId(parse_ulid(&row.get::<_, String>(0)?)?),
                author: UserId(parse_ulid(&row.get::<_, String>(2)?)?),
                author_name: full_name(&first_name, last_name.as_deref()),
                body: row.get(5)?,
                created_at: parse_rfc3339(&row.get::<_, String>(6)?)?,
            });
        }
        Ok(threads)
    }
}

struct RawUser {
    user_id: String,
    first_name: String,
    last_name: Option<String>,
    email: String,
    role: String,
    department: Option<String>,
    branch: Option<String>,
    approved: bool,
    created_at: String,
}

impl RawUser {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            first_name: row.get(1)?,
            last_name: row.get(2)?,
            email: row.get(3)?,
            role: row.get(4)?,
            department: row.get(5)?,
            branch: row.get(6)?,
            approved: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn decode(self) -> Result<UserRecord> {
        Ok(UserRecord {
            user_id: UserId(parse_ulid(&self.user_id)?),
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            role: Role::parse(&self.role).ok_or_else(|| anyhow!("unknown role: {}", self.role))?,
            department: self.department,
            branch: self.branch,
            approved: self.approved,
            created_at: parse_rfc3339(&self.created_at)?,
        })
    }
}

struct RawEvent {
    event_id: String,
    title: String,
    description: String,
    location: Option<String>,
    starts_at: String,
    department: Option<String>,
    created_by: String,
    status: String,
    reviewed_by: Option<String>,
    created_at: String,
}

impl RawEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            event_id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            location: row.get(3)?,
            starts_at: row.get(4)?,
            department: row.get(5)?,
            created_by: row.get(6)?,
            status: row.get(7)?,
            reviewed_by: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<EventRecord> {
        Ok(EventRecord {
            event_id: EventId(parse_ulid(&self.event_id)?),
            title: self.title,
            description: self.description,
            location: self.location,
            starts_at: parse_rfc3339(&self.starts_at)?,
            department: self.department,
            created_by: UserId(parse_ulid(&self.created_by)?),
            status: EventStatus::parse(&self.status)
                .ok_or_else(|| anyhow!("unknown event status: {}", self.status))?,
            reviewed_by: self.reviewed_by.as_deref().map(parse_ulid).transpose()?.map(UserId),
            created_at: parse_rfc3339(&self.created_at)?,
        })
    }
}

fn ensure_post_exists(conn: &Connection, post_id: PostId) -> Result<()> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM posts WHERE post_id = ?1)",
            params![post_id.to_string()],
            |row| row.get::<_, bool>(0),
        )
        .context("failed to check post existence")?;
    if exists {
        Ok(())
    } else {
        Err(ConnectError::NotFound(format!("post {post_id}")).into())
    }
}

fn is_unique_violation(err: &rusqlite::Error, column: &str) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, Some(message))
            if failure.code == ErrorCode::ConstraintViolation && message.contains(column)
    )
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

/// Fixed-width UTC rendering of a timestamp. Still valid RFC 3339, and
/// byte order equals instant order, which the `ORDER BY` clauses rely on.
const SORTABLE_TIMESTAMP_FORMAT: &str =
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z";

fn now_timestamp() -> Result<String> {
    sortable_timestamp(OffsetDateTime::now_utc())
}

fn sortable_timestamp(value: OffsetDateTime) -> Result<String> {
    let utc = value.to_offset(UtcOffset::UTC);
    if !(0..=9999).contains(&utc.year()) {
        return Err(anyhow!("timestamp year {} is outside 0000..=9999", utc.year()));
    }
    let format = time::format_description::parse(SORTABLE_TIMESTAMP_FORMAT)
        .context("invalid timestamp format description")?;
    utc.format(&format).context("failed to format timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

fn parse_ulid(raw: &str) -> Result<Ulid> {
    Ulid::from_string(raw).with_context(|| format!("invalid ULID: {raw}"))
}
