use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

pub const MAX_POST_BODY_CHARS: usize = 5000;
pub const MAX_MEETING_MINUTES: u32 = 480;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ConnectError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("authentication required")]
    AuthenticationMissing,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
}

macro_rules! ulid_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash,
        )]
        pub struct $name(pub Ulid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Parse an identifier from its canonical ULID text form.
            ///
            /// # Errors
            /// Returns [`ConnectError::Validation`] when `raw` is not a ULID.
            pub fn parse(raw: &str) -> Result<Self, ConnectError> {
                Ulid::from_string(raw.trim()).map(Self).map_err(|err| {
                    ConnectError::Validation(format!(
                        "invalid {} `{raw}`: {err}",
                        stringify!($name)
                    ))
                })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

ulid_id!(UserId);
ulid_id!(EventId);
ulid_id!(MeetingId);
ulid_id!(PostId);
ulid_id!(CommentId);
ulid_id!(FileId);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Alumni,
    Professor,
    CollegeAdmin,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Alumni => "alumni",
            Self::Professor => "professor",
            Self::CollegeAdmin => "collegeadmin",
            Self::Admin => "admin",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "student" => Some(Self::Student),
            "alumni" => Some(Self::Alumni),
            "professor" => Some(Self::Professor),
            "collegeadmin" => Some(Self::CollegeAdmin),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Roles that review alumni registrations and pending events.
    #[must_use]
    pub fn is_moderator(self) -> bool {
        matches!(self, Self::CollegeAdmin | Self::Admin)
    }

    #[must_use]
    pub fn is_staff(self) -> bool {
        matches!(self, Self::Professor | Self::CollegeAdmin | Self::Admin)
    }

    #[must_use]
    pub fn self_registrable(self) -> bool {
        matches!(self, Self::Student | Self::Alumni | Self::Professor)
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fold a department or branch label into its comparison key.
///
/// Labels are compared literally after case folding, so user input is
/// never interpreted as a pattern.
#[must_use]
pub fn normalize_key(value: &str) -> String {
    value.to_lowercase()
}

#[must_use]
pub fn eq_ignore_case(lhs: &str, rhs: &str) -> bool {
    lhs == rhs || normalize_key(lhs) == normalize_key(rhs)
}

fn optional_eq_ignore_case(lhs: Option<&str>, rhs: Option<&str>) -> bool {
    match (lhs, rhs) {
        (Some(lhs), Some(rhs)) => eq_ignore_case(lhs, rhs),
        _ => false,
    }
}

/// `trim(first + (last ? " " + last : ""))`; an absent or empty last name adds nothing.
#[must_use]
pub fn full_name(first_name: &str, last_name: Option<&str>) -> String {
    let mut name = first_name.to_string();
    if let Some(last) = last_name.filter(|last| !last.is_empty()) {
        name.push(' ');
        name.push_str(last);
    }
    name.trim().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct UserRecord {
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: String,
    pub role: Role,
    pub department: Option<String>,
    pub branch: Option<String>,
    pub approved: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl UserRecord {
    /// Validate a user record before it is persisted.
    ///
    /// # Errors
    /// Returns [`ConnectError::Validation`] when the name or email is unusable.
    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.first_name.trim().is_empty() {
            return Err(ConnectError::Validation("first_name MUST be non-empty".to_string()));
        }

        let email = self.email.trim();
        let Some((local, domain)) = email.split_once('@') else {
            return Err(ConnectError::Validation("email MUST contain `@`".to_string()));
        };
        if local.is_empty() || domain.is_empty() || email.chars().any(char::is_whitespace) {
            return Err(ConnectError::Validation(format!("email is malformed: {email}")));
        }

        for (field, value) in [("department", &self.department), ("branch", &self.branch)] {
            if value.as_deref().is_some_and(|value| value.trim().is_empty()) {
                return Err(ConnectError::Validation(format!(
                    "{field} MUST be omitted rather than blank"
                )));
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        full_name(&self.first_name, self.last_name.as_deref())
    }

    #[must_use]
    pub fn identity(&self) -> IdentityContext {
        IdentityContext {
            user_id: self.user_id,
            role: self.role,
            department: self.department.clone(),
            branch: self.branch.clone(),
            approved: self.approved,
        }
    }
}

/// The authenticated requester, built once per request at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct IdentityContext {
    pub user_id: UserId,
    pub role: Role,
    pub department: Option<String>,
    pub branch: Option<String>,
    pub approved: bool,
}

impl IdentityContext {
    #[must_use]
    pub fn visibility(&self, target: TargetKind) -> VisibilityPredicate {
        evaluate(Some(self.role), self.department.as_deref(), self.branch.as_deref(), target)
    }

    /// Unapproved alumni can read but not contribute.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.role != Role::Alumni || self.approved
    }

    /// Ensure the requester may create content.
    ///
    /// # Errors
    /// Returns [`ConnectError::Forbidden`] for alumni awaiting approval.
    pub fn require_active(&self) -> Result<(), ConnectError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ConnectError::Forbidden("alumni account is awaiting approval".to_string()))
        }
    }

    /// Whether this requester may moderate content or users of `department`.
    #[must_use]
    pub fn moderates_department(&self, department: Option<&str>) -> bool {
        match self.role {
            Role::Admin => true,
            Role::CollegeAdmin => optional_eq_ignore_case(self.department.as_deref(), department),
            _ => false,
        }
    }

    fn shares_department(&self, department: Option<&str>) -> bool {
        department.is_none() || optional_eq_ignore_case(self.department.as_deref(), department)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    AlumniDirectory,
    StudentDirectory,
    PendingAlumni,
}

impl TargetKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlumniDirectory => "alumni-directory",
            Self::StudentDirectory => "student-directory",
            Self::PendingAlumni => "pending-alumni",
        }
    }
}

/// Declarative filter over user records. Department and branch hold
/// comparison keys produced by [`normalize_key`].
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct VisibilityPredicate {
    pub role: Role,
    pub approved: Option<bool>,
    pub department_key: Option<String>,
    pub branch_key: Option<String>,
}

impl VisibilityPredicate {
    fn base(target: TargetKind) -> Self {
        let (role, approved) = match target {
            TargetKind::AlumniDirectory => (Role::Alumni, Some(true)),
            TargetKind::StudentDirectory => (Role::Student, None),
            TargetKind::PendingAlumni => (Role::Alumni, Some(false)),
        };
        Self { role, approved, department_key: None, branch_key: None }
    }

    #[must_use]
    pub fn matches(&self, user: &UserRecord) -> bool {
        if user.role != self.role {
            return false;
        }
        if self.approved.is_some_and(|approved| approved != user.approved) {
            return false;
        }
        key_matches(self.department_key.as_deref(), user.department.as_deref())
            && key_matches(self.branch_key.as_deref(), user.branch.as_deref())
    }

    /// Filter `users` in one pass, preserving their order.
    #[must_use]
    pub fn apply<'a>(&self, users: &'a [UserRecord]) -> Vec<&'a UserRecord> {
        users.iter().filter(|user| self.matches(user)).collect()
    }
}

fn key_matches(key: Option<&str>, value: Option<&str>) -> bool {
    match key {
        None => true,
        Some(key) => value.is_some_and(|value| normalize_key(value) == key),
    }
}

/// Build the visibility predicate for a requester and target listing.
///
/// Never fails: a missing role or department degrades to the unscoped base
/// predicate of the target. A professor without a branch is scoped by
/// department only.
#[must_use]
pub fn evaluate(
    role: Option<Role>,
    department: Option<&str>,
    branch: Option<&str>,
    target: TargetKind,
) -> VisibilityPredicate {
    let mut predicate = VisibilityPredicate::base(target);
    let (Some(role), Some(department)) = (role, department) else {
        return predicate;
    };

    match role {
        Role::CollegeAdmin => {
            predicate.department_key = Some(normalize_key(department));
        }
        Role::Professor => {
            predicate.department_key = Some(normalize_key(department));
            predicate.branch_key = branch.map(normalize_key);
        }
        Role::Admin | Role::Student | Role::Alumni => {}
    }

    predicate
}

/// Projection returned by directory listings.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DirectoryEntry {
    #[serde(rename = "_id")]
    pub id: UserId,
    #[serde(rename = "fullName")]
    pub full_name: String,
    pub email: String,
    pub department: Option<String>,
    pub branch: Option<String>,
}

impl From<&UserRecord> for DirectoryEntry {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.user_id,
            full_name: user.full_name(),
            email: user.email.clone(),
            department: user.department.clone(),
            branch: user.branch.clone(),
        }
    }
}

#[must_use]
pub fn project_directory(users: &[UserRecord]) -> Vec<DirectoryEntry> {
    users.iter().map(DirectoryEntry::from).collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Approved,
    Rejected,
}

impl EventStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EventDecision {
    Approve,
    Reject,
}

impl EventDecision {
    #[must_use]
    pub fn status(self) -> EventStatus {
        match self {
            Self::Approve => EventStatus::Approved,
            Self::Reject => EventStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct EventRecord {
    pub event_id: EventId,
    pub title: String,
    pub description: String,
    pub location: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub starts_at: OffsetDateTime,
    pub department: Option<String>,
    pub created_by: UserId,
    pub status: EventStatus,
    pub reviewed_by: Option<UserId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl EventRecord {
    /// Validate an event before it is persisted.
    ///
    /// # Errors
    /// Returns [`ConnectError::Validation`] when the title is blank.
    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.title.trim().is_empty() {
            return Err(ConnectError::Validation("event title MUST be non-empty".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn visible_to(&self, identity: &IdentityContext) -> bool {
        self.status == EventStatus::Approved
            || self.created_by == identity.user_id
            || identity.moderates_department(self.department.as_deref())
    }
}

/// Status a freshly created event starts in.
///
/// # Errors
/// Returns [`ConnectError::Forbidden`] when the requester may not create events.
pub fn initial_event_status(identity: &IdentityContext) -> Result<EventStatus, ConnectError> {
    if identity.role == Role::Student {
        return Err(ConnectError::Forbidden("students cannot create events".to_string()));
    }
    identity.require_active()?;
    if identity.role.is_moderator() {
        Ok(EventStatus::Approved)
    } else {
        Ok(EventStatus::Pending)
    }
}

/// Check that `reviewer` may move `event` out of the pending state.
///
/// # Errors
/// Returns [`ConnectError::Forbidden`] for reviewers outside the event's scope,
/// or [`ConnectError::Validation`] when the event was already reviewed.
pub fn check_event_review(
    reviewer: &IdentityContext,
    event: &EventRecord,
) -> Result<(), ConnectError> {
    if !reviewer.moderates_department(event.department.as_deref()) {
        return Err(ConnectError::Forbidden(format!(
            "{} cannot review event {}",
            reviewer.role, event.event_id
        )));
    }
    if event.status != EventStatus::Pending {
        return Err(ConnectError::Validation(format!(
            "event {} is already {}",
            event.event_id,
            event.status.as_str()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MeetingRecord {
    pub meeting_id: MeetingId,
    pub title: String,
    pub host: UserId,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    pub duration_minutes: u32,
    pub link: String,
    pub department: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl MeetingRecord {
    /// Validate a meeting before it is persisted.
    ///
    /// # Errors
    /// Returns [`ConnectError::Validation`] for a blank title, an out-of-range
    /// duration, or a link that is not an http(s) URL.
    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.title.trim().is_empty() {
            return Err(ConnectError::Validation("meeting title MUST be non-empty".to_string()));
        }
        if !(1..=MAX_MEETING_MINUTES).contains(&self.duration_minutes) {
            return Err(ConnectError::Validation(format!(
                "duration_minutes MUST be in [1, {MAX_MEETING_MINUTES}]"
            )));
        }
        let link = self.link.trim();
        let rest = link.strip_prefix("https://").or_else(|| link.strip_prefix("http://"));
        if rest.map_or(true, |host| host.is_empty() || host.contains(char::is_whitespace)) {
            return Err(ConnectError::Validation(format!(
                "meeting link MUST be an http(s) URL: {link}"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn visible_to(&self, identity: &IdentityContext) -> bool {
        identity.role == Role::Admin
            || self.host == identity.user_id
            || identity.shares_department(self.department.as_deref())
    }
}

/// Ensure the requester may host meetings.
///
/// # Errors
/// Returns [`ConnectError::Forbidden`] for students and unapproved alumni.
pub fn check_meeting_host(identity: &IdentityContext) -> Result<(), ConnectError> {
    if identity.role == Role::Student {
        return Err(ConnectError::Forbidden("students cannot host meetings".to_string()));
    }
    identity.require_active()
}

/// Validate a post or comment body.
///
/// # Errors
/// Returns [`ConnectError::Validation`] when the body is blank or too long.
pub fn validate_body(kind: &str, body: &str) -> Result<(), ConnectError> {
    if body.trim().is_empty() {
        return Err(ConnectError::Validation(format!("{kind} body MUST be non-empty")));
    }
    if body.chars().count() > MAX_POST_BODY_CHARS {
        return Err(ConnectError::Validation(format!(
            "{kind} body MUST be at most {MAX_POST_BODY_CHARS} characters"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PostRecord {
    pub post_id: PostId,
    pub author: UserId,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CommentRecord {
    pub comment_id: CommentId,
    pub post_id: PostId,
    pub author: UserId,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CommentView {
    pub comment_id: CommentId,
    pub author: UserId,
    pub author_name: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PostView {
    pub post_id: PostId,
    pub author: UserId,
    pub author_name: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub like_count: u64,
    pub liked_by_me: bool,
    pub comments: Vec<CommentView>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct LikeState {
    pub post_id: PostId,
    pub liked: bool,
    pub like_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StoredFile {
    pub file_id: FileId,
    pub filename: String,
    pub content_type: String,
    pub length: u64,
    pub chunk_size: u32,
    pub sha256: String,
    pub uploaded_by: Option<UserId>,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use time::Duration;

    fn fixture_time() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000)
    }

    fn mk_user(
        role: Role,
        department: Option<&str>,
        branch: Option<&str>,
        approved: bool,
    ) -> UserRecord {
        UserRecord {
            user_id: UserId::new(),
            first_name: "Asha".to_string(),
            last_name: Some("Patel".to_string()),
            email: format!("{}@example.edu", Ulid::new()),
            role,
            department: department.map(str::to_string),
            branch: branch.map(str::to_string),
            approved,
            created_at: fixture_time(),
        }
    }

    fn mk_identity(role: Role, department: Option<&str>, branch: Option<&str>) -> IdentityContext {
        IdentityContext {
            user_id: UserId::new(),
            role,
            department: department.map(str::to_string),
            branch: branch.map(str::to_string),
            approved: true,
        }
    }

    fn mixed_population() -> Vec<UserRecord> {
        vec![
            mk_user(Role::Alumni, Some("CMPICA"), Some("CE"), true),
            mk_user(Role::Alumni, Some("cmpica"), Some("it"), true),
            mk_user(Role::Alumni, Some("IT"), Some("CE"), true),
            mk_user(Role::Alumni, Some("CMPICA"), Some("CE"), false),
            mk_user(Role::Alumni, None, None, true),
            mk_user(Role::Student, Some("CMPICA"), Some("CE"), true),
            mk_user(Role::Professor, Some("CMPICA"), Some("CE"), true),
        ]
    }

    #[test]
    fn collegeadmin_sees_department_alumni_regardless_of_case() {
        let users = mixed_population();
        let predicate =
            evaluate(Some(Role::CollegeAdmin), Some("CMPICA"), None, TargetKind::AlumniDirectory);

        let visible = predicate.apply(&users);
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|user| {
            user.role == Role::Alumni
                && user.approved
                && user.department.as_deref().is_some_and(|dept| eq_ignore_case(dept, "CMPICA"))
        }));
        assert!(visible.iter().all(|user| user.department.as_deref() != Some("IT")));
    }

    #[test]
    fn professor_is_scoped_by_department_and_branch() {
        let users = mixed_population();
        let predicate = evaluate(
            Some(Role::Professor),
            Some("cmpica"),
            Some("ce"),
            TargetKind::AlumniDirectory,
        );

        let visible = predicate.apply(&users);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].department.as_deref(), Some("CMPICA"));
        assert_eq!(visible[0].branch.as_deref(), Some("CE"));
    }

    #[test]
    fn professor_without_branch_is_scoped_by_department_only() {
        let predicate =
            evaluate(Some(Role::Professor), Some("CMPICA"), None, TargetKind::AlumniDirectory);
        assert_eq!(predicate.department_key.as_deref(), Some("cmpica"));
        assert_eq!(predicate.branch_key, None);
    }

    #[test]
    fn admin_sees_every_approved_alumni() {
        let users = mixed_population();
        let predicate =
            evaluate(Some(Role::Admin), Some("CMPICA"), Some("CE"), TargetKind::AlumniDirectory);

        let visible = predicate.apply(&users);
        let expected =
            users.iter().filter(|user| user.role == Role::Alumni && user.approved).count();
        assert_eq!(visible.len(), expected);
        assert_eq!(expected, 4);
    }

    #[test]
    fn student_without_department_sees_all_approved_alumni() {
        let users = mixed_population();
        let predicate = evaluate(Some(Role::Student), None, None, TargetKind::AlumniDirectory);
        assert_eq!(predicate, VisibilityPredicate::base(TargetKind::AlumniDirectory));
        assert_eq!(predicate.apply(&users).len(), 4);
    }

    #[test]
    fn missing_role_or_department_degrades_to_base_predicate() {
        let base = VisibilityPredicate::base(TargetKind::AlumniDirectory);
        assert_eq!(evaluate(None, Some("CMPICA"), Some("CE"), TargetKind::AlumniDirectory), base);
        assert_eq!(evaluate(Some(Role::CollegeAdmin), None, None, TargetKind::AlumniDirectory), base);
        assert_eq!(
            evaluate(Some(Role::Professor), None, Some("CE"), TargetKind::AlumniDirectory),
            base
        );
    }

    #[test]
    fn pattern_characters_in_department_are_compared_literally() {
        let users = vec![
            mk_user(Role::Alumni, Some("C.*"), None, true),
            mk_user(Role::Alumni, Some("CMPICA"), None, true),
        ];
        let predicate =
            evaluate(Some(Role::CollegeAdmin), Some("c.*"), None, TargetKind::AlumniDirectory);
        let visible = predicate.apply(&users);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].department.as_deref(), Some("C.*"));
    }

    #[test]
    fn pending_alumni_target_selects_unapproved_records() {
        let users = mixed_population();
        let predicate =
            evaluate(Some(Role::CollegeAdmin), Some("cmpica"), None, TargetKind::PendingAlumni);
        let visible = predicate.apply(&users);
        assert_eq!(visible.len(), 1);
        assert!(!visible[0].approved);
    }

    #[test]
    fn student_directory_ignores_approval_flag() {
        let mut users = mixed_population();
        users.push(mk_user(Role::Student, Some("IT"), None, false));
        let predicate = evaluate(Some(Role::Admin), None, None, TargetKind::StudentDirectory);
        assert_eq!(predicate.apply(&users).len(), 2);
    }

    #[test]
    fn full_name_collapses_missing_last_name() {
        assert_eq!(full_name("Asha", Some("Patel")), "Asha Patel");
        assert_eq!(full_name("Asha", None), "Asha");
        assert_eq!(full_name("Asha", Some("")), "Asha");
        assert_eq!(full_name(" Asha", Some("Patel ")), "Asha Patel");
        assert_eq!(full_name("", Some("Patel")), "Patel");
    }

    #[test]
    fn directory_entry_serializes_with_wire_field_names() {
        let user = mk_user(Role::Alumni, Some("CMPICA"), Some("CE"), true);
        let value = serde_json::to_value(DirectoryEntry::from(&user))
            .unwrap_or_else(|err| panic!("failed to serialize entry: {err}"));
        assert_eq!(value.get("fullName").and_then(serde_json::Value::as_str), Some("Asha Patel"));
        assert!(value.get("_id").is_some());
        assert!(value.get("first_name").is_none());
        assert!(value.get("approved").is_none());
    }

    #[test]
    fn validate_rejects_malformed_email_and_blank_department() {
        let mut user = mk_user(Role::Alumni, Some("CMPICA"), None, true);
        user.email = "not-an-email".to_string();
        assert!(matches!(user.validate(), Err(ConnectError::Validation(_))));

        user.email = "asha@example.edu".to_string();
        user.department = Some("  ".to_string());
        assert!(matches!(user.validate(), Err(ConnectError::Validation(_))));

        user.department = Some("CMPICA".to_string());
        assert_eq!(user.validate(), Ok(()));
    }

    #[test]
    fn event_creation_and_review_follow_role_rules() {
        let student = mk_identity(Role::Student, Some("CMPICA"), None);
        assert!(matches!(initial_event_status(&student), Err(ConnectError::Forbidden(_))));

        let mut pending_alumni = mk_identity(Role::Alumni, Some("CMPICA"), None);
        pending_alumni.approved = false;
        assert!(matches!(initial_event_status(&pending_alumni), Err(ConnectError::Forbidden(_))));

        let professor = mk_identity(Role::Professor, Some("CMPICA"), Some("CE"));
        assert_eq!(initial_event_status(&professor), Ok(EventStatus::Pending));

        let collegeadmin = mk_identity(Role::CollegeAdmin, Some("cmpica"), None);
        assert_eq!(initial_event_status(&collegeadmin), Ok(EventStatus::Approved));

        let event = EventRecord {
            event_id: EventId::new(),
            title: "Reunion".to_string(),
            description: String::new(),
            location: None,
            starts_at: fixture_time(),
            department: Some("CMPICA".to_string()),
            created_by: professor.user_id,
            status: EventStatus::Pending,
            reviewed_by: None,
            created_at: fixture_time(),
        };
        assert_eq!(check_event_review(&collegeadmin, &event), Ok(()));

        let other_admin = mk_identity(Role::CollegeAdmin, Some("IT"), None);
        assert!(matches!(
            check_event_review(&other_admin, &event),
            Err(ConnectError::Forbidden(_))
        ));
        assert!(!event.visible_to(&other_admin));
        assert!(event.visible_to(&professor));

        let approved = EventRecord { status: EventStatus::Approved, ..event };
        assert!(approved.visible_to(&student));
        assert!(matches!(
            check_event_review(&collegeadmin, &approved),
            Err(ConnectError::Validation(_))
        ));
    }

    #[test]
    fn meeting_validation_and_visibility() {
        let host = mk_identity(Role::Professor, Some("CMPICA"), None);
        let mut meeting = MeetingRecord {
            meeting_id: MeetingId::new(),
            title: "Career AMA".to_string(),
            host: host.user_id,
            scheduled_at: fixture_time(),
            duration_minutes: 60,
            link: "https://meet.example.edu/ama".to_string(),
            department: Some("CMPICA".to_string()),
            created_at: fixture_time(),
        };
        assert_eq!(meeting.validate(), Ok(()));

        assert!(meeting.visible_to(&mk_identity(Role::Student, Some("cmpica"), None)));
        assert!(!meeting.visible_to(&mk_identity(Role::Student, Some("IT"), None)));
        assert!(meeting.visible_to(&mk_identity(Role::Admin, None, None)));

        meeting.link = "javascript:alert(1)".to_string();
        assert!(matches!(meeting.validate(), Err(ConnectError::Validation(_))));
        meeting.link = "https://meet.example.edu".to_string();
        meeting.duration_minutes = 0;
        assert!(matches!(meeting.validate(), Err(ConnectError::Validation(_))));
    }

    #[test]
    fn body_validation_bounds_length() {
        assert!(validate_body("post", "hello").is_ok());
        assert!(validate_body("post", "   ").is_err());
        assert!(validate_body("comment", &"x".repeat(MAX_POST_BODY_CHARS + 1)).is_err());
    }

    fn role_strategy() -> impl Strategy<Value = Role> {
        prop_oneof![
            Just(Role::Student),
            Just(Role::Alumni),
            Just(Role::Professor),
            Just(Role::CollegeAdmin),
            Just(Role::Admin),
        ]
    }

    fn label_strategy() -> impl Strategy<Value = Option<String>> {
        prop::option::of(prop_oneof![
            Just("CMPICA".to_string()),
            Just("cmpica".to_string()),
            Just("IT".to_string()),
            Just("Ce".to_string()),
            "[a-zA-Z.*()]{1,6}",
        ])
    }

    prop_compose! {
        fn user_strategy()(
            role in role_strategy(),
            department in label_strategy(),
            branch in label_strategy(),
            approved in any::<bool>(),
            last_name in prop::option::of("[ a-zA-Z]{0,8}"),
        ) -> UserRecord {
            UserRecord {
                user_id: UserId::new(),
                first_name: "Ravi".to_string(),
                last_name,
                email: "ravi@example.edu".to_string(),
                role,
                department,
                branch,
                approved,
                created_at: OffsetDateTime::UNIX_EPOCH,
            }
        }
    }

    proptest! {
        #[test]
        fn property_evaluation_is_idempotent(
            role in prop::option::of(role_strategy()),
            department in label_strategy(),
            branch in label_strategy(),
        ) {
            let first = evaluate(role, department.as_deref(), branch.as_deref(), TargetKind::AlumniDirectory);
            let second = evaluate(role, department.as_deref(), branch.as_deref(), TargetKind::AlumniDirectory);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn property_scoped_results_respect_requester_scope(
            role in role_strategy(),
            department in "[a-zA-Z]{1,4}",
            branch in "[a-zA-Z]{1,4}",
            users in prop::collection::vec(user_strategy(), 0..24),
        ) {
            let predicate = evaluate(Some(role), Some(&department), Some(&branch), TargetKind::AlumniDirectory);
            for user in predicate.apply(&users) {
                prop_assert_eq!(user.role, Role::Alumni);
                prop_assert!(user.approved);
                if matches!(role, Role::CollegeAdmin | Role::Professor) {
                    prop_assert!(user.department.as_deref().is_some_and(|dept| eq_ignore_case(dept, &department)));
                }
                if role == Role::Professor {
                    prop_assert!(user.branch.as_deref().is_some_and(|b| eq_ignore_case(b, &branch)));
                }
            }
            if role == Role::Admin {
                let expected = users.iter().filter(|user| user.role == Role::Alumni && user.approved).count();
                prop_assert_eq!(predicate.apply(&users).len(), expected);
            }
        }

        #[test]
        fn property_projection_full_name_law(user in user_strategy()) {
            let entry = DirectoryEntry::from(&user);
            let expected = match user.last_name.as_deref() {
                Some(last) if !last.is_empty() => format!("{} {}", user.first_name, last),
                _ => user.first_name.clone(),
            };
            prop_assert_eq!(entry.full_name, expected.trim().to_string());
        }
    }
}
