use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Enumerations (mapped to Postgres enum types) ---

/// Role
///
/// The closed set of portal roles. Stored as the Postgres enum `role` and serialized
/// as `"STUDENT" | "TEACHER" | "ADMIN"`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, TS, ToSchema,
)]
#[sqlx(type_name = "role", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
#[ts(export)]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Teacher => "TEACHER",
            Role::Admin => "ADMIN",
        }
    }

    /// Prefix of generated registration numbers.
    pub fn reg_no_prefix(&self) -> &'static str {
        match self {
            Role::Student => "STU",
            Role::Teacher => "TEA",
            Role::Admin => "ADM",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, TS, ToSchema,
)]
#[sqlx(type_name = "gender", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
#[ts(export)]
pub enum Gender {
    Male,
    Female,
}

/// TestKind
///
/// The two continuous-assessment tests a score can be uploaded for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, TS, ToSchema,
)]
#[sqlx(type_name = "test_kind", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
#[ts(export)]
pub enum TestKind {
    Test1,
    Test2,
}

impl FromStr for TestKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEST1" => Ok(TestKind::Test1),
            "TEST2" => Ok(TestKind::Test2),
            _ => Err(()),
        }
    }
}

// --- Credential Store Records ---

/// User
///
/// The canonical identity record from the `users` table, including the bcrypt hash.
/// Never serialized directly; responses use `IdentitySummary` or `UserProfile`.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    // Registration number, the login key (e.g. "STU001").
    pub reg_no: String,
    pub first_name: String,
    pub last_name: String,
    pub gender: Option<Gender>,
    pub role: Role,
    #[sqlx(rename = "password")]
    pub password_hash: String,
    // Cleared by an administrator to suspend the account.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Builds an active user record with a fresh id, as provisioning would.
    pub fn new(
        reg_no: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        role: Role,
        password_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reg_no: reg_no.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            gender: None,
            role,
            password_hash: password_hash.into(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Input for provisioning a new account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub reg_no: String,
    pub first_name: String,
    pub last_name: String,
    pub gender: Option<Gender>,
    pub role: Role,
    pub password_hash: String,
}

/// A provisioned account together with its role-specific record id.
#[derive(Debug, Clone)]
pub struct ProvisionedUser {
    pub user: User,
    pub student_id: Option<Uuid>,
    pub teacher_id: Option<Uuid>,
}

/// Partial profile update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

// --- Identity Responses ---

/// IdentitySummary
///
/// The identity returned by login and refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct IdentitySummary {
    pub id: Uuid,
    pub reg_no: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

impl From<&User> for IdentitySummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            reg_no: user.reg_no.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.role,
        }
    }
}

/// UserProfile
///
/// The current user's information, without the password hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UserProfile {
    pub id: Uuid,
    pub reg_no: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub gender: Option<Gender>,
    pub role: Role,
    pub is_active: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            reg_no: user.reg_no.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            full_name: user.full_name(),
            gender: user.gender,
            role: user.role,
            is_active: user.is_active,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

// --- Request Payloads ---

/// LoginRequest
///
/// Both fields are optional at the type level so a missing field is reported as
/// `MISSING_CREDENTIALS` instead of a generic deserialization failure.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct LoginRequest {
    #[serde(alias = "loginKey")]
    pub reg_no: Option<String>,
    pub password: Option<String>,
}

/// CreateUserRequest
///
/// Input for `POST /api/auth/adduser`. The password and registration number are
/// generated server-side.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<Role>,
    // Required for students.
    pub gender: Option<Gender>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateUserStatusRequest {
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateAnnouncementRequest {
    pub title: Option<String>,
    pub content: Option<String>,
}

/// ScoreUploadRequest
///
/// `testType` is kept as free text so an unknown value is reported as `INVALID_TEST_TYPE`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ScoreUploadRequest {
    pub score: Option<f64>,
    pub test_type: Option<String>,
}

// --- Response Payloads ---

/// ApiResponse
///
/// Success envelope shared by the data-returning routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    pub user: IdentitySummary,
}

/// RefreshResponse
///
/// The new access token is also returned in the body so non-browser clients can send
/// it as a bearer credential.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RefreshResponse {
    pub success: bool,
    pub message: String,
    pub access_token: String,
    pub user: IdentitySummary,
}

/// CreatedUser
///
/// The one-time view of a provisioned account, including its generated password.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreatedUser {
    pub id: Uuid,
    pub reg_no: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub generated_password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<Uuid>,
}

/// DashboardStats
///
/// Role-specific counters; only the fields relevant to the caller's role are present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DashboardStats {
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_classes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_subjects: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_grades: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendance_count: Option<i64>,
}

// --- School Records ---

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct TeacherRecord {
    pub id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StudentRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub class_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ClassRecord {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, TS, ToSchema)]
#[ts(export)]
pub struct SubjectSummary {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct StudentSummary {
    pub id: Uuid,
    pub name: String,
    pub reg_no: String,
}

/// TestScore
///
/// One row of `test_scores`; unique per (subject, test, student).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TestScore {
    pub id: Uuid,
    pub student_id: Uuid,
    pub subject_id: Uuid,
    pub test: TestKind,
    pub score: f64,
    #[ts(type = "string")]
    pub date: DateTime<Utc>,
}

/// A test score joined with the student and subject it belongs to.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct TestScoreRow {
    pub id: Uuid,
    pub student_id: Uuid,
    pub student_name: String,
    pub student_reg_no: String,
    pub subject_name: String,
    pub test: TestKind,
    pub score: f64,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct GradeEntry {
    pub id: Uuid,
    pub student_name: String,
    pub student_reg_no: String,
    pub subject_name: String,
    pub score: f64,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Announcement {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub author_id: Option<Uuid>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAnnouncement {
    pub title: String,
    pub content: String,
    pub author_id: Uuid,
}

// --- Teacher Dashboard ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ClassOverview {
    pub id: Uuid,
    pub name: String,
    pub student_count: usize,
    pub students: Vec<StudentSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TeacherOverview {
    pub id: Uuid,
    pub classes: Vec<ClassOverview>,
    pub subjects: Vec<SubjectSummary>,
    pub total_classes: usize,
    pub total_subjects: usize,
    pub total_students: usize,
}

/// One score per row, placed in the column of the test it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TestScoreEntry {
    pub id: Uuid,
    pub student_id: Uuid,
    pub student_name: String,
    pub student_reg_no: String,
    pub subject_name: String,
    pub test1_score: Option<f64>,
    pub test2_score: Option<f64>,
    #[ts(type = "string | null")]
    pub test1_date: Option<DateTime<Utc>>,
    #[ts(type = "string | null")]
    pub test2_date: Option<DateTime<Utc>>,
}

impl From<TestScoreRow> for TestScoreEntry {
    fn from(row: TestScoreRow) -> Self {
        let (test1, test2) = match row.test {
            TestKind::Test1 => (Some((row.score, row.date)), None),
            TestKind::Test2 => (None, Some((row.score, row.date))),
        };
        Self {
            id: row.id,
            student_id: row.student_id,
            student_name: row.student_name,
            student_reg_no: row.student_reg_no,
            subject_name: row.subject_name,
            test1_score: test1.map(|(score, _)| score),
            test2_score: test2.map(|(score, _)| score),
            test1_date: test1.map(|(_, date)| date),
            test2_date: test2.map(|(_, date)| date),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TeacherDashboard {
    pub teacher: TeacherOverview,
    pub recent_grades: Vec<GradeEntry>,
    pub test_scores: Vec<TestScoreEntry>,
}
