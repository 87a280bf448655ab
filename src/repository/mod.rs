use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::DbError,
    models::{
        Announcement, ClassRecord, DashboardStats, GradeEntry, NewAnnouncement, NewUser,
        ProfileUpdate, ProvisionedUser, Role, StudentRecord, StudentSummary, SubjectSummary,
        TeacherRecord, TestKind, TestScore, TestScoreRow, User,
    },
};

mod memory;
mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;

/// Repository Trait
///
/// The persistence contract the handlers and the session middleware depend on. Every
/// operation reports failures as a classified `DbError`; none of them retries on its own
/// except account provisioning, which runs under the retry helper.
///
/// `Send + Sync` lets the trait object (`Arc<dyn Repository>`) cross Axum's task
/// boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Credential Store ---
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, DbError>;
    async fn find_user_by_reg_no(&self, reg_no: &str) -> Result<Option<User>, DbError>;
    // Creates the user and, for students and teachers, the role record in one transaction.
    async fn create_user(&self, user: NewUser) -> Result<ProvisionedUser, DbError>;
    async fn update_profile(
        &self,
        id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Option<User>, DbError>;
    async fn set_user_active(&self, id: Uuid, is_active: bool) -> Result<Option<User>, DbError>;

    // --- Dashboards ---
    async fn dashboard_stats(&self, user_id: Uuid, role: Role) -> Result<DashboardStats, DbError>;
    async fn find_teacher_by_user(&self, user_id: Uuid) -> Result<Option<TeacherRecord>, DbError>;
    // The class the teacher is class teacher of, if any.
    async fn supervised_class(&self, teacher_id: Uuid) -> Result<Option<ClassRecord>, DbError>;
    async fn class_students(&self, class_id: Uuid) -> Result<Vec<StudentSummary>, DbError>;
    // Distinct subjects across the teacher's teaching assignments.
    async fn teacher_subjects(&self, teacher_id: Uuid) -> Result<Vec<SubjectSummary>, DbError>;
    // Newest first, for subjects the teacher is assigned to.
    async fn teacher_test_scores(
        &self,
        teacher_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TestScoreRow>, DbError>;
    async fn teacher_recent_grades(
        &self,
        teacher_id: Uuid,
        limit: i64,
    ) -> Result<Vec<GradeEntry>, DbError>;

    // --- Announcements ---
    async fn latest_announcements(&self, limit: i64) -> Result<Vec<Announcement>, DbError>;
    async fn create_announcement(&self, new: NewAnnouncement) -> Result<Announcement, DbError>;

    // --- Results ---
    async fn find_subject(&self, id: Uuid) -> Result<Option<SubjectSummary>, DbError>;
    async fn find_student(&self, id: Uuid) -> Result<Option<StudentRecord>, DbError>;
    // Inserts or replaces the score for (subject, test, student).
    async fn upsert_test_score(
        &self,
        student_id: Uuid,
        subject_id: Uuid,
        test: TestKind,
        score: f64,
    ) -> Result<TestScore, DbError>;
}

/// RepositoryState
///
/// The shared handle to the persistence layer stored in `AppState`.
pub type RepositoryState = Arc<dyn Repository>;
