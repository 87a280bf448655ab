use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{
        RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicUsize, Ordering},
    },
};
use uuid::Uuid;

use super::Repository;
use crate::{
    error::DbError,
    models::{
        Announcement, ClassRecord, DashboardStats, GradeEntry, NewAnnouncement, NewUser,
        ProfileUpdate, ProvisionedUser, Role, StudentRecord, StudentSummary, SubjectSummary,
        TeacherRecord, TestKind, TestScore, TestScoreRow, User,
    },
};

struct ClassRow {
    class: ClassRecord,
    class_teacher_id: Option<Uuid>,
}

struct Assignment {
    teacher_id: Uuid,
    subject_id: Uuid,
}

struct GradeRow {
    id: Uuid,
    student_id: Uuid,
    subject_id: Uuid,
    score: f64,
    created_at: DateTime<Utc>,
}

struct AttendanceRow {
    student_id: Uuid,
    present: bool,
}

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    teachers: Vec<TeacherRecord>,
    students: Vec<StudentRecord>,
    classes: Vec<ClassRow>,
    subjects: Vec<SubjectSummary>,
    assignments: Vec<Assignment>,
    test_scores: Vec<TestScore>,
    grades: Vec<GradeRow>,
    attendance: Vec<AttendanceRow>,
    announcements: Vec<Announcement>,
    failure: Option<DbError>,
}

impl State {
    fn check(&self) -> Result<(), DbError> {
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn student_name(&self, student_id: Uuid) -> (String, String) {
        self.students
            .iter()
            .find(|s| s.id == student_id)
            .and_then(|s| self.users.get(&s.user_id))
            .map(|u| (u.full_name(), u.reg_no.clone()))
            .unwrap_or_default()
    }

    fn subject_name(&self, subject_id: Uuid) -> String {
        self.subjects
            .iter()
            .find(|s| s.id == subject_id)
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }

    fn teaches(&self, teacher_id: Uuid, subject_id: Uuid) -> bool {
        self.assignments
            .iter()
            .any(|a| a.teacher_id == teacher_id && a.subject_id == subject_id)
    }

    fn teacher_of(&self, user_id: Uuid) -> Option<Uuid> {
        self.teachers.iter().find(|t| t.user_id == user_id).map(|t| t.id)
    }

    fn student_of(&self, user_id: Uuid) -> Option<Uuid> {
        self.students.iter().find(|s| s.user_id == user_id).map(|s| s.id)
    }

    fn add_role_record(&mut self, user: &User) -> (Option<Uuid>, Option<Uuid>) {
        match user.role {
            Role::Student => {
                let id = Uuid::new_v4();
                self.students.push(StudentRecord {
                    id,
                    user_id: user.id,
                    class_id: None,
                });
                (Some(id), None)
            }
            Role::Teacher => {
                let id = Uuid::new_v4();
                self.teachers.push(TeacherRecord {
                    id,
                    user_id: user.id,
                });
                (None, Some(id))
            }
            Role::Admin => (None, None),
        }
    }
}

/// MemoryRepository
///
/// An in-process `Repository` for tests and local demos. It mirrors the constraints the
/// Postgres schema enforces (unique registration numbers, one score per subject, test
/// and student) and can be told to fail every operation with a given `DbError`.
#[derive(Default)]
pub struct MemoryRepository {
    state: RwLock<State>,
    user_lookups: AtomicUsize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores `user` as-is, creating its student or teacher record.
    pub fn insert_user(&self, user: User) -> User {
        let mut state = self.write();
        state.add_role_record(&user);
        state.users.insert(user.id, user.clone());
        user
    }

    pub fn student_id_for(&self, user_id: Uuid) -> Option<Uuid> {
        self.read().student_of(user_id)
    }

    pub fn teacher_id_for(&self, user_id: Uuid) -> Option<Uuid> {
        self.read().teacher_of(user_id)
    }

    pub fn add_subject(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.write().subjects.push(SubjectSummary {
            id,
            name: name.to_string(),
        });
        id
    }

    pub fn add_class(&self, name: &str, class_teacher_id: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        self.write().classes.push(ClassRow {
            class: ClassRecord {
                id,
                name: name.to_string(),
            },
            class_teacher_id,
        });
        id
    }

    pub fn enroll_student(&self, student_id: Uuid, class_id: Uuid) {
        if let Some(student) = self.write().students.iter_mut().find(|s| s.id == student_id) {
            student.class_id = Some(class_id);
        }
    }

    pub fn assign_teacher(&self, teacher_id: Uuid, subject_id: Uuid) {
        self.write().assignments.push(Assignment {
            teacher_id,
            subject_id,
        });
    }

    pub fn add_grade(&self, student_id: Uuid, subject_id: Uuid, score: f64) {
        self.write().grades.push(GradeRow {
            id: Uuid::new_v4(),
            student_id,
            subject_id,
            score,
            created_at: Utc::now(),
        });
    }

    pub fn record_attendance(&self, student_id: Uuid, present: bool) {
        self.write().attendance.push(AttendanceRow {
            student_id,
            present,
        });
    }

    /// Makes every subsequent operation fail with `failure` (or succeed again with `None`).
    pub fn fail_lookups_with(&self, failure: Option<DbError>) {
        self.write().failure = failure;
    }

    pub fn test_scores(&self) -> Vec<TestScore> {
        self.read().test_scores.clone()
    }

    /// Number of `find_user_by_id` calls served so far.
    pub fn user_lookups(&self) -> usize {
        self.user_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, DbError> {
        self.user_lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.read();
        state.check()?;
        Ok(state.users.get(&id).cloned())
    }

    async fn find_user_by_reg_no(&self, reg_no: &str) -> Result<Option<User>, DbError> {
        let state = self.read();
        state.check()?;
        Ok(state.users.values().find(|u| u.reg_no == reg_no).cloned())
    }

    async fn create_user(&self, new: NewUser) -> Result<ProvisionedUser, DbError> {
        let mut state = self.write();
        state.check()?;
        if state.users.values().any(|u| u.reg_no == new.reg_no) {
            return Err(DbError::UniqueViolation(format!(
                "duplicate key value violates unique constraint \"users_reg_no_key\" ({})",
                new.reg_no
            )));
        }

        let mut user = User::new(
            new.reg_no,
            new.first_name,
            new.last_name,
            new.role,
            new.password_hash,
        );
        user.gender = new.gender;

        let (student_id, teacher_id) = state.add_role_record(&user);
        state.users.insert(user.id, user.clone());

        Ok(ProvisionedUser {
            user,
            student_id,
            teacher_id,
        })
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Option<User>, DbError> {
        let mut state = self.write();
        state.check()?;
        Ok(state.users.get_mut(&id).map(|user| {
            if let Some(first_name) = update.first_name {
                user.first_name = first_name;
            }
            if let Some(last_name) = update.last_name {
                user.last_name = last_name;
            }
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn set_user_active(&self, id: Uuid, is_active: bool) -> Result<Option<User>, DbError> {
        let mut state = self.write();
        state.check()?;
        Ok(state.users.get_mut(&id).map(|user| {
            user.is_active = is_active;
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn dashboard_stats(&self, user_id: Uuid, role: Role) -> Result<DashboardStats, DbError> {
        let state = self.read();
        state.check()?;
        let mut stats = DashboardStats {
            role: Some(role),
            ..DashboardStats::default()
        };

        match role {
            Role::Teacher => {
                let teacher_id = state.teacher_of(user_id);
                let classes = state
                    .classes
                    .iter()
                    .filter(|c| c.class_teacher_id.is_some() && c.class_teacher_id == teacher_id)
                    .count();
                let subjects = state
                    .assignments
                    .iter()
                    .filter(|a| Some(a.teacher_id) == teacher_id)
                    .count();
                stats.total_classes = Some(classes as i64);
                stats.total_subjects = Some(subjects as i64);
            }
            Role::Student => {
                let student_id = state.student_of(user_id);
                let grades = state
                    .grades
                    .iter()
                    .filter(|g| Some(g.student_id) == student_id)
                    .count();
                let present = state
                    .attendance
                    .iter()
                    .filter(|a| Some(a.student_id) == student_id && a.present)
                    .count();
                stats.total_grades = Some(grades as i64);
                stats.attendance_count = Some(present as i64);
            }
            Role::Admin => {}
        }

        Ok(stats)
    }

    async fn find_teacher_by_user(&self, user_id: Uuid) -> Result<Option<TeacherRecord>, DbError> {
        let state = self.read();
        state.check()?;
        Ok(state.teachers.iter().find(|t| t.user_id == user_id).cloned())
    }

    async fn supervised_class(&self, teacher_id: Uuid) -> Result<Option<ClassRecord>, DbError> {
        let state = self.read();
        state.check()?;
        Ok(state
            .classes
            .iter()
            .find(|c| c.class_teacher_id == Some(teacher_id))
            .map(|c| c.class.clone()))
    }

    async fn class_students(&self, class_id: Uuid) -> Result<Vec<StudentSummary>, DbError> {
        let state = self.read();
        state.check()?;
        Ok(state
            .students
            .iter()
            .filter(|s| s.class_id == Some(class_id))
            .map(|s| {
                let (name, reg_no) = state.student_name(s.id);
                StudentSummary {
                    id: s.id,
                    name,
                    reg_no,
                }
            })
            .collect())
    }

    async fn teacher_subjects(&self, teacher_id: Uuid) -> Result<Vec<SubjectSummary>, DbError> {
        let state = self.read();
        state.check()?;
        let mut subjects: Vec<SubjectSummary> = state
            .subjects
            .iter()
            .filter(|s| state.teaches(teacher_id, s.id))
            .cloned()
            .collect();
        subjects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(subjects)
    }

    async fn teacher_test_scores(
        &self,
        teacher_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TestScoreRow>, DbError> {
        let state = self.read();
        state.check()?;
        let mut rows: Vec<TestScoreRow> = state
            .test_scores
            .iter()
            .filter(|ts| state.teaches(teacher_id, ts.subject_id))
            .map(|ts| {
                let (student_name, student_reg_no) = state.student_name(ts.student_id);
                TestScoreRow {
                    id: ts.id,
                    student_id: ts.student_id,
                    student_name,
                    student_reg_no,
                    subject_name: state.subject_name(ts.subject_id),
                    test: ts.test,
                    score: ts.score,
                    date: ts.date,
                }
            })
            .collect();
        rows.sort_by(|a, b| b.date.cmp(&a.date));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn teacher_recent_grades(
        &self,
        teacher_id: Uuid,
        limit: i64,
    ) -> Result<Vec<GradeEntry>, DbError> {
        let state = self.read();
        state.check()?;
        let mut grades: Vec<GradeEntry> = state
            .grades
            .iter()
            .filter(|g| state.teaches(teacher_id, g.subject_id))
            .map(|g| {
                let (student_name, student_reg_no) = state.student_name(g.student_id);
                GradeEntry {
                    id: g.id,
                    student_name,
                    student_reg_no,
                    subject_name: state.subject_name(g.subject_id),
                    score: g.score,
                    created_at: g.created_at,
                }
            })
            .collect();
        grades.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        grades.truncate(limit.max(0) as usize);
        Ok(grades)
    }

    async fn latest_announcements(&self, limit: i64) -> Result<Vec<Announcement>, DbError> {
        let state = self.read();
        state.check()?;
        // Stored in insertion order, newest last.
        Ok(state
            .announcements
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn create_announcement(&self, new: NewAnnouncement) -> Result<Announcement, DbError> {
        let mut state = self.write();
        state.check()?;
        let announcement = Announcement {
            id: Uuid::new_v4(),
            title: new.title,
            content: new.content,
            author_id: Some(new.author_id),
            created_at: Utc::now(),
        };
        state.announcements.push(announcement.clone());
        Ok(announcement)
    }

    async fn find_subject(&self, id: Uuid) -> Result<Option<SubjectSummary>, DbError> {
        let state = self.read();
        state.check()?;
        Ok(state.subjects.iter().find(|s| s.id == id).cloned())
    }

    async fn find_student(&self, id: Uuid) -> Result<Option<StudentRecord>, DbError> {
        let state = self.read();
        state.check()?;
        Ok(state.students.iter().find(|s| s.id == id).cloned())
    }

    async fn upsert_test_score(
        &self,
        student_id: Uuid,
        subject_id: Uuid,
        test: TestKind,
        score: f64,
    ) -> Result<TestScore, DbError> {
        let mut state = self.write();
        state.check()?;
        let now = Utc::now();

        if let Some(existing) = state
            .test_scores
            .iter_mut()
            .find(|ts| ts.student_id == student_id && ts.subject_id == subject_id && ts.test == test)
        {
            existing.score = score;
            existing.date = now;
            return Ok(existing.clone());
        }

        let saved = TestScore {
            id: Uuid::new_v4(),
            student_id,
            subject_id,
            test,
            score,
            date: now,
        };
        state.test_scores.push(saved.clone());
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(reg_no: &str, role: Role) -> NewUser {
        NewUser {
            reg_no: reg_no.to_string(),
            first_name: "Ada".into(),
            last_name: "Obi".into(),
            gender: None,
            role,
            password_hash: "hash".into(),
        }
    }

    #[tokio::test]
    async fn duplicate_registration_numbers_are_unique_violations() {
        let repo = MemoryRepository::new();
        let first = repo.create_user(new_user("STU20260001", Role::Student)).await.unwrap();
        assert!(first.student_id.is_some());

        let err = repo
            .create_user(new_user("STU20260001", Role::Teacher))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn upsert_replaces_the_score_for_the_same_test() {
        let repo = MemoryRepository::new();
        let user = repo.insert_user(User::new("STU001", "Ada", "Obi", Role::Student, "h"));
        let student_id = repo.student_id_for(user.id).unwrap();
        let subject_id = repo.add_subject("Mathematics");

        let first = repo
            .upsert_test_score(student_id, subject_id, TestKind::Test1, 40.0)
            .await
            .unwrap();
        let second = repo
            .upsert_test_score(student_id, subject_id, TestKind::Test1, 75.0)
            .await
            .unwrap();
        repo.upsert_test_score(student_id, subject_id, TestKind::Test2, 60.0)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(repo.test_scores().len(), 2);
        assert_eq!(second.score, 75.0);
    }

    #[tokio::test]
    async fn injected_failure_applies_to_every_operation() {
        let repo = MemoryRepository::new();
        repo.fail_lookups_with(Some(DbError::Connection("refused".into())));

        assert!(matches!(
            repo.find_user_by_id(Uuid::new_v4()).await,
            Err(DbError::Connection(_))
        ));
        assert!(repo.latest_announcements(5).await.is_err());

        repo.fail_lookups_with(None);
        assert!(repo.find_user_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }
}
