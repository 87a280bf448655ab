use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::Repository;
use crate::{
    error::DbError,
    models::{
        Announcement, ClassRecord, DashboardStats, GradeEntry, NewAnnouncement, NewUser,
        ProfileUpdate, ProvisionedUser, Role, StudentRecord, StudentSummary, SubjectSummary,
        TeacherRecord, TestKind, TestScore, TestScoreRow, User,
    },
    retry::{RetryOptions, retry_database_operation},
};

const USER_COLUMNS: &str =
    "id, reg_no, first_name, last_name, gender, role, password, is_active, created_at, updated_at";

/// PostgresRepository
///
/// The `Repository` implementation backed by PostgreSQL. Queries are checked at run
/// time (`query_as::<_, T>`), so building the crate never needs a live database.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// insert_user
///
/// One provisioning attempt: the user row and its role record commit together or not
/// at all. The statement timeout bounds how long a busy database can hold the attempt.
async fn insert_user(pool: &PgPool, new: &NewUser) -> Result<ProvisionedUser, sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET LOCAL statement_timeout = '20s'")
        .execute(&mut *tx)
        .await?;

    let user = sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (id, reg_no, first_name, last_name, gender, role, password, is_active, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, NOW(), NOW()) RETURNING {USER_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(&new.reg_no)
    .bind(&new.first_name)
    .bind(&new.last_name)
    .bind(new.gender)
    .bind(new.role)
    .bind(&new.password_hash)
    .fetch_one(&mut *tx)
    .await?;

    let mut provisioned = ProvisionedUser {
        user,
        student_id: None,
        teacher_id: None,
    };

    match new.role {
        Role::Student => {
            let id = Uuid::new_v4();
            sqlx::query("INSERT INTO students (id, user_id) VALUES ($1, $2)")
                .bind(id)
                .bind(provisioned.user.id)
                .execute(&mut *tx)
                .await?;
            provisioned.student_id = Some(id);
        }
        Role::Teacher => {
            let id = Uuid::new_v4();
            sqlx::query("INSERT INTO teachers (id, user_id) VALUES ($1, $2)")
                .bind(id)
                .bind(provisioned.user.id)
                .execute(&mut *tx)
                .await?;
            provisioned.teacher_id = Some(id);
        }
        Role::Admin => {}
    }

    tx.commit().await?;
    Ok(provisioned)
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, DbError> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_reg_no(&self, reg_no: &str) -> Result<Option<User>, DbError> {
        let user =
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE reg_no = $1"))
                .bind(reg_no)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user)
    }

    /// create_user
    ///
    /// Runs the provisioning transaction under the retry helper. Constraint violations
    /// (a duplicate registration number) fail on the first attempt.
    async fn create_user(&self, user: NewUser) -> Result<ProvisionedUser, DbError> {
        let pool = &self.pool;
        let user = &user;
        let provisioned = retry_database_operation(
            move || async move { insert_user(pool, user).await },
            RetryOptions::provisioning(),
        )
        .await?;
        Ok(provisioned)
    }

    /// update_profile
    ///
    /// `COALESCE` keeps the current value for every field left as `None`.
    async fn update_profile(
        &self,
        id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Option<User>, DbError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users \
             SET first_name = COALESCE($2, first_name), \
                 last_name = COALESCE($3, last_name), \
                 updated_at = NOW() \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(update.first_name)
        .bind(update.last_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn set_user_active(&self, id: Uuid, is_active: bool) -> Result<Option<User>, DbError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET is_active = $2, updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// dashboard_stats
    ///
    /// Teachers get class and subject counts, students get grade and attendance counts.
    /// Each pair of counters is queried concurrently.
    async fn dashboard_stats(&self, user_id: Uuid, role: Role) -> Result<DashboardStats, DbError> {
        let mut stats = DashboardStats {
            role: Some(role),
            ..DashboardStats::default()
        };

        match role {
            Role::Teacher => {
                let (classes, subjects) = tokio::try_join!(
                    sqlx::query_scalar::<_, i64>(
                        "SELECT COUNT(*) FROM classes c JOIN teachers t ON c.class_teacher_id = t.id WHERE t.user_id = $1",
                    )
                    .bind(user_id)
                    .fetch_one(&self.pool),
                    sqlx::query_scalar::<_, i64>(
                        "SELECT COUNT(*) FROM teaching_assignments a JOIN teachers t ON a.teacher_id = t.id WHERE t.user_id = $1",
                    )
                    .bind(user_id)
                    .fetch_one(&self.pool),
                )?;
                stats.total_classes = Some(classes);
                stats.total_subjects = Some(subjects);
            }
            Role::Student => {
                let (grades, attendance) = tokio::try_join!(
                    sqlx::query_scalar::<_, i64>(
                        "SELECT COUNT(*) FROM grades g JOIN students s ON g.student_id = s.id WHERE s.user_id = $1",
                    )
                    .bind(user_id)
                    .fetch_one(&self.pool),
                    sqlx::query_scalar::<_, i64>(
                        "SELECT COUNT(*) FROM attendance a JOIN students s ON a.student_id = s.id WHERE s.user_id = $1 AND a.present",
                    )
                    .bind(user_id)
                    .fetch_one(&self.pool),
                )?;
                stats.total_grades = Some(grades);
                stats.attendance_count = Some(attendance);
            }
            Role::Admin => {}
        }

        Ok(stats)
    }

    async fn find_teacher_by_user(&self, user_id: Uuid) -> Result<Option<TeacherRecord>, DbError> {
        let teacher =
            sqlx::query_as::<_, TeacherRecord>("SELECT id, user_id FROM teachers WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(teacher)
    }

    async fn supervised_class(&self, teacher_id: Uuid) -> Result<Option<ClassRecord>, DbError> {
        let class = sqlx::query_as::<_, ClassRecord>(
            "SELECT id, name FROM classes WHERE class_teacher_id = $1",
        )
        .bind(teacher_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(class)
    }

    async fn class_students(&self, class_id: Uuid) -> Result<Vec<StudentSummary>, DbError> {
        let students = sqlx::query_as::<_, StudentSummary>(
            r#"
            SELECT s.id, u.first_name || ' ' || u.last_name AS name, u.reg_no
            FROM students s
            JOIN users u ON s.user_id = u.id
            WHERE s.class_id = $1
            ORDER BY u.last_name, u.first_name
            "#,
        )
        .bind(class_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(students)
    }

    async fn teacher_subjects(&self, teacher_id: Uuid) -> Result<Vec<SubjectSummary>, DbError> {
        let subjects = sqlx::query_as::<_, SubjectSummary>(
            r#"
            SELECT DISTINCT sub.id, sub.name
            FROM teaching_assignments a
            JOIN subjects sub ON a.subject_id = sub.id
            WHERE a.teacher_id = $1
            ORDER BY sub.name
            "#,
        )
        .bind(teacher_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(subjects)
    }

    async fn teacher_test_scores(
        &self,
        teacher_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TestScoreRow>, DbError> {
        let rows = sqlx::query_as::<_, TestScoreRow>(
            r#"
            SELECT
                ts.id, ts.student_id,
                u.first_name || ' ' || u.last_name AS student_name,
                u.reg_no AS student_reg_no,
                sub.name AS subject_name,
                ts.test, ts.score, ts.date
            FROM test_scores ts
            JOIN students s ON ts.student_id = s.id
            JOIN users u ON s.user_id = u.id
            JOIN subjects sub ON ts.subject_id = sub.id
            WHERE EXISTS (
                SELECT 1 FROM teaching_assignments a
                WHERE a.subject_id = ts.subject_id AND a.teacher_id = $1
            )
            ORDER BY ts.date DESC
            LIMIT $2
            "#,
        )
        .bind(teacher_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn teacher_recent_grades(
        &self,
        teacher_id: Uuid,
        limit: i64,
    ) -> Result<Vec<GradeEntry>, DbError> {
        let grades = sqlx::query_as::<_, GradeEntry>(
            r#"
            SELECT
                g.id,
                u.first_name || ' ' || u.last_name AS student_name,
                u.reg_no AS student_reg_no,
                sub.name AS subject_name,
                g.score, g.created_at
            FROM grades g
            JOIN students s ON g.student_id = s.id
            JOIN users u ON s.user_id = u.id
            JOIN subjects sub ON g.subject_id = sub.id
            WHERE EXISTS (
                SELECT 1 FROM teaching_assignments a
                WHERE a.subject_id = g.subject_id AND a.teacher_id = $1
            )
            ORDER BY g.created_at DESC
            LIMIT $2
            "#,
        )
        .bind(teacher_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(grades)
    }

    async fn latest_announcements(&self, limit: i64) -> Result<Vec<Announcement>, DbError> {
        let announcements = sqlx::query_as::<_, Announcement>(
            "SELECT id, title, content, author_id, created_at FROM announcements ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(announcements)
    }

    async fn create_announcement(&self, new: NewAnnouncement) -> Result<Announcement, DbError> {
        let announcement = sqlx::query_as::<_, Announcement>(
            r#"
            INSERT INTO announcements (id, title, content, author_id, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING id, title, content, author_id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.title)
        .bind(new.content)
        .bind(new.author_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(announcement)
    }

    async fn find_subject(&self, id: Uuid) -> Result<Option<SubjectSummary>, DbError> {
        let subject =
            sqlx::query_as::<_, SubjectSummary>("SELECT id, name FROM subjects WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(subject)
    }

    async fn find_student(&self, id: Uuid) -> Result<Option<StudentRecord>, DbError> {
        let student = sqlx::query_as::<_, StudentRecord>(
            "SELECT id, user_id, class_id FROM students WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(student)
    }

    async fn upsert_test_score(
        &self,
        student_id: Uuid,
        subject_id: Uuid,
        test: TestKind,
        score: f64,
    ) -> Result<TestScore, DbError> {
        let saved = sqlx::query_as::<_, TestScore>(
            r#"
            INSERT INTO test_scores (id, student_id, subject_id, test, score, date)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (subject_id, test, student_id)
            DO UPDATE SET score = EXCLUDED.score, date = NOW()
            RETURNING id, student_id, subject_id, test, score, date
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(subject_id)
        .bind(test)
        .bind(score)
        .fetch_one(&self.pool)
        .await?;
        Ok(saved)
    }
}
