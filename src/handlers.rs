use crate::{
    AppState,
    auth::AuthUser,
    cookies,
    error::{ApiError, DbError, ErrorBody},
    models::{
        Announcement, ApiResponse, ClassOverview, CreateAnnouncementRequest, CreateUserRequest,
        CreatedUser, DashboardStats, IdentitySummary, LoginRequest, LoginResponse,
        MessageResponse, NewAnnouncement, NewUser, ProfileUpdate, RefreshResponse, Role,
        ScoreUploadRequest, TeacherDashboard, TeacherOverview, TestKind, TestScore,
        TestScoreEntry, UpdateProfileRequest, UpdateUserStatusRequest, UserProfile,
    },
    notify::notify_best_effort,
    password::{generate_password, generate_reg_no, hash_password, verify_password},
};
use axum::{
    Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

const ANNOUNCEMENT_LIMIT: i64 = 5;
const DASHBOARD_SCORE_LIMIT: i64 = 50;
const DASHBOARD_GRADE_LIMIT: i64 = 10;
const MIN_NAME_LEN: usize = 2;

// --- Extraction Helpers ---

/// A body that is not valid JSON for the expected shape (wrong field types included)
/// is a 400 `INVALID_INPUT_TYPE`, reported in the common error format.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        tracing::debug!(error = %rejection.body_text(), "request body rejected");
        ApiError::validation("INVALID_INPUT_TYPE", "Request body has an invalid format or field types")
    })
}

fn path_ids<T>(path: Result<Path<T>, PathRejection>) -> Result<T, ApiError> {
    path.map(|Path(ids)| ids)
        .map_err(|_| ApiError::validation("INVALID_ID", "Path parameters must be valid UUIDs"))
}

/// Trimmed value, or `None` when absent or blank.
fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

// --- Public Handlers ---

/// health
///
/// [Public Route] Liveness probe for monitoring and load balancers.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up"))
)]
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "UP" }))
}

/// login
///
/// [Public Route] Exchanges a registration number and password for a session.
///
/// Unknown registration numbers and wrong passwords produce the same
/// `INVALID_CREDENTIALS` rejection. On success both tokens are set as HttpOnly cookies.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in, session cookies set", body = LoginResponse),
        (status = 400, description = "Missing or malformed credentials", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 403, description = "Account suspended", body = ErrorBody)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let req = json_body(payload)?;

    let (Some(reg_no), Some(password)) = (present(req.reg_no), req.password.filter(|p| !p.is_empty()))
    else {
        return Err(ApiError::validation(
            "MISSING_CREDENTIALS",
            "Registration number and password are required",
        ));
    };

    let user = state
        .repo
        .find_user_by_reg_no(&reg_no)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    if !verify_password(password, user.password_hash.clone()).await? {
        tracing::info!(reg_no = %reg_no, "login rejected: wrong password");
        return Err(ApiError::InvalidCredentials);
    }

    if !user.is_active {
        return Err(ApiError::AccountSuspended);
    }

    let tokens = state.tokens.issue_tokens(user.id)?;

    tracing::info!(user_id = %user.id, role = %user.role, "user logged in");
    notify_best_effort(
        &state.notifier,
        &format!(
            "🔔 User logged in:\nRegistration No: {}\nTime: {}\nName: {}",
            user.reg_no,
            timestamp(),
            user.full_name()
        ),
    )
    .await;

    let jar = cookies::set_session_cookies(
        jar,
        tokens,
        state.tokens.access_ttl_secs(),
        state.tokens.refresh_ttl_secs(),
        state.config.cookie_policy(),
    );

    Ok((
        jar,
        Json(LoginResponse {
            success: true,
            message: "Login successful".to_string(),
            user: IdentitySummary::from(&user),
        }),
    ))
}

/// refresh
///
/// [Public Route] Issues a new access token from the `refreshToken` cookie.
///
/// The identity is re-read so a deleted account cannot keep refreshing. The refresh
/// token itself is returned unchanged (no rotation).
#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    responses(
        (status = 200, description = "New access token issued", body = RefreshResponse),
        (status = 401, description = "Missing, expired or invalid refresh token", body = ErrorBody)
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<RefreshResponse>), ApiError> {
    let refresh_token = cookies::refresh_token(&jar).ok_or(ApiError::NoRefreshToken)?;

    let user_id = state.tokens.verify_refresh(&refresh_token)?;

    let user = state
        .repo
        .find_user_by_id(user_id)
        .await?
        .ok_or(ApiError::UserNotFound)?;

    let access_token = state.tokens.issue_access_token(user.id)?;
    tracing::debug!(user_id = %user.id, "access token refreshed");

    let jar = cookies::set_access_cookie(
        jar,
        access_token.clone(),
        state.tokens.access_ttl_secs(),
        state.config.cookie_policy(),
    );

    Ok((
        jar,
        Json(RefreshResponse {
            success: true,
            message: "Access token refreshed successfully".to_string(),
            access_token,
            user: IdentitySummary::from(&user),
        }),
    ))
}

/// logout
///
/// [Public Route] Clears both session cookies. Idempotent: succeeds with or without a
/// session.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses((status = 200, description = "Session cookies cleared", body = MessageResponse))
)]
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<MessageResponse>) {
    notify_best_effort(
        &state.notifier,
        &format!("🔔 User logged out:\nTime: {}", timestamp()),
    )
    .await;

    let jar = cookies::clear_session_cookies(jar, state.config.cookie_policy());
    (jar, Json(MessageResponse::ok("Logged out successfully")))
}

// --- Admin Handlers ---

/// add_user
///
/// [Admin Route] Provisions an account with a generated registration number and
/// password. The password appears only in this response.
#[utoipa::path(
    post,
    path = "/api/auth/adduser",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Account created", body = CreatedUser),
        (status = 400, description = "Missing fields", body = ErrorBody),
        (status = 409, description = "Registration number already exists", body = ErrorBody),
        (status = 503, description = "Database busy", body = ErrorBody)
    )
)]
pub async fn add_user(
    State(state): State<AppState>,
    AuthUser { id: admin_id, .. }: AuthUser,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<CreatedUser>>), ApiError> {
    let req = json_body(payload)?;

    let (Some(first_name), Some(last_name), Some(role)) =
        (present(req.first_name), present(req.last_name), req.role)
    else {
        return Err(ApiError::validation(
            "MISSING_FIELDS",
            "First name, last name, and role are required",
        ));
    };

    if role == Role::Student && req.gender.is_none() {
        return Err(ApiError::validation(
            "MISSING_GENDER",
            "Gender is required for student registration",
        ));
    }

    let generated_password = generate_password();
    let password_hash =
        hash_password(generated_password.clone(), state.config.password_hash_cost).await?;

    let provisioned = state
        .repo
        .create_user(NewUser {
            reg_no: generate_reg_no(role),
            first_name,
            last_name,
            gender: req.gender,
            role,
            password_hash,
        })
        .await
        .map_err(|e| match e {
            DbError::UniqueViolation(_) => ApiError::Conflict {
                code: "DUPLICATE_REGNO",
                message: "Registration number already exists".to_string(),
            },
            DbError::Timeout(_) => ApiError::TransactionTimeout,
            other => ApiError::Database(other),
        })?;

    let user = &provisioned.user;
    tracing::info!(
        user_id = %user.id,
        reg_no = %user.reg_no,
        role = %user.role,
        created_by = %admin_id,
        "account provisioned"
    );

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(
            format!("{} created successfully", role.as_str().to_lowercase()),
            CreatedUser {
                id: user.id,
                reg_no: user.reg_no.clone(),
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
                role: user.role,
                generated_password,
                gender: user.gender,
                student_id: provisioned.student_id,
                teacher_id: provisioned.teacher_id,
            },
        )),
    ))
}

/// set_user_status
///
/// [Admin Route] Activates or suspends an account. A suspended account is refused by
/// the session middleware on its next request, even with an unexpired token.
#[utoipa::path(
    patch,
    path = "/api/admin/users/{id}/status",
    request_body = UpdateUserStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = UserProfile),
        (status = 404, description = "User not found", body = ErrorBody)
    )
)]
pub async fn set_user_status(
    State(state): State<AppState>,
    AuthUser { id: admin_id, .. }: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateUserStatusRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<UserProfile>>, ApiError> {
    let user_id = path_ids(path)?;
    let req = json_body(payload)?;

    let user = state
        .repo
        .set_user_active(user_id, req.is_active)
        .await?
        .ok_or_else(|| {
            ApiError::not_found("USER_NOT_FOUND", "The requested user could not be found.")
        })?;

    tracing::info!(
        user_id = %user.id,
        is_active = user.is_active,
        changed_by = %admin_id,
        "account status changed"
    );

    Ok(Json(ApiResponse::ok(
        "User status updated successfully",
        UserProfile::from(&user),
    )))
}

// --- Authenticated Handlers ---

/// get_current_user
///
/// [Authenticated Route] The caller's profile, as resolved by the session middleware.
#[utoipa::path(
    get,
    path = "/api/users/me",
    responses(
        (status = 200, description = "Current user", body = UserProfile),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    )
)]
pub async fn get_current_user(user: AuthUser) -> Json<ApiResponse<UserProfile>> {
    Json(ApiResponse::ok(
        "User information retrieved successfully",
        user.profile,
    ))
}

/// update_profile
///
/// [Authenticated Route] Changes the caller's first and/or last name. Each provided name
/// must have at least two characters after trimming.
#[utoipa::path(
    put,
    path = "/api/users/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserProfile),
        (status = 400, description = "Invalid or missing fields", body = ErrorBody)
    )
)]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser { id, .. }: AuthUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<UserProfile>>, ApiError> {
    let req = json_body(payload)?;
    let update = ProfileUpdate {
        first_name: present(req.first_name),
        last_name: present(req.last_name),
    };

    if update.first_name.is_none() && update.last_name.is_none() {
        return Err(ApiError::validation(
            "NO_UPDATE_DATA",
            "At least one field (firstName or lastName) is required.",
        ));
    }
    if update.first_name.as_ref().is_some_and(|n| n.chars().count() < MIN_NAME_LEN) {
        return Err(ApiError::validation(
            "INVALID_FIRST_NAME",
            "First name must be at least 2 characters long.",
        ));
    }
    if update.last_name.as_ref().is_some_and(|n| n.chars().count() < MIN_NAME_LEN) {
        return Err(ApiError::validation(
            "INVALID_LAST_NAME",
            "Last name must be at least 2 characters long.",
        ));
    }

    let user = state
        .repo
        .update_profile(id, update)
        .await?
        .ok_or(ApiError::UserNotFound)?;

    Ok(Json(ApiResponse::ok(
        "Profile updated successfully",
        UserProfile::from(&user),
    )))
}

/// get_dashboard_stats
///
/// [Authenticated Route] Counters for the caller's dashboard, shaped by role.
#[utoipa::path(
    get,
    path = "/api/users/dashboard/stats",
    responses((status = 200, description = "Dashboard statistics", body = DashboardStats))
)]
pub async fn get_dashboard_stats(
    State(state): State<AppState>,
    AuthUser { id, role, .. }: AuthUser,
) -> Result<Json<ApiResponse<DashboardStats>>, ApiError> {
    let stats = state.repo.dashboard_stats(id, role).await?;
    Ok(Json(ApiResponse::ok(
        "Dashboard statistics retrieved successfully",
        stats,
    )))
}

/// get_teacher_dashboard
///
/// [Teacher Route] The supervised class with its students, the subjects taught, the 50
/// newest test scores and the 10 newest grades for those subjects.
#[utoipa::path(
    get,
    path = "/api/users/teacher",
    responses(
        (status = 200, description = "Teacher dashboard", body = TeacherDashboard),
        (status = 403, description = "Caller is not a teacher", body = ErrorBody),
        (status = 404, description = "No teacher record", body = ErrorBody)
    )
)]
pub async fn get_teacher_dashboard(
    State(state): State<AppState>,
    AuthUser { id, .. }: AuthUser,
) -> Result<Json<ApiResponse<TeacherDashboard>>, ApiError> {
    let teacher = state
        .repo
        .find_teacher_by_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found("TEACHER_NOT_FOUND", "Teacher profile not found."))?;

    let (class, subjects, scores, recent_grades) = tokio::try_join!(
        state.repo.supervised_class(teacher.id),
        state.repo.teacher_subjects(teacher.id),
        state.repo.teacher_test_scores(teacher.id, DASHBOARD_SCORE_LIMIT),
        state.repo.teacher_recent_grades(teacher.id, DASHBOARD_GRADE_LIMIT),
    )?;

    let classes = match class {
        Some(class) => {
            let students = state.repo.class_students(class.id).await?;
            vec![ClassOverview {
                id: class.id,
                name: class.name,
                student_count: students.len(),
                students,
            }]
        }
        None => Vec::new(),
    };
    let total_students = classes.iter().map(|c| c.student_count).sum();

    Ok(Json(ApiResponse::ok(
        "Teacher dashboard data retrieved successfully",
        TeacherDashboard {
            teacher: TeacherOverview {
                id: teacher.id,
                total_classes: classes.len(),
                total_subjects: subjects.len(),
                total_students,
                classes,
                subjects,
            },
            recent_grades,
            test_scores: scores.into_iter().map(TestScoreEntry::from).collect(),
        },
    )))
}

/// get_announcements
///
/// [Authenticated Route] The five most recent announcements, newest first.
#[utoipa::path(
    get,
    path = "/api/users/announcements",
    responses((status = 200, description = "Latest announcements", body = [Announcement]))
)]
pub async fn get_announcements(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Announcement>>>, ApiError> {
    let announcements = state.repo.latest_announcements(ANNOUNCEMENT_LIMIT).await?;
    Ok(Json(ApiResponse::ok(
        "Announcements retrieved successfully",
        announcements,
    )))
}

/// post_announcement
///
/// [Staff Route] Publishes an announcement authored by the caller.
#[utoipa::path(
    post,
    path = "/api/users/post/announcement",
    request_body = CreateAnnouncementRequest,
    responses(
        (status = 201, description = "Announcement created", body = Announcement),
        (status = 400, description = "Missing title or content", body = ErrorBody)
    )
)]
pub async fn post_announcement(
    State(state): State<AppState>,
    AuthUser { id, .. }: AuthUser,
    payload: Result<Json<CreateAnnouncementRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<Announcement>>), ApiError> {
    let req = json_body(payload)?;

    let (Some(title), Some(content)) = (present(req.title), present(req.content)) else {
        return Err(ApiError::validation(
            "MISSING_FIELDS",
            "Title and content are required",
        ));
    };

    let announcement = state
        .repo
        .create_announcement(NewAnnouncement {
            title,
            content,
            author_id: id,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok("Announcement posted successfully", announcement)),
    ))
}

/// upload_single_result
///
/// [Teacher Route] Records one student's score for a subject test, replacing any score
/// already recorded for the same test.
#[utoipa::path(
    post,
    path = "/api/result-upload/single/{studentId}/{subjectId}",
    request_body = ScoreUploadRequest,
    params(
        ("studentId" = Uuid, Path, description = "Student record id"),
        ("subjectId" = Uuid, Path, description = "Subject id")
    ),
    responses(
        (status = 200, description = "Score saved", body = TestScore),
        (status = 400, description = "Missing fields, unknown test or score out of range", body = ErrorBody),
        (status = 404, description = "Unknown student or subject", body = ErrorBody)
    )
)]
pub async fn upload_single_result(
    State(state): State<AppState>,
    AuthUser { id: teacher_user_id, .. }: AuthUser,
    path: Result<Path<(Uuid, Uuid)>, PathRejection>,
    payload: Result<Json<ScoreUploadRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<TestScore>>, ApiError> {
    let (student_id, subject_id) = path_ids(path)?;
    let req = json_body(payload)?;

    let (Some(score), Some(test_type)) = (req.score, present(req.test_type)) else {
        return Err(ApiError::validation(
            "MISSING_FIELDS",
            "Please ensure all required fields are provided",
        ));
    };

    let test: TestKind = test_type
        .parse()
        .map_err(|_| ApiError::validation("INVALID_TEST_TYPE", "Invalid test type"))?;

    if !(0.0..=100.0).contains(&score) {
        return Err(ApiError::validation("INVALID_SCORE", "Invalid score value"));
    }

    state
        .repo
        .find_subject(subject_id)
        .await?
        .ok_or_else(|| ApiError::not_found("SUBJECT_NOT_FOUND", "The subject was not found"))?;

    let student = state
        .repo
        .find_student(student_id)
        .await?
        .ok_or_else(|| ApiError::not_found("STUDENT_NOT_FOUND", "The student was not found"))?;

    let saved = state
        .repo
        .upsert_test_score(student.id, subject_id, test, score)
        .await?;

    tracing::info!(
        student_id = %student.id,
        subject_id = %subject_id,
        test = ?test,
        uploaded_by = %teacher_user_id,
        "test score recorded"
    );

    Ok(Json(ApiResponse::ok("Result uploaded successfully", saved)))
}
