use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        credentials::IdentityChanges,
        dto::{
            AuthResponse, ChangePasswordRequest, LoginRequest, RegisterRequest,
            UpdateProfileRequest,
        },
        middleware::CurrentUser,
        repo_types::PublicUser,
    },
    error::{AppError, Unauthenticated},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me).patch(update_me))
        .route("/me/password", put(change_password))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let Json(payload) = payload?;
    let user = state
        .credentials
        .create_identity(&payload.username, &payload.email, &payload.password)
        .await?;
    let token = state.tokens.issue(user.id)?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, AppError> {
    let Json(payload) = payload?;
    if payload.login.trim().is_empty() || payload.password.is_empty() {
        return Err(AppError::validation(
            "username or email and password are required",
        ));
    }

    let Some(user) = state.credentials.find_by_login(&payload.login).await? else {
        warn!("login for unknown account");
        return Err(AppError::Unauthenticated(Unauthenticated::BadCredentials));
    };

    if !state
        .credentials
        .verify_password(&user, &payload.password)
        .await?
    {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::Unauthenticated(Unauthenticated::BadCredentials));
    }

    let token = state.tokens.issue(user.id)?;
    info!(user_id = %user.id, "user logged in");
    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<PublicUser> {
    Json(user)
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<PublicUser>, AppError> {
    let Json(payload) = payload?;
    let changes = IdentityChanges {
        username: payload.username,
        email: payload.email,
        profile_image: payload.profile_image,
        password: None,
    };
    let updated = state.credentials.update(user.id, changes).await?;
    info!("profile updated");
    Ok(Json(updated))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Json(payload) = payload?;
    let record = state
        .credentials
        .find_record(user.id)
        .await?
        .ok_or(AppError::NotFound("user"))?;

    if !state
        .credentials
        .verify_password(&record, &payload.current_password)
        .await?
    {
        warn!("password change with wrong current password");
        return Err(AppError::validation("current password is incorrect"));
    }

    state
        .credentials
        .set_password(user.id, &payload.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    #[test]
    fn public_user_serialization_has_no_hash() {
        let now = OffsetDateTime::now_utc();
        let response = AuthResponse {
            token: "t".into(),
            user: PublicUser {
                id: uuid::Uuid::new_v4(),
                username: "alice".into(),
                email: "test@example.com".to_string(),
                profile_image: String::new(),
                created_at: now,
                updated_at: now,
            },
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("test@example.com"));
        assert!(json.contains("profileImage"));
        assert!(json.contains("createdAt"));
        assert!(!json.to_lowercase().contains("password"));
    }

    #[test]
    fn login_accepts_email_or_username_keys() {
        let by_email: LoginRequest =
            serde_json::from_str(r#"{"email":"a@x.com","password":"p"}"#).unwrap();
        assert_eq!(by_email.login, "a@x.com");
        let by_name: LoginRequest =
            serde_json::from_str(r#"{"username":"alice","password":"p"}"#).unwrap();
        assert_eq!(by_name.login, "alice");
    }
}
