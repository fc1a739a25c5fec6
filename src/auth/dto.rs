use serde::{Deserialize, Serialize};

use crate::auth::repo_types::PublicUser;

// Request bodies carrying passwords deliberately do not implement Debug.

/// Request body for user registration.
#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Request body for login. `login` may be a username or an email.
#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default, alias = "email", alias = "username", alias = "usernameOrEmail")]
    pub login: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub profile_image: Option<String>,
}

/// Response returned after login or register.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: PublicUser,
}
