use std::{fmt, sync::Arc};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        password::PasswordHashing,
        repo::UserRepo,
        repo_types::{PublicUser, User},
    },
    clock::Clock,
    error::AppError,
};

pub const MIN_PASSWORD_CHARS: usize = 6;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_password(plain: &str) -> Result<(), AppError> {
    if plain.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AppError::validation(format!(
            "password must be at least {} characters long",
            MIN_PASSWORD_CHARS
        )));
    }
    Ok(())
}

fn check_username(username: &str) -> Result<(), AppError> {
    if username.is_empty() {
        return Err(AppError::validation("username is required"));
    }
    Ok(())
}

fn check_email(email: &str) -> Result<(), AppError> {
    if email.is_empty() {
        return Err(AppError::validation("email is required"));
    }
    if !is_valid_email(email) {
        return Err(AppError::validation("email is invalid"));
    }
    Ok(())
}

/// A patch against a stored identity. Setting `password` is what marks the
/// password as touched; nothing else triggers a re-hash.
#[derive(Default, Clone)]
pub struct IdentityChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub profile_image: Option<String>,
    pub password: Option<String>,
}

impl IdentityChanges {
    pub fn password_touched(&self) -> bool {
        self.password.is_some()
    }
}

impl fmt::Debug for IdentityChanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityChanges")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("profile_image", &self.profile_image)
            .field("password_touched", &self.password_touched())
            .finish()
    }
}

/// Owns user records and the one-way password transform.
#[derive(Clone)]
pub struct CredentialStore {
    repo: Arc<dyn UserRepo>,
    hashing: PasswordHashing,
    clock: Arc<dyn Clock>,
}

impl CredentialStore {
    pub fn new(repo: Arc<dyn UserRepo>, hashing: PasswordHashing, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            hashing,
            clock,
        }
    }

    pub async fn create_identity(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<PublicUser, AppError> {
        let username = username.trim().to_string();
        let email = normalize_email(email);
        check_username(&username)?;
        check_email(&email)?;
        check_password(password)?;

        if self.repo.find_by_username(&username).await?.is_some() {
            warn!(username = %username, "username already registered");
            return Err(AppError::validation("username already exists"));
        }
        if self.repo.find_by_email(&email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(AppError::validation("email already exists"));
        }

        let password_hash = self.hashing.hash(password.to_string()).await?;
        let now = self.clock.now();
        let user = User {
            id: Uuid::new_v4(),
            username,
            email,
            password_hash,
            profile_image: String::new(),
            created_at: now,
            updated_at: now,
        };
        self.repo.insert(&user).await?;

        info!(user_id = %user.id, username = %user.username, "identity created");
        Ok(user.into())
    }

    pub async fn update(
        &self,
        user_id: Uuid,
        changes: IdentityChanges,
    ) -> Result<PublicUser, AppError> {
        let mut user = self
            .repo
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::NotFound("user"))?;

        if let Some(username) = changes.username {
            let username = username.trim().to_string();
            check_username(&username)?;
            user.username = username;
        }
        if let Some(email) = changes.email {
            let email = normalize_email(&email);
            check_email(&email)?;
            user.email = email;
        }
        if let Some(profile_image) = changes.profile_image {
            user.profile_image = profile_image;
        }
        if let Some(password) = changes.password {
            check_password(&password)?;
            user.password_hash = self.hashing.hash(password).await?;
            debug!(user_id = %user.id, "password re-hashed");
        }
        user.updated_at = self.clock.now();

        self.repo.update(&user).await?;
        Ok(user.into())
    }

    pub async fn set_password(&self, user_id: Uuid, password: &str) -> Result<(), AppError> {
        self.update(
            user_id,
            IdentityChanges {
                password: Some(password.to_string()),
                ..Default::default()
            },
        )
        .await?;
        info!(user_id = %user_id, "password changed");
        Ok(())
    }

    /// `false` on mismatch; errors only when the stored hash is unreadable.
    pub async fn verify_password(&self, user: &User, password: &str) -> anyhow::Result<bool> {
        self.hashing
            .verify(password.to_string(), user.password_hash.clone())
            .await
    }

    pub async fn find_by_id(&self, user_id: Uuid) -> Result<PublicUser, AppError> {
        self.repo
            .find_by_id(user_id)
            .await?
            .map(PublicUser::from)
            .ok_or(AppError::NotFound("user"))
    }

    /// Full record including the hash. Stays inside the auth module.
    pub(crate) async fn find_record(&self, user_id: Uuid) -> anyhow::Result<Option<User>> {
        self.repo.find_by_id(user_id).await
    }

    /// Looks up by email when the login contains '@', by username otherwise.
    pub(crate) async fn find_by_login(&self, login: &str) -> anyhow::Result<Option<User>> {
        let login = login.trim();
        if login.contains('@') {
            self.repo.find_by_email(&normalize_email(login)).await
        } else {
            self.repo.find_by_username(login).await
        }
    }
}
