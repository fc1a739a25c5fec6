use std::sync::Arc;

use anyhow::Context;
use axum::extract::FromRef;

use crate::auth::{
    credentials::CredentialStore, jwt::TokenService, middleware::IdentityResolver,
    password::PasswordHashing, repo::PgUserRepo, repo::UserRepo,
};
use crate::books::repo::{BookRepo, PgBookRepo};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::storage::{Storage, StorageClient};

#[derive(Clone)]
pub struct AppState {
    pub credentials: CredentialStore,
    pub tokens: TokenService,
    pub books: Arc<dyn BookRepo>,
    pub storage: Arc<dyn StorageClient>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;

        let storage = Arc::new(Storage::new(&config.storage, "us-east-1").await?)
            as Arc<dyn StorageClient>;

        Self::from_parts(
            &config,
            Arc::new(PgUserRepo::new(db.clone())),
            Arc::new(PgBookRepo::new(db)),
            storage,
            Arc::new(SystemClock),
        )
    }

    pub fn from_parts(
        config: &AppConfig,
        users: Arc<dyn UserRepo>,
        books: Arc<dyn BookRepo>,
        storage: Arc<dyn StorageClient>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let hashing = PasswordHashing::new(config.hash)?;
        let credentials = CredentialStore::new(users, hashing, clock.clone());
        let tokens = TokenService::new(&config.jwt, clock.clone());
        Ok(Self {
            credentials,
            tokens,
            books,
            storage,
            clock,
        })
    }
}

impl FromRef<AppState> for IdentityResolver {
    fn from_ref(state: &AppState) -> Self {
        IdentityResolver::new(state.tokens.clone(), state.credentials.clone())
    }
}

#[cfg(test)]
pub use fakes::{test_config, Fakes};
