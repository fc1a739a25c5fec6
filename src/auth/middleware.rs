use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    auth::{credentials::CredentialStore, jwt::TokenService, repo_types::PublicUser},
    error::{AppError, Unauthenticated},
};

/// Turns the `Authorization` header of a request into a loaded identity.
/// Each stage either hands its output to the next or ends the request.
#[derive(Clone)]
pub struct IdentityResolver {
    tokens: TokenService,
    credentials: CredentialStore,
}

/// Pulls `<token>` out of `Authorization: Bearer <token>`.
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, Unauthenticated> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(Unauthenticated::NoToken)?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .ok_or(Unauthenticated::NoToken)?;
    if token.is_empty() {
        return Err(Unauthenticated::NoToken);
    }
    Ok(token)
}

impl IdentityResolver {
    pub fn new(tokens: TokenService, credentials: CredentialStore) -> Self {
        Self {
            tokens,
            credentials,
        }
    }

    fn verify(&self, token: &str) -> Result<Uuid, Unauthenticated> {
        self.tokens.verify(token).map_err(|e| {
            warn!(error = %e, "bearer token rejected");
            Unauthenticated::InvalidToken
        })
    }

    async fn load(&self, user_id: Uuid) -> Result<PublicUser, Unauthenticated> {
        match self.credentials.find_by_id(user_id).await {
            Ok(user) => Ok(user),
            Err(AppError::NotFound(_)) => {
                warn!(user_id = %user_id, "token subject no longer exists");
                Err(Unauthenticated::InvalidToken)
            }
            Err(e) => {
                error!(error = ?e, user_id = %user_id, "identity lookup failed");
                Err(Unauthenticated::Denied)
            }
        }
    }

    pub async fn resolve(&self, headers: &HeaderMap) -> Result<PublicUser, Unauthenticated> {
        let token = extract_bearer(headers).map_err(|reason| {
            debug!("request without bearer token");
            reason
        })?;
        let user_id = self.verify(token)?;
        let user = self.load(user_id).await?;
        debug!(user_id = %user.id, "identity resolved");
        Ok(user)
    }
}

/// Identity attached to the request by [`require_auth`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub PublicUser);

pub async fn require_auth(
    State(resolver): State<IdentityResolver>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = resolver
        .resolve(req.headers())
        .await
        .map_err(AppError::Unauthenticated)?;
    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<CurrentUser>().cloned().ok_or_else(|| {
            error!("CurrentUser requested on a route without require_auth");
            AppError::Unauthenticated(Unauthenticated::Denied)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use axum::{
        body::Body,
        http::{HeaderValue, Request as HttpRequest, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
        Extension, Router,
    };
    use async_trait::async_trait;
    use time::{Duration, OffsetDateTime};
    use tower::ServiceExt;

    use super::*;
    use crate::{
        auth::{
            repo::{RepoError, UserRepo},
            repo_types::User,
        },
        books::repo::MemoryBookRepo,
        clock::ManualClock,
        state::{test_config, AppState, Fakes},
        storage::FakeStorage,
    };

    /// A user store whose backend is down.
    struct UnreachableUserRepo;

    #[async_trait]
    impl UserRepo for UnreachableUserRepo {
        async fn insert(&self, _user: &User) -> Result<(), RepoError> {
            Err(anyhow::anyhow!("db down 10.0.0.3").into())
        }
        async fn update(&self, _user: &User) -> Result<(), RepoError> {
            Err(anyhow::anyhow!("db down 10.0.0.3").into())
        }
        async fn find_by_id(&self, _id: Uuid) -> anyhow::Result<Option<User>> {
            anyhow::bail!("db down 10.0.0.3")
        }
        async fn find_by_username(&self, _username: &str) -> anyhow::Result<Option<User>> {
            anyhow::bail!("db down 10.0.0.3")
        }
        async fn find_by_email(&self, _email: &str) -> anyhow::Result<Option<User>> {
            anyhow::bail!("db down 10.0.0.3")
        }
    }

    fn state_with_unreachable_users() -> AppState {
        AppState::from_parts(
            &test_config("test-secret"),
            Arc::new(UnreachableUserRepo),
            Arc::new(MemoryBookRepo::default()),
            Arc::new(FakeStorage::default()),
            Arc::new(ManualClock::new(OffsetDateTime::now_utc())),
        )
        .unwrap()
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    async fn resolver_with_user() -> (Fakes, IdentityResolver, PublicUser) {
        let fakes = Fakes::new();
        let user = fakes
            .state
            .credentials
            .create_identity("alice", "alice@x.com", "secret1")
            .await
            .unwrap();
        let resolver = IdentityResolver::new(
            fakes.state.tokens.clone(),
            fakes.state.credentials.clone(),
        );
        (fakes, resolver, user)
    }

    #[test]
    fn extract_bearer_variants() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), Err(Unauthenticated::NoToken));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&headers), Err(Unauthenticated::NoToken));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer(&headers), Err(Unauthenticated::NoToken));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_bearer(&headers), Ok("abc.def.ghi"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(extract_bearer(&headers), Ok("abc"));
    }

    #[tokio::test]
    async fn resolves_valid_token() {
        let (fakes, resolver, user) = resolver_with_user().await;
        let token = fakes.state.tokens.issue(user.id).unwrap();
        let resolved = resolver.resolve(&bearer(&token)).await.unwrap();
        assert_eq!(resolved, user);
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let (fakes, resolver, user) = resolver_with_user().await;
        let token = fakes.state.tokens.issue(user.id).unwrap();
        fakes.clock.advance(Duration::days(8));
        assert_eq!(
            resolver.resolve(&bearer(&token)).await,
            Err(Unauthenticated::InvalidToken)
        );
    }

    #[tokio::test]
    async fn rejects_token_for_deleted_account() {
        let (fakes, resolver, user) = resolver_with_user().await;
        let token = fakes.state.tokens.issue(user.id).unwrap();
        fakes.users.remove(user.id);
        assert_eq!(
            resolver.resolve(&bearer(&token)).await,
            Err(Unauthenticated::InvalidToken)
        );
    }

    #[tokio::test]
    async fn handler_runs_once_on_success_and_never_on_rejection() {
        let (fakes, _resolver, user) = resolver_with_user().await;
        let calls = Arc::new(AtomicUsize::new(0));

        async fn whoami(
            Extension(calls): Extension<Arc<AtomicUsize>>,
            CurrentUser(user): CurrentUser,
        ) -> String {
            calls.fetch_add(1, Ordering::SeqCst);
            user.username
        }

        let app = Router::new()
            .route("/whoami", get(whoami))
            .route_layer(from_fn_with_state(fakes.state.clone(), require_auth))
            .layer(Extension(calls.clone()))
            .with_state(fakes.state.clone());

        let res = app
            .clone()
            .oneshot(HttpRequest::get("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let token = fakes.state.tokens.issue(user.id).unwrap();
        let res = app
            .oneshot(
                HttpRequest::get("/whoami")
                    .header(AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn extractor_without_middleware_denies() {
        let fakes = Fakes::new();
        let app = Router::new()
            .route("/open", get(|CurrentUser(u): CurrentUser| async move { u.username }))
            .with_state(fakes.state);
        let res = app
            .oneshot(HttpRequest::get("/open").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn lookup_failure_is_denied_without_leaking_detail() {
        let state = state_with_unreachable_users();
        let token = state.tokens.issue(Uuid::new_v4()).unwrap();
        let resolver = IdentityResolver::new(state.tokens.clone(), state.credentials.clone());
        assert_eq!(
            resolver.resolve(&bearer(&token)).await,
            Err(Unauthenticated::Denied)
        );

        let res = crate::app::build_app(state)
            .oneshot(
                HttpRequest::get("/api/v1/me")
                    .header(AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"message":"access denied"}"#);
        assert!(!body.contains("db down"));
    }
}
