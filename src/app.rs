use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::{auth, books};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .merge(auth::router(&state))
                .merge(books::router(&state))
                .route("/health", get(|| async { "ok" })),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().path().to_string();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, ?latency, "response");
                        } else {
                            tracing::info!(%status, ?latency, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header::AUTHORIZATION, Method, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use time::Duration;
    use tower::ServiceExt;

    use super::*;
    use crate::state::Fakes;

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(b) => req
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res: Response = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn register(app: &Router, name: &str) -> String {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({
                "username": name,
                "email": format!("{}@x.com", name),
                "password": "secret1",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["token"].as_str().unwrap().to_string()
    }

    fn new_book() -> Value {
        json!({
            "title": "Dune",
            "caption": "spice",
            "rating": 5,
            "image": "data:image/png;base64,iVBORw0KGgo=",
        })
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = build_app(Fakes::new().state);
        let res = app
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_login_and_resolve_identity() {
        let app = build_app(Fakes::new().state);
        register(&app, "alice").await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "alice@x.com", "password": "secret1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["user"].get("passwordHash").is_none());
        let token = body["token"].as_str().unwrap().to_string();

        let (status, me) = call(&app, Method::GET, "/api/v1/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["username"], "alice");
        assert_eq!(me["email"], "alice@x.com");
    }

    #[tokio::test]
    async fn login_by_username_and_wrong_password() {
        let app = build_app(Fakes::new().state);
        register(&app, "alice").await;

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "username": "alice", "password": "secret1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, wrong_pw) = call(
            &app,
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "username": "alice", "password": "secret2" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, unknown) = call(
            &app,
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "username": "mallory", "password": "secret1" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        // same answer whichever factor failed
        assert_eq!(wrong_pw, unknown);
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_short_passwords() {
        let app = build_app(Fakes::new().state);
        register(&app, "alice").await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({ "username": "alice", "email": "new@x.com", "password": "secret1" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "username already exists");

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({ "username": "carol", "email": "carol@x.com", "password": "12345" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_header_is_no_token() {
        let app = build_app(Fakes::new().state);
        let (status, body) = call(&app, Method::GET, "/api/v1/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["message"].as_str().unwrap().contains("no token provided"));

        let (status, _) = call(&app, Method::GET, "/api/v1/books", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn foreign_secret_is_token_invalid() {
        let app = build_app(Fakes::new().state);
        register(&app, "alice").await;

        let other = Fakes::with_secret("some-other-secret");
        let user = other
            .state
            .credentials
            .create_identity("alice", "alice@x.com", "secret1")
            .await
            .unwrap();
        let forged = other.state.tokens.issue(user.id).unwrap();

        let (status, body) = call(&app, Method::GET, "/api/v1/me", Some(&forged), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["message"].as_str().unwrap().contains("token invalid"));
    }

    #[tokio::test]
    async fn stranger_cannot_delete_book() {
        let app = build_app(Fakes::new().state);
        let alice = register(&app, "alice").await;
        let bob = register(&app, "bob").await;

        let (status, book) =
            call(&app, Method::POST, "/api/v1/books", Some(&alice), Some(new_book())).await;
        assert_eq!(status, StatusCode::CREATED);
        let uri = format!("/api/v1/books/{}", book["id"].as_str().unwrap());

        let (status, body) = call(&app, Method::DELETE, &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], "not authorized");

        let (_, feed) = call(&app, Method::GET, "/api/v1/books", Some(&bob), None).await;
        assert_eq!(feed["totalBooks"], 1);
        assert_eq!(feed["books"][0]["author"]["username"], "alice");

        let (status, _) = call(&app, Method::DELETE, &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::DELETE, &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn token_rejected_after_expiry() {
        let fakes = Fakes::new();
        let clock = fakes.clock.clone();
        let app = build_app(fakes.state);
        let token = register(&app, "alice").await;

        clock.advance(Duration::days(6));
        let (status, _) = call(&app, Method::GET, "/api/v1/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);

        clock.advance(Duration::days(2));
        let (status, body) = call(&app, Method::GET, "/api/v1/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["message"].as_str().unwrap().contains("token invalid"));
    }

    #[tokio::test]
    async fn profile_update_and_password_change() {
        let app = build_app(Fakes::new().state);
        let token = register(&app, "alice").await;

        let (status, me) = call(
            &app,
            Method::PATCH,
            "/api/v1/me",
            Some(&token),
            Some(json!({ "profileImage": "avatars/alice.png" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["profileImage"], "avatars/alice.png");

        let (status, _) = call(
            &app,
            Method::PUT,
            "/api/v1/me/password",
            Some(&token),
            Some(json!({ "currentPassword": "wrong1", "newPassword": "secret2" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::PUT,
            "/api/v1/me/password",
            Some(&token),
            Some(json!({ "currentPassword": "secret1", "newPassword": "secret2" })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "username": "alice", "password": "secret2" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_input_gets_json_error_body() {
        let app = build_app(Fakes::new().state);

        let res = app
            .clone()
            .oneshot(
                Request::post("/api/v1/auth/register")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["message"].is_string());

        let token = register(&app, "alice").await;
        let (status, body) =
            call(&app, Method::GET, "/api/v1/books?page=abc", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].is_string());

        let (status, body) =
            call(&app, Method::DELETE, "/api/v1/books/not-a-uuid", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].is_string());
    }
}
