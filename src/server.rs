//! HTTP front end for the timestamping service.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Form, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::error::Error;
use crate::stamper::{Stamper, TimestampRequest};

/// Well-formed requests are tiny; anything larger is garbage.
const MAX_BODY_BYTES: usize = 1000;

#[derive(Clone)]
struct AppState {
    stamper: Arc<Stamper>,
}

#[derive(Debug, Deserialize)]
struct StampForm {
    request: Option<String>,
    commit: Option<String>,
    tagname: Option<String>,
    tree: Option<String>,
    parent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetParams {
    request: Option<String>,
}

pub fn router(stamper: Arc<Stamper>) -> Router {
    Router::new()
        .route("/", get(handle_get).post(handle_post))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(AppState { stamper })
}

pub async fn serve(stamper: Arc<Stamper>, listen: &str, port: u16) -> Result<()> {
    let addr = listen_addr(listen, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, router(stamper))
        .await
        .context("server terminated")
}

/// Bracket bare IPv6 addresses so they parse as a socket address.
fn listen_addr(listen: &str, port: u16) -> String {
    if listen.contains(':') && !listen.starts_with('[') {
        format!("[{}]:{}", listen, port)
    } else {
        format!("{}:{}", listen, port)
    }
}

async fn handle_get(State(state): State<AppState>, Query(params): Query<GetParams>) -> Response {
    match params.request.as_deref() {
        Some("get-public-key-v1") => {
            let key = state.stamper.public_key().to_string();
            if key.is_empty() {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "no public key available\n",
                )
                    .into_response();
            }
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/pgp-keys")],
                key,
            )
                .into_response()
        }
        _ => (StatusCode::NOT_ACCEPTABLE, "unsupported request\n").into_response(),
    }
}

async fn handle_post(State(state): State<AppState>, Form(form): Form<StampForm>) -> Response {
    let request = match parse_request(&form) {
        Ok(request) => request,
        Err(err) => return error_response(err),
    };
    match state.stamper.stamp(&request).await {
        Ok(artifact) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/x-git-object")],
            artifact,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

fn parse_request(form: &StampForm) -> crate::error::Result<TimestampRequest> {
    match form.request.as_deref() {
        Some("stamp-tag-v1") => match (&form.commit, &form.tagname) {
            (Some(commit), Some(tagname)) => Ok(TimestampRequest::Tag {
                commit: commit.clone(),
                tag_name: tagname.clone(),
            }),
            _ => Err(Error::Validation("missing commit or tagname".into())),
        },
        Some("stamp-branch-v1") => match (&form.commit, &form.tree) {
            (Some(commit), Some(tree)) => Ok(TimestampRequest::Branch {
                commit: commit.clone(),
                tree: tree.clone(),
                parent: form.parent.clone(),
            }),
            _ => Err(Error::Validation("missing commit or tree".into())),
        },
        _ => Err(Error::Validation("unsupported request type".into())),
    }
}

fn error_response(err: Error) -> Response {
    match err {
        Error::Validation(msg) => {
            tracing::debug!("rejecting request: {}", msg);
            (StatusCode::NOT_ACCEPTABLE, format!("{}\n", msg)).into_response()
        }
        Error::Overload => {
            tracing::warn!("signing overloaded, rejecting request");
            (
                StatusCode::TOO_MANY_REQUESTS,
                "server overloaded, try again later\n",
            )
                .into_response()
        }
        err => {
            tracing::error!("stamping failed: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error\n",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_addr() {
        assert_eq!(listen_addr("0.0.0.0", 8080), "0.0.0.0:8080");
        assert_eq!(listen_addr("::", 8080), "[::]:8080");
        assert_eq!(listen_addr("[::1]", 8080), "[::1]:8080");
        assert_eq!(listen_addr("localhost", 8080), "localhost:8080");
    }

    #[test]
    fn test_parse_request() {
        let form = StampForm {
            request: Some("stamp-tag-v1".into()),
            commit: Some("a".repeat(40)),
            tagname: Some("mytag".into()),
            tree: None,
            parent: None,
        };
        assert!(matches!(
            parse_request(&form),
            Ok(TimestampRequest::Tag { .. })
        ));

        let form = StampForm {
            request: Some("stamp-branch-v1".into()),
            commit: Some("a".repeat(40)),
            tagname: None,
            tree: None,
            parent: None,
        };
        assert!(parse_request(&form).is_err());

        let form = StampForm {
            request: Some("stamp-other-v9".into()),
            commit: None,
            tagname: None,
            tree: None,
            parent: None,
        };
        assert!(parse_request(&form).is_err());
    }
}
