use crate::api::GIT_COMMIT_HASH;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use tracing::{debug, error, info_span, Instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Database is healthy", body = [Health]),
        (status = 503, description = "Database is unhealthy", body = [Health])
    ),
    tag = "health"
)]
pub async fn health(method: Method, pool: Extension<PgPool>) -> impl IntoResponse {
    let database_ok = ping_database(&pool).await;

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if database_ok { "ok" } else { "error" }.to_string(),
    };

    // OPTIONS preflights get headers only.
    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, app_headers(&health), body)
}

/// Acquire a connection and ping it, with spans for both steps.
async fn ping_database(pool: &PgPool) -> bool {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    let mut conn = match pool.acquire().instrument(acquire_span).await {
        Ok(conn) => conn,
        Err(err) => {
            error!("Failed to acquire database connection: {err}");
            return false;
        }
    };

    let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
    match conn.ping().instrument(ping_span).await {
        Ok(()) => true,
        Err(err) => {
            error!("Failed to ping database: {err}");
            false
        }
    }
}

/// `X-App: name:version:shorthash` identification header.
fn app_headers(health: &Health) -> HeaderMap {
    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let mut headers = HeaderMap::new();
    match format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>() {
        Ok(value) => {
            debug!("X-App header: {value:?}");
            headers.insert("X-App", value);
        }
        Err(err) => error!("Failed to build X-App header: {err}"),
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x_app_header_carries_short_commit() {
        let health = Health {
            commit: "0123456789abcdef".to_string(),
            name: "seanco".to_string(),
            version: "0.1.0".to_string(),
            database: "ok".to_string(),
        };
        let headers = app_headers(&health);
        assert_eq!(
            headers.get("X-App").and_then(|v| v.to_str().ok()),
            Some("seanco:0.1.0:0123456")
        );
    }

    #[test]
    fn short_commit_is_empty_for_unknown_hash() {
        let health = Health {
            commit: "unknown".to_string(),
            name: "seanco".to_string(),
            version: "0.1.0".to_string(),
            database: "error".to_string(),
        };
        let headers = app_headers(&health);
        assert_eq!(
            headers.get("X-App").and_then(|v| v.to_str().ok()),
            Some("seanco:0.1.0:")
        );
    }
}
