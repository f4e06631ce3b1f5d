//! OpenAPI document covering the documented routes.

use utoipa::OpenApi;

use crate::api::handlers::{
    auth::{login, session, types},
    health,
};
use crate::api::store::Role;

#[derive(OpenApi)]
#[openapi(
    paths(health::health, login::login, session::session, session::logout),
    components(schemas(
        health::Health,
        types::LoginRequest,
        types::SessionResponse,
        Role
    )),
    tags(
        (name = "auth", description = "Login throttling and session validation"),
        (name = "health", description = "Service health")
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
