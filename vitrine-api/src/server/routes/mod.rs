use crate::server::ServerRouter;
use axum::Router;
use serde::Serialize;

mod posts;
mod users;

/// The single success message callers show per operation.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub(crate) struct MessageResponse {
    pub message: &'static str,
}

pub fn routes() -> ServerRouter {
    Router::new().merge(posts::routes()).merge(users::routes())
}
