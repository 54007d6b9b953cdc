pub mod approvals;
pub mod attendance;
pub mod changes;
pub mod config;
pub mod err;
pub mod hashing;
pub mod integrity;
pub mod io;
pub mod ledger;
pub mod models;
pub mod store;
#[cfg(test)]
mod test_helper;

use axum::handler::Handler;
use axum::{routing::get, routing::post, response::IntoResponse, Extension, Router};

use axum::http::Uri;
use serde::Serialize;
use crate::config::Config;
use crate::err::{Error, Fine, Maybe, Nothing};
use crate::ledger::Ledger;

pub type Payload<T> = Result<Maybe<T>, Error>;

pub fn proceeds<V>(value: V) -> Payload<V> where V: Serialize {
    Ok(Fine(value))
}

pub fn breaks<V>(err: Error) -> Payload<V> where V: Serialize {
    Ok(Nothing(err))
}

pub fn app(ledger: Ledger, config: Config) -> Router {
    Router::new()
        .route("/attendance", post(attendance::submit_attendance))
        .route(
            "/attendance/:id",
            get(attendance::read_attendance).delete(attendance::delete_attendance),
        )
        .route("/attendance/:id/status", post(attendance::edit_status))
        .route("/admin/verify_integrity", get(attendance::verify_integrity))
        .route("/admin/migrate_hashes", post(attendance::migrate_hashes))
        .route("/changes", get(changes::list_pending).post(changes::request_change))
        .route("/changes/:id/approve", post(changes::approve_change))
        .route("/changes/:id/reject", post(changes::reject_change))
        .route("/batch/changes", post(changes::request_changes))
        .route("/batch/approve", post(changes::approve_batch))
        .route("/batch/reject", post(changes::reject_batch))
        .fallback(err::handler404.into_service())
        .layer(Extension(ledger))
        .layer(Extension(config))
}
