use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use murmur_common::{normalize_name, PrincipalInfo, PublicKeyResponse};
use serde::Serialize;

use crate::directory::Directory;

#[derive(Serialize)]
struct Health {
    status: &'static str,
    principals: usize,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn health(State(directory): State<Directory>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        principals: directory.len().await,
    })
}

pub async fn public_key(State(directory): State<Directory>, Path(name): Path<String>) -> Response {
    let name = normalize_name(&name);
    match directory.lookup(&name).await {
        Some(public_key) => Json(PublicKeyResponse { name, public_key }).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("{} is not registered", name),
            }),
        )
            .into_response(),
    }
}

pub async fn principals(State(directory): State<Directory>) -> Json<Vec<PrincipalInfo>> {
    Json(directory.principals().await)
}
