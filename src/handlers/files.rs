use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::{Path, Query};

#[derive(Debug, Deserialize)]
pub struct SignedLinkQuery {
    pub expires: i64,
    pub signature: String,
}

fn content_type(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "pdf" => "application/pdf",
        Some(ext) if ext == "html" || ext == "htm" => "text/html; charset=utf-8",
        Some(ext) if ext == "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Serve a blob through a link minted by the download gateway.
pub async fn serve_signed_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<SignedLinkQuery>,
) -> Result<impl IntoResponse> {
    let data = state
        .storage
        .read_signed(&key, query.expires, &query.signature)
        .await?;

    Ok(([(header::CONTENT_TYPE, content_type(&key))], data))
}
