use crate::app_state::SharedState;
use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tower::ServiceExt; // for oneshot
use tower_http::services::ServeFile;

/// Serves a track file out of the media directory, with range support so
/// listeners can download what the admin hosts.
pub async fn serve_media(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    req: Request,
) -> Response {
    let Some(dir) = state.media_dir.as_ref() else {
        return (StatusCode::NOT_FOUND, "No media hosted").into_response();
    };
    if !is_plain_file_name(&name) {
        return (StatusCode::BAD_REQUEST, "Invalid file name").into_response();
    }

    match ServeFile::new(dir.join(&name)).oneshot(req).await {
        Ok(res) => res.into_response(),
        Err(err) => {
            tracing::error!(file = %name, error = %err, "failed to serve file");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to serve file").into_response()
        }
    }
}

/// A single path component that cannot leave the media directory.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}
