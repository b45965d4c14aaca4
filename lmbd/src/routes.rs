//! HTTP route handlers for the build service

use crate::engine::ContainerStatus;
use crate::ports::parse_port_specs;
use crate::{pipeline, AppResult, AppState, RequestError};
use axum::{
    extract::{Multipart, Query, State},
    response::Json,
};
use futures_util::TryStreamExt;
use serde::Deserialize;
use std::io;
use tracing::{debug, info};

#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    pub tag: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// POST /upload - Build an image from a ZIP build context
///
/// Expects multipart field `file` holding the archive. An image tag may be
/// given as the `tag` query parameter or as a `tag` field sent before `file`.
/// Responds with the image identifier as plain text.
pub async fn upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> AppResult<String> {
    debug!("Handling POST /upload");
    let mut tag = non_empty(params.tag);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| RequestError::InvalidRequest(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("tag") => {
                let value = field.text().await.map_err(|e| {
                    RequestError::InvalidRequest(format!("unreadable tag field: {}", e))
                })?;
                tag = non_empty(Some(value)).or(tag);
            }
            Some("file") => {
                let body = field.map_err(|e| io::Error::new(io::ErrorKind::Other, e));
                let image = pipeline::upload_and_build(&state, body, tag).await?;
                info!("upload produced image {}", image);
                return Ok(image.to_string());
            }
            other => debug!("ignoring multipart field {:?}", other),
        }
    }

    Err(RequestError::InvalidRequest("missing multipart field 'file'".to_string()).into())
}

/// POST /run - Create and start a container
///
/// Query parameters: `tag` (image reference) and one or more `ports`
/// values in `[hostIp:]hostPort:containerPort[/protocol]` form, each
/// optionally comma-separated. Returns the inspected container status.
pub async fn run(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<ContainerStatus>> {
    debug!("Handling POST /run");

    let image = non_empty(
        params
            .iter()
            .find(|(key, _)| key == "tag")
            .map(|(_, value)| value.clone()),
    )
    .ok_or_else(|| RequestError::InvalidRequest("missing 'tag' parameter".to_string()))?;

    let bindings = parse_port_specs(
        params
            .iter()
            .filter(|(key, _)| key == "ports")
            .map(|(_, value)| value.as_str()),
    )
    .map_err(RequestError::from)?;

    let container = state
        .engine
        .create_and_start_container(&image, &bindings)
        .await
        .map_err(RequestError::from)?;
    let status = state
        .engine
        .inspect(&container)
        .await
        .map_err(RequestError::from)?;

    info!(container = %container, status = %status.status, "container started from {}", image);
    Ok(Json(status))
}
