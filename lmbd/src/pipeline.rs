//! Upload-and-build: workspace, extraction, descriptor check, image build.

use crate::engine::ImageReference;
use crate::{AppState, RequestError};
use build_context::{descriptor, extract};
use bytes::Bytes;
use futures_util::{pin_mut, Stream, StreamExt};
use std::io;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, info, instrument};

/// Chunks buffered between the HTTP body and the extractor.
const UPLOAD_CHANNEL_DEPTH: usize = 8;

/// Extract `body` into a fresh workspace and build an image from it.
///
/// The workspace is removed before this returns, whichever step fails. A
/// blocking worker pulls the body through a bounded channel and spools it
/// beside the workspace before extracting, so an upload is never held in
/// memory as a whole.
#[instrument(skip(state, body))]
pub async fn upload_and_build<S>(
    state: &AppState,
    body: S,
    tag: Option<String>,
) -> Result<ImageReference, RequestError>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let workspace = state.workspaces.acquire()?;
    info!(workspace = %workspace.token(), "processing upload in {}", workspace.root().display());

    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(UPLOAD_CHANNEL_DEPTH);
    let reader = SyncIoBridge::new(StreamReader::new(ReceiverStream::new(rx)));
    let limits = state.limits;
    let extraction = tokio::task::spawn_blocking(move || {
        let outcome = extract::extract_upload(reader, &workspace, &limits);
        (workspace, outcome)
    });

    pin_mut!(body);
    while let Some(chunk) = body.next().await {
        let failed = chunk.is_err();
        if tx.send(chunk).await.is_err() {
            // Spooling gave up; the rest of the body is not needed.
            break;
        }
        if failed {
            break;
        }
    }
    drop(tx);

    let (workspace, outcome) = extraction
        .await
        .map_err(|err| RequestError::Internal(format!("extraction worker failed: {}", err)))?;
    let summary = outcome?;
    debug!(?summary, "upload extracted");

    let dockerfile = descriptor::locate(&workspace)?;
    let tags: Vec<String> = tag.into_iter().collect();
    let image = state
        .engine
        .build_image(workspace.root(), &dockerfile, &tags)
        .await;

    // Teardown failures are logged by the workspace and never replace the build result.
    let _ = workspace.release();

    Ok(image?)
}
