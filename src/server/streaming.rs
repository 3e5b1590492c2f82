//! SSE (Server-Sent Events) streaming for download progress.
//!
//! A download call answers with an event stream: zero or more
//! `downloadProgress` events carrying `{"percentComplete": n}`, followed by
//! exactly one `resolve` (`{}`) or `reject` (`{"code", "message"}`) event.

use std::convert::Infallible;

use axum::response::sse::Event;
use futures::stream::{self, Stream};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use crate::bridge::DownloadJob;
use crate::download::DownloadProgress;

pub const PROGRESS_EVENT: &str = "downloadProgress";
pub const RESOLVE_EVENT: &str = "resolve";
pub const REJECT_EVENT: &str = "reject";

fn progress_event(progress: DownloadProgress) -> Event {
    let data = serde_json::to_string(&progress).unwrap_or_default();
    Event::default().event(PROGRESS_EVENT).data(data)
}

/// Convert a download job into an SSE stream.
pub fn download_to_sse_stream(
    job: DownloadJob,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let DownloadJob { progress, done } = job;

    // The progress channel closes when the worker finishes the task, so the
    // outcome event always comes after the last progress event.
    let outcome = stream::once(async move {
        let event = match done.await {
            Ok(()) => Event::default().event(RESOLVE_EVENT).data("{}"),
            Err(e) => {
                let data = serde_json::to_string(&e.to_rejection()).unwrap_or_default();
                Event::default().event(REJECT_EVENT).data(data)
            }
        };
        Ok::<_, Infallible>(event)
    });

    UnboundedReceiverStream::new(progress)
        .map(|p| Ok::<_, Infallible>(progress_event(p)))
        .chain(outcome)
}
