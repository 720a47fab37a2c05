//! Server-sent progress event stream.

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, warn};

/// GET /progress/stream - one `data: <json>` frame per progress event.
///
/// The subscription is dropped (and unregistered) when the client
/// disconnects. Events dropped for a slow client are not replayed; the
/// `/tracks` snapshot is the recovery path.
pub async fn progress_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("sse client connected to progress stream");
    let mut subscription = state.bus.subscribe().await;

    let stream = async_stream::stream! {
        while let Some(event) = subscription.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => yield Ok(Event::default().data(json)),
                Err(e) => warn!(error = %e, "failed to serialize progress event"),
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
