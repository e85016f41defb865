//! Server-sent event endpoints for live telemetry. Each connected client
//! gets its own sampler; closing the connection drops it.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use futures::StreamExt;

use dockyard_telemetry::{container_stream, host_stream};

use crate::auth::CurrentUser;
use crate::error::ApiResult;
use crate::AppState;

fn to_event<T: serde::Serialize>(value: T) -> Result<Event, Infallible> {
    // Values are plain data structs; serialization cannot fail on them.
    Ok(Event::default()
        .json_data(&value)
        .unwrap_or_else(|_| Event::default().data("{}")))
}

/// One host sample per second for as long as the client listens.
pub async fn host_stats_stream(
    CurrentUser(_actor): CurrentUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(host_stream().map(to_event)).keep_alive(KeepAlive::default())
}

/// Per-container stats stream. Failed samples arrive as error-marker events;
/// the stream itself never ends from the server side.
pub async fn container_stats_stream(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // Authorization happens once, at subscription time.
    let view = state.orchestrator.container_view(&actor, id).await?;
    let stream = container_stream(state.engine.clone(), view.record.engine_id).map(to_event);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
