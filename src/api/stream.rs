//! Live statistics over server-sent events.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use tokio::sync::watch;

use crate::aggregation::AggregatorState;
use crate::server::AppState;
use crate::session::SessionState;

use super::stats::StatsResponse;

/// GET /api/v1/stats/stream
///
/// One `stats` event with the current state, then one per change. Each event
/// carries the full state; intermediate values may be skipped by slow clients.
/// The stream ends once the session is stopped.
pub async fn stats_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.aggregator.subscribe();
    tracing::debug!("Statistics stream opened");

    Sse::new(create_stats_stream(receiver, state.session_state.clone())).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(state.settings.dashboard.stream_keepalive))
            .text("keepalive"),
    )
}

fn stats_event(state: AggregatorState) -> Event {
    match serde_json::to_string(&StatsResponse::from(state)) {
        Ok(json) => Event::default().event("stats").data(json),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize statistics");
            Event::default()
                .event("error")
                .data(r#"{"code":"SERIALIZATION_ERROR"}"#)
        }
    }
}

/// Resolves when the session reaches `Stopped` or goes away
async fn session_stopped(mut session: watch::Receiver<SessionState>) {
    loop {
        if *session.borrow_and_update() == SessionState::Stopped {
            return;
        }
        if session.changed().await.is_err() {
            return;
        }
    }
}

fn create_stats_stream(
    mut receiver: watch::Receiver<AggregatorState>,
    session: watch::Receiver<SessionState>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let current = *receiver.borrow_and_update();
        yield Ok(stats_event(current));

        let stopped = session_stopped(session);
        tokio::pin!(stopped);

        loop {
            let changed = tokio::select! {
                changed = receiver.changed() => changed.is_ok(),
                _ = &mut stopped => false,
            };
            if !changed {
                break;
            }
            let next = *receiver.borrow_and_update();
            yield Ok(stats_event(next));
        }

        tracing::debug!("Statistics stream closed");
    }
}
