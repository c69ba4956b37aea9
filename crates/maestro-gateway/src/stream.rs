use crate::error::ApiError;
use crate::router::parse_id;
use crate::server::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use maestro_orchestrator::{Execution, Orchestrator, StatusEvent, StatusSubscription};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// `GET /api/executions/{id}/stream`
///
/// Sends the current snapshot, then one snapshot per change, and closes
/// after the terminal one. Unknown ids are rejected before the upgrade.
pub async fn stream_execution(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;
    // subscribe before reading so a change in between is not lost
    let updates = state.orchestrator.subscribe(Some(id));
    let current = state.orchestrator.status(id)?;
    let orchestrator = state.orchestrator.clone();
    Ok(ws.on_upgrade(move |socket| pump(socket, orchestrator, current, updates)))
}

/// Ordering key for snapshots of one execution. Later snapshots never
/// compare lower.
fn change_key(e: &Execution) -> (bool, usize, f64) {
    (
        e.is_terminal(),
        e.agent_outputs.len() + e.completed_tasks.len() + e.failed_tasks.len(),
        e.progress,
    )
}

async fn send_snapshot(
    sender: &mut SplitSink<WebSocket, Message>,
    snapshot: &Execution,
) -> Result<(), ()> {
    let json = match serde_json::to_string(snapshot) {
        Ok(json) => json,
        Err(e) => {
            warn!(execution_id = %snapshot.execution_id, error = %e, "Snapshot serialization failed");
            return Err(());
        }
    };
    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}

async fn pump(
    socket: WebSocket,
    orchestrator: Arc<Orchestrator>,
    current: Execution,
    mut updates: StatusSubscription,
) {
    let id = current.execution_id;
    let (mut sender, mut receiver) = socket.split();
    info!(execution_id = %id, "Stream opened");

    if send_snapshot(&mut sender, &current).await.is_err() {
        return;
    }

    let mut floor = change_key(&current);
    let mut finished = current.is_terminal();
    while !finished {
        tokio::select! {
            update = updates.next() => {
                let snapshot = match update {
                    Some(StatusEvent::Snapshot(snapshot)) => snapshot,
                    // the terminal snapshot may be among the dropped ones
                    Some(StatusEvent::Lagged(skipped)) => match orchestrator.status(id) {
                        Ok(latest) => {
                            debug!(execution_id = %id, skipped, "Stream lagged, resending from store");
                            Arc::new(latest)
                        }
                        Err(e) => {
                            warn!(execution_id = %id, error = %e, "Execution vanished during stream");
                            break;
                        }
                    },
                    None => break,
                };
                // older than what the client already has
                if change_key(&snapshot) < floor {
                    continue;
                }
                if send_snapshot(&mut sender, &snapshot).await.is_err() {
                    debug!(execution_id = %id, "Stream client went away");
                    return;
                }
                floor = change_key(&snapshot);
                finished = snapshot.is_terminal();
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    debug!(execution_id = %id, "Stream closed by client");
                    return;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    info!(execution_id = %id, "Stream finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_orchestrator::{Pattern, TaskRequest};
    use uuid::Uuid;

    #[test]
    fn test_change_key_orders_snapshots() {
        let request = TaskRequest::new(Pattern::Sequential, "t", "s");
        let early = Execution::queued(Uuid::new_v4(), &request);
        let mut later = early.clone();
        later.progress = 0.5;
        later.completed_tasks.push("planner".into());
        assert!(change_key(&early) < change_key(&later));

        let mut done = later.clone();
        done.status = maestro_orchestrator::ExecutionStatus::Completed;
        assert!(change_key(&later) < change_key(&done));
    }
}
