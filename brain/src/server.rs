//! Operator WebSocket interface.
//!
//! Serves `/ws`: on connect the client gets a greeting and the full state
//! snapshot, then minimal patch diffs as fields change. Inbound commands
//! are a tagged JSON enum; `stop` performs an emergency zero-motor write on
//! every node before shutting the process down.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use arena_types::{Rect, Vec2};

use crate::context::Context;
use crate::driver::{NodeId, VariableMap, VAR_MOTOR_LEFT_TARGET, VAR_MOTOR_RIGHT_TARGET};
use crate::filtering::PoseEvent;

// ── Wire messages ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum ClientMessage {
    Ping(u64),
    SetPosition(Vec2),
    SetEnd(Vec2),
    AddObstacle(Rect),
    ClearObstacles,
    Optimise(bool),
    Debug,
    Stop,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum ServerMessage {
    State(Value),
    Patch(Value),
    Pong(u64),
    Msg(String),
}

// ── Server ────────────────────────────────────────────────────────────────────

pub async fn serve(ctx: Arc<Context>, addr: String) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(ctx)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🕹  Operator interface on ws://{addr}/ws");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(ctx): State<Arc<Context>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

async fn handle_socket(mut socket: WebSocket, ctx: Arc<Context>) {
    info!("operator connected");
    let listener = ctx.store.register_listener();

    if send(&mut socket, &ServerMessage::Msg("Hi!".into())).await.is_err() {
        return;
    }
    if send(&mut socket, &ServerMessage::State(ctx.store.to_json())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            patch = listener.wait_for_patch() => {
                let message = ServerMessage::Patch(Value::Object(patch));
                if send(&mut socket, &message).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_message(&ctx, &text) {
                            if send(&mut socket, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        warn!("websocket error: {error}");
                        break;
                    }
                }
            }
        }
    }

    // The listener deregisters itself on drop.
    info!("operator disconnected");
}

async fn send(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).expect("server message serialises");
    socket.send(Message::Text(text)).await
}

// ── Command handling ──────────────────────────────────────────────────────────

fn handle_message(ctx: &Arc<Context>, text: &str) -> Option<ServerMessage> {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(error) => {
            warn!("malformed operator message: {error}");
            return None;
        }
    };

    match message {
        ClientMessage::Ping(id) => return Some(ServerMessage::Pong(id)),

        ClientMessage::SetPosition(position) => {
            // Seed a pose observation; heading is kept from the estimate.
            let theta = ctx.store.with(|state| state.orientation).unwrap_or(0.0);
            ctx.pose_events.send(PoseEvent::Observation {
                x: position.x,
                y: position.y,
                theta,
            });
        }

        ClientMessage::SetEnd(end) => {
            ctx.store.with(|state| state.set_end(Some(end)));
            ctx.store.changed();
            ctx.scene_update.trigger();
        }

        ClientMessage::AddObstacle(rect) => {
            ctx.store.with(|state| state.push_extra_obstacle(rect));
            ctx.store.changed();
            ctx.scene_update.trigger();
        }

        ClientMessage::ClearObstacles => {
            ctx.store.with(|state| state.clear_extra_obstacles());
            ctx.store.changed();
            ctx.scene_update.trigger();
        }

        ClientMessage::Optimise(enabled) => {
            ctx.store.with(|state| state.set_optimise(enabled));
            ctx.store.changed();
            ctx.scene_update.trigger();
        }

        ClientMessage::Debug => {
            debug!("state dump: {}", ctx.store.to_json());
        }

        ClientMessage::Stop => {
            info!("operator stop: writing zero motor targets and exiting");
            emergency_stop(ctx);
            ctx.request_shutdown();
        }
    }

    None
}

/// Zero the motor targets on every connected node.
pub fn emergency_stop(ctx: &Arc<Context>) {
    let mut zeros = VariableMap::new();
    zeros.insert(VAR_MOTOR_LEFT_TARGET.to_string(), vec![0]);
    zeros.insert(VAR_MOTOR_RIGHT_TARGET.to_string(), vec![0]);

    if let Err(error) = ctx.transport.set_variables(NodeId::Drive, zeros.clone()) {
        warn!("emergency stop write failed on drive node: {error}");
    }
    if ctx.transport.has_aux() {
        if let Err(error) = ctx.transport.set_variables(NodeId::Aux, zeros) {
            warn!("emergency stop write failed on aux node: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::LoopbackTransport;
    use crate::pool::Pool;

    fn test_ctx() -> (Arc<Context>, tokio::sync::mpsc::UnboundedReceiver<()>) {
        let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx =
            Arc::new(Context::new(Arc::new(LoopbackTransport::new()), Pool::new(1), shutdown_tx));
        (ctx, shutdown_rx)
    }

    #[tokio::test]
    async fn ping_answers_pong_with_the_same_id() {
        let (ctx, _rx) = test_ctx();
        let reply = handle_message(&ctx, r#"{"type":"ping","data":7}"#).unwrap();
        assert!(matches!(reply, ServerMessage::Pong(7)));
    }

    #[tokio::test]
    async fn set_end_stores_the_goal_and_requests_a_replan() {
        let (ctx, _rx) = test_ctx();
        let scene = ctx.scene_update.clone();
        let replanned = tokio::spawn(async move { scene.wait().await });
        tokio::task::yield_now().await;

        let reply = handle_message(&ctx, r#"{"type":"set_end","data":{"x":90.0,"y":40.0}}"#);
        assert!(reply.is_none());
        assert_eq!(ctx.store.with(|s| s.end), Some(Vec2::new(90.0, 40.0)));
        replanned.await.unwrap();
    }

    #[tokio::test]
    async fn add_obstacle_normalises_the_rectangle() {
        let (ctx, _rx) = test_ctx();
        let text = r#"{"type":"add_obstacle","data":{"a":{"x":30.0,"y":10.0},"b":{"x":20.0,"y":40.0}}}"#;
        handle_message(&ctx, text);

        let rect = ctx.store.with(|s| s.extra_obstacles[0]);
        assert_eq!(rect.a, Vec2::new(20.0, 10.0));
        assert_eq!(rect.b, Vec2::new(30.0, 40.0));

        handle_message(&ctx, r#"{"type":"clear_obstacles"}"#);
        assert!(ctx.store.with(|s| s.extra_obstacles.is_empty()));
    }

    #[tokio::test]
    async fn set_position_seeds_a_pose_observation() {
        let (ctx, _rx) = test_ctx();
        handle_message(&ctx, r#"{"type":"set_position","data":{"x":12.0,"y":34.0}}"#);
        match ctx.pose_events.recv().await {
            PoseEvent::Observation { x, y, .. } => {
                assert_eq!((x, y), (12.0, 34.0));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_zeroes_motors_and_requests_shutdown() {
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel();
        let transport = Arc::new(LoopbackTransport::new());
        let ctx = Arc::new(Context::new(transport.clone(), Pool::new(1), shutdown_tx));

        handle_message(&ctx, r#"{"type":"stop"}"#);

        let vars = transport.node_variables(NodeId::Drive);
        assert_eq!(vars[VAR_MOTOR_LEFT_TARGET], vec![0]);
        assert_eq!(vars[VAR_MOTOR_RIGHT_TARGET], vec![0]);
        assert!(shutdown_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn optimise_flag_round_trips() {
        let (ctx, _rx) = test_ctx();
        handle_message(&ctx, r#"{"type":"optimise","data":true}"#);
        assert!(ctx.store.with(|s| s.optimise));
        handle_message(&ctx, r#"{"type":"optimise","data":false}"#);
        assert!(!ctx.store.with(|s| s.optimise));
    }

    #[test]
    fn outbound_messages_carry_the_tagged_shape() {
        let text = serde_json::to_string(&ServerMessage::Pong(3)).unwrap();
        assert_eq!(text, r#"{"type":"pong","data":3}"#);

        let text = serde_json::to_string(&ServerMessage::Msg("Hi!".into())).unwrap();
        assert_eq!(text, r#"{"type":"msg","data":"Hi!"}"#);
    }
}
