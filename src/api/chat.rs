//! Tutor chat: one turn per POST, or a WebSocket carrying one JSON message
//! per turn.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use utoipa::ToSchema;

use super::{AppState, auth::StudentContext};
use crate::{
    error::{ErrorBody, Result},
    tutor::{ChatKey, TutorBridge, backend::ChatBackend},
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChatReply {
    pub reply: String,
}

/// One server frame on the tutor WebSocket.
#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
enum ServerMessage {
    Reply { reply: String },
    Error { error: String },
}

#[utoipa::path(
    post,
    path = "/chat",
    tag = "tutor",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Tutor reply", body = ChatReply),
        (status = 502, description = "Tutor backend failed", body = ErrorBody),
        (status = 503, description = "No usable tutor credential", body = ErrorBody)
    )
)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Extension(student): Extension<StudentContext>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>> {
    let reply = state
        .tutor
        .reply(&student.chat_key(&state), &student.name, &req.message)
        .await?;
    Ok(Json(ChatReply { reply }))
}

#[utoipa::path(
    get,
    path = "/chat/ws",
    tag = "tutor",
    responses(
        (status = 101, description = "WebSocket: client sends {\"message\"}, server answers {\"reply\"} or {\"error\"}")
    )
)]
pub async fn chat_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(student): Extension<StudentContext>,
) -> impl IntoResponse {
    debug!(student_id = student.id, "tutor websocket requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state, student))
}

/// Answer one client frame: a `{"message"}` object in, a reply or an error out.
async fn answer<B: ChatBackend>(
    tutor: &TutorBridge<B>,
    key: &ChatKey,
    student_name: &str,
    text: &str,
) -> ServerMessage {
    let req = match serde_json::from_str::<ChatRequest>(text) {
        Ok(req) => req,
        Err(e) => {
            return ServerMessage::Error {
                error: format!("invalid message: {e}"),
            };
        }
    };
    match tutor.reply(key, student_name, &req.message).await {
        Ok(reply) => ServerMessage::Reply { reply },
        Err(e) => ServerMessage::Error { error: e.to_string() },
    }
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, student: StudentContext) {
    info!(student_id = student.id, "tutor websocket connected");
    let key = student.chat_key(&state);
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                let outgoing = answer(&state.tutor, &key, &student.name, text.as_str()).await;
                let out = match serde_json::to_string(&outgoing) {
                    Ok(out) => out,
                    Err(e) => {
                        error!("failed to encode tutor message: {}", e);
                        break;
                    }
                };
                if let Err(e) = socket.send(Message::Text(out.into())).await {
                    error!(student_id = student.id, "tutor websocket send error: {}", e);
                    break;
                }
            }
            // axum answers pings itself
            Message::Close(_) => break,
            _ => {}
        }
    }
    info!(student_id = student.id, "tutor websocket disconnected");
}
