use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use muse_db::models::{ConversationRow, NewMessage, UserRow};
use muse_types::api::{ConversationDetail, MarkReadRequest, SendMessageRequest, SentMessage};
use muse_types::events::GatewayEvent;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::mail;
use crate::middleware::CurrentUser;
use crate::views;

pub const MAX_MESSAGE_LEN: usize = 4000;
pub const MAX_ATTACHMENTS: usize = 10;

/// An active conversation the caller takes part in, with the other party.
async fn load_conversation(
    state: &AppState,
    current: &CurrentUser,
    conversation_id: Uuid,
) -> Result<(ConversationRow, UserRow), ApiError> {
    let id = conversation_id.to_string();
    let me = current.id.to_string();
    state
        .with_db(move |db| {
            let Some(conversation) = db.get_conversation(&id)? else {
                return Ok(None);
            };
            if !conversation.is_active || !conversation.has_participant(&me) {
                return Ok(None);
            }
            let other = db.get_user_by_id(conversation.other_participant(&me))?;
            Ok(other.map(|other| (conversation, other)))
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("Conversation not found".into()))
}

/// Mark everything `sender` sent the caller as read and tell the sender.
async fn mark_read_from(state: &AppState, current: &CurrentUser, sender: Uuid) -> Result<usize, ApiError> {
    let (me, them) = (current.id.to_string(), sender.to_string());
    let count = state.with_db(move |db| db.mark_read(&me, &them)).await?;
    if count > 0 {
        state
            .dispatcher
            .send_to_user(sender, GatewayEvent::MessagesRead { reader_id: current.id, count })
            .await;
    }
    Ok(count)
}

/// GET /chat/conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let me = current.id.to_string();
    let entries = state
        .with_db(move |db| {
            let mut entries = Vec::new();
            for conversation in db.list_conversations(&me)? {
                let Some(other) = db.get_user_by_id(conversation.other_participant(&me))? else {
                    continue;
                };
                let last = match conversation.last_message_id.as_deref() {
                    Some(id) => db.get_message(id)?,
                    None => None,
                };
                entries.push((conversation, other, last));
            }
            Ok(entries)
        })
        .await?;

    let conversations = entries
        .iter()
        .map(|(conversation, other, last)| views::conversation(conversation, other, last.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(json!({ "success": true, "conversations": conversations })))
}

/// GET /chat/conversations/{id}
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let (conversation, other) = load_conversation(&state, &current, conversation_id).await?;
    mark_read_from(&state, &current, views::parse_id(&other.id)?).await?;

    let cid = conversation.id.clone();
    let rows = state.with_db(move |db| db.list_messages(&cid)).await?;
    let messages = rows.iter().map(views::message).collect::<Result<Vec<_>, _>>()?;
    let last = rows.last();

    Ok(Json(json!({
        "success": true,
        "conversation": ConversationDetail {
            conversation: views::conversation(&conversation, &other, last)?,
            messages,
        },
    })))
}

/// POST /chat/conversations/{other_user_id}
pub async fn start_conversation(
    State(state): State<AppState>,
    Path(other_id): Path<Uuid>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    if other_id == current.id {
        return Err(ApiError::Validation("You cannot start a conversation with yourself".into()));
    }

    let (me, them) = (current.id.to_string(), other_id.to_string());
    let (conversation, other, last) = state
        .with_db(move |db| {
            let Some(other) = db.get_user_by_id(&them)? else {
                return Ok(None);
            };
            let conversation = db.upsert_conversation(&me, &them, &muse_db::to_db_time(Utc::now()))?;
            let last = match conversation.last_message_id.as_deref() {
                Some(id) => db.get_message(id)?,
                None => None,
            };
            Ok(Some((conversation, other, last)))
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(Json(json!({
        "success": true,
        "conversation": views::conversation(&conversation, &other, last.as_ref())?,
    })))
}

/// DELETE /chat/conversations/{id}
pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let (conversation, _) = load_conversation(&state, &current, conversation_id).await?;
    state
        .with_db(move |db| db.deactivate_conversation(&conversation.id))
        .await?;
    Ok(Json(json!({ "success": true, "message": "Conversation deleted" })))
}

/// POST /chat/messages
pub async fn send_message(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    let attachments: Vec<String> = req
        .attachments
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();

    if content.is_empty() && attachments.is_empty() {
        return Err(ApiError::Validation("Message must have content or an attachment".into()));
    }
    if content.chars().count() > MAX_MESSAGE_LEN {
        return Err(ApiError::Validation(format!(
            "Message cannot exceed {} characters",
            MAX_MESSAGE_LEN
        )));
    }
    if attachments.len() > MAX_ATTACHMENTS {
        return Err(ApiError::Validation(format!(
            "A message can carry at most {} attachments",
            MAX_ATTACHMENTS
        )));
    }
    if req.recipient_id == current.id {
        return Err(ApiError::Validation("You cannot message yourself".into()));
    }

    let attachments = serde_json::to_string(&attachments).map_err(|e| ApiError::Internal(e.into()))?;
    let id = Uuid::new_v4().to_string();
    let (me, them) = (current.id.to_string(), req.recipient_id.to_string());
    let (conversation, stored, recipient) = state
        .with_db(move |db| {
            let Some(recipient) = db.get_user_by_id(&them)? else {
                return Ok(None);
            };
            let (conversation, stored) = db.send_message(
                &NewMessage {
                    id: &id,
                    sender_id: &me,
                    recipient_id: &them,
                    content: &content,
                    attachments: &attachments,
                },
                &muse_db::to_db_time(Utc::now()),
            )?;
            Ok(Some((conversation, stored, recipient)))
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("Recipient not found".into()))?;

    let message = views::message(&stored)?;
    let conversation_id = views::parse_id(&conversation.id)?;

    let delivered = state
        .dispatcher
        .send_to_user(
            req.recipient_id,
            GatewayEvent::MessageCreate {
                conversation_id,
                message: message.clone(),
            },
        )
        .await;
    if delivered {
        debug!("Message {} pushed to {}", message.id, req.recipient_id);
    } else {
        state
            .notify(mail::templates::new_message(
                &recipient.email,
                &current.name,
                &stored.content,
                &state.config.frontend_url,
            ))
            .await;
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": SentMessage { message, conversation_id },
        })),
    ))
}

/// POST /chat/messages/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let count = mark_read_from(&state, &current, req.sender_id).await?;
    Ok(Json(json!({ "success": true, "count": count })))
}

/// GET /chat/messages/unread
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let me = current.id.to_string();
    let count = state.with_db(move |db| db.unread_count(&me)).await?;
    Ok(Json(json!({ "success": true, "count": count })))
}
