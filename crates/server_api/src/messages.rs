use realtime::{DeliveryReport, Session};
use shared::{
    domain::{AccountId, ChatMessage},
    error::{ApiError, ErrorCode},
    protocol::{SendMessageRequest, HISTORY_LIMIT},
};
use tracing::info;

use crate::{invalid, require_account, storage_failure, ApiContext};

/// Up to [`HISTORY_LIMIT`] most recent messages between the caller and
/// `peer`, oldest first.
pub async fn history(
    ctx: &ApiContext,
    session: &Session,
    peer: AccountId,
) -> Result<Vec<ChatMessage>, ApiError> {
    let caller = require_account(session)?;
    ctx.storage
        .list_conversation(caller.id, peer, HISTORY_LIMIT)
        .await
        .map_err(storage_failure)
}

/// Persists the message, then fans it out. Nothing is routed unless the
/// write succeeded; push failures never fail the request.
pub async fn send_message(
    ctx: &ApiContext,
    session: &Session,
    request: SendMessageRequest,
) -> Result<DeliveryReport, ApiError> {
    let sender = require_account(session)?;
    if request.content.is_empty() {
        return Err(invalid("content is required"));
    }
    ctx.storage
        .find_account(request.recipient_id)
        .await
        .map_err(storage_failure)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "no such recipient"))?;

    let message = ctx
        .storage
        .insert_message(sender.id, request.recipient_id, &request.content)
        .await
        .map_err(storage_failure)?;

    let report = ctx
        .realtime
        .router
        .route_new_message(&message, &sender.username)
        .await;
    info!(
        message_id = %message.id,
        from = %message.from,
        to = %message.to,
        delivered = report.delivered,
        failed = report.failed,
        "message sent"
    );
    Ok(report)
}

#[cfg(test)]
#[path = "tests/messages_tests.rs"]
mod tests;
