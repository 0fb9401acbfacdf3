use realtime::Session;
use shared::{
    domain::AccountId,
    error::{ApiError, ErrorCode},
    protocol::{FavoritesResponse, FAVORITES_LIMIT},
};
use tracing::debug;

use crate::{invalid, require_account, storage_failure, ApiContext};

pub async fn list_favorites(
    ctx: &ApiContext,
    session: &Session,
) -> Result<FavoritesResponse, ApiError> {
    let caller = require_account(session)?;
    current(ctx, caller.id).await
}

pub async fn add_favorite(
    ctx: &ApiContext,
    session: &Session,
    target_id: AccountId,
) -> Result<FavoritesResponse, ApiError> {
    let caller = require_account(session)?;
    if target_id == caller.id {
        return Err(invalid("cannot favorite yourself"));
    }
    ctx.storage
        .find_account(target_id)
        .await
        .map_err(storage_failure)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "no such account"))?;

    let added = ctx
        .storage
        .add_favorite(caller.id, target_id)
        .await
        .map_err(storage_failure)?;
    debug!(account_id = %caller.id, %target_id, added, "favorite added");
    current(ctx, caller.id).await
}

pub async fn remove_favorite(
    ctx: &ApiContext,
    session: &Session,
    target_id: AccountId,
) -> Result<FavoritesResponse, ApiError> {
    let caller = require_account(session)?;
    let removed = ctx
        .storage
        .remove_favorite(caller.id, target_id)
        .await
        .map_err(storage_failure)?;
    debug!(account_id = %caller.id, %target_id, removed, "favorite removed");
    current(ctx, caller.id).await
}

async fn current(ctx: &ApiContext, account_id: AccountId) -> Result<FavoritesResponse, ApiError> {
    let favorites = ctx
        .storage
        .list_favorites(account_id, FAVORITES_LIMIT)
        .await
        .map_err(storage_failure)?;
    Ok(FavoritesResponse { favorites })
}

#[cfg(test)]
#[path = "tests/favorites_tests.rs"]
mod tests;
