use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use uuid::Uuid;

use shared::domain::{AccountId, AccountProfile, AccountSummary, ChatMessage, MessageId};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// Account row including the stored credential hash.
#[derive(Debug, Clone)]
pub struct StoredAccount {
    pub profile: AccountProfile,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub enum CreateAccountOutcome {
    Created(AccountProfile),
    /// The email or username is already taken.
    Conflict,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every pooled connection to `sqlite::memory:` would open its own empty database.
        let pool_options = if database_url.starts_with("sqlite::memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(connect_options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_account(
        &self,
        email: &str,
        username: &str,
        password_hash: &str,
    ) -> Result<CreateAccountOutcome> {
        let inserted = sqlx::query(
            "INSERT INTO accounts (email, username, password_hash) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(email)
        .bind(username)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => Ok(CreateAccountOutcome::Created(AccountProfile {
                id: AccountId(row.get::<i64, _>(0)),
                email: email.to_string(),
                username: username.to_string(),
            })),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Ok(CreateAccountOutcome::Conflict)
            }
            Err(err) => Err(err).context("failed to insert account"),
        }
    }

    pub async fn find_account_by_username(&self, username: &str) -> Result<Option<StoredAccount>> {
        let row = sqlx::query(
            "SELECT id, email, username, password_hash FROM accounts WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredAccount {
            profile: profile_from_row(&r),
            password_hash: r.get::<String, _>(3),
        }))
    }

    pub async fn find_account(&self, account_id: AccountId) -> Result<Option<AccountProfile>> {
        let row = sqlx::query("SELECT id, email, username FROM accounts WHERE id = ?")
            .bind(account_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(profile_from_row))
    }

    /// Case-insensitive substring match on usernames.
    pub async fn search_accounts(
        &self,
        query: &str,
        limit: u32,
        exclude: Option<AccountId>,
    ) -> Result<Vec<AccountSummary>> {
        let pattern = format!("%{}%", escape_like(query));
        let rows = sqlx::query(
            "SELECT id, username
             FROM accounts
             WHERE username LIKE ? ESCAPE '\\' AND (? IS NULL OR id != ?)
             ORDER BY lower(username) ASC
             LIMIT ?",
        )
        .bind(pattern)
        .bind(exclude.map(|id| id.0))
        .bind(exclude.map(|id| id.0))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(summary_from_row).collect())
    }

    /// Returns whether the favorite was newly added.
    pub async fn add_favorite(&self, account_id: AccountId, target_id: AccountId) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO favorites (account_id, favorite_id) VALUES (?, ?)
             ON CONFLICT(account_id, favorite_id) DO NOTHING",
        )
        .bind(account_id.0)
        .bind(target_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_favorite(
        &self,
        account_id: AccountId,
        target_id: AccountId,
    ) -> Result<bool> {
        let result = sqlx::query("DELETE FROM favorites WHERE account_id = ? AND favorite_id = ?")
            .bind(account_id.0)
            .bind(target_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_favorites(
        &self,
        account_id: AccountId,
        limit: u32,
    ) -> Result<Vec<AccountSummary>> {
        let rows = sqlx::query(
            "SELECT a.id, a.username
             FROM favorites f
             INNER JOIN accounts a ON a.id = f.favorite_id
             WHERE f.account_id = ?
             ORDER BY lower(a.username) ASC
             LIMIT ?",
        )
        .bind(account_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(summary_from_row).collect())
    }

    /// Persists a new message; the returned id embeds its creation time.
    pub async fn insert_message(
        &self,
        sender_id: AccountId,
        recipient_id: AccountId,
        content: &str,
    ) -> Result<ChatMessage> {
        let message = ChatMessage {
            id: MessageId::generate(),
            from: sender_id,
            to: recipient_id,
            content: content.to_string(),
        };
        let created_at: DateTime<Utc> = message.created_at().unwrap_or_else(Utc::now);
        sqlx::query(
            "INSERT INTO messages (id, sender_id, recipient_id, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(message.id.to_string())
        .bind(sender_id.0)
        .bind(recipient_id.0)
        .bind(content)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("failed to insert message")?;
        Ok(message)
    }

    /// Most recent `limit` messages exchanged between `a` and `b`, oldest first.
    pub async fn list_conversation(
        &self,
        a: AccountId,
        b: AccountId,
        limit: u32,
    ) -> Result<Vec<ChatMessage>> {
        let mut rows = sqlx::query(
            "SELECT id, sender_id, recipient_id, content
             FROM messages
             WHERE (sender_id = ? AND recipient_id = ?) OR (sender_id = ? AND recipient_id = ?)
             ORDER BY id DESC
             LIMIT ?",
        )
        .bind(a.0)
        .bind(b.0)
        .bind(b.0)
        .bind(a.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.reverse();
        rows.iter().map(message_from_row).collect()
    }
}

fn profile_from_row(row: &SqliteRow) -> AccountProfile {
    AccountProfile {
        id: AccountId(row.get::<i64, _>(0)),
        email: row.get::<String, _>(1),
        username: row.get::<String, _>(2),
    }
}

fn summary_from_row(row: &SqliteRow) -> AccountSummary {
    AccountSummary {
        id: AccountId(row.get::<i64, _>(0)),
        username: row.get::<String, _>(1),
    }
}

fn message_from_row(row: &SqliteRow) -> Result<ChatMessage> {
    let raw_id = row.get::<String, _>(0);
    let id = Uuid::parse_str(&raw_id)
        .with_context(|| format!("stored message id '{raw_id}' is not a uuid"))?;
    Ok(ChatMessage {
        id: MessageId(id),
        from: AccountId(row.get::<i64, _>(1)),
        to: AccountId(row.get::<i64, _>(2)),
        content: row.get::<String, _>(3),
    })
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
