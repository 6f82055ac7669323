use anyhow::{bail, Context, Result};
use sqlx::QueryBuilder;
use std::sync::Arc;
use tokio::sync::watch;

use super::schema::Database;
use super::types::{Channel, ChannelRow, ChannelUpdate, NewChannel};
use crate::util::validate_url;

const CHANNEL_SELECT: &str = r#"
    SELECT c.id, c.name, c.url, c.description, c.image_url,
           c.category_id, cat.name AS category_name
    FROM channels c
    LEFT JOIN categories cat ON cat.id = c.category_id
"#;

/// Trim an optional text field, mapping blank input to `None`.
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

impl Database {
    // ========================================================================
    // Channel Operations
    // ========================================================================

    async fn ensure_category_exists(&self, category_id: &str) -> Result<()> {
        let found: Option<(String,)> = sqlx::query_as("SELECT id FROM categories WHERE id = ?")
            .bind(category_id)
            .fetch_optional(&self.pool)
            .await?;
        if found.is_none() {
            bail!("Category '{}' does not exist", category_id);
        }
        Ok(())
    }

    /// Register a channel. Ids are assigned as increasing integers.
    ///
    /// The name is sanitized and the URL must pass [`validate_url`].
    pub async fn insert_channel(&self, channel: NewChannel) -> Result<Channel> {
        let name = Self::sanitize_name("Channel", &channel.name)?;
        let url = validate_url(&channel.url)
            .with_context(|| format!("Rejected feed URL '{}'", channel.url.trim()))?;
        let category_id = non_blank(channel.category_id);
        if let Some(ref cid) = category_id {
            self.ensure_category_exists(cid).await?;
        }

        let mut tx = self.pool.begin().await?;
        let (next,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(CAST(id AS INTEGER)), 0) + 1 FROM channels")
                .fetch_one(&mut *tx)
                .await?;
        let id = next.to_string();

        sqlx::query(
            r#"
            INSERT INTO channels (id, name, url, description, image_url, category_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&id)
        .bind(&name)
        .bind(url.as_str())
        .bind(non_blank(channel.description))
        .bind(non_blank(channel.image_url))
        .bind(&category_id)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(id = %id, name = %name, url = %url, "Registered channel");

        self.get_channel(&id)
            .await?
            .context("Channel vanished right after insert")
    }

    /// Apply a partial update. Returns `None` if the channel does not exist.
    pub async fn update_channel(&self, id: &str, update: ChannelUpdate) -> Result<Option<Channel>> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE channels SET ");
        let mut fields = builder.separated(", ");
        let mut touched = false;

        if let Some(name) = update.name {
            let name = Self::sanitize_name("Channel", &name)?;
            fields.push("name = ").push_bind_unseparated(name);
            touched = true;
        }
        if let Some(url) = update.url {
            let url = validate_url(&url)
                .with_context(|| format!("Rejected feed URL '{}'", url.trim()))?;
            fields.push("url = ").push_bind_unseparated(url.to_string());
            touched = true;
        }
        if let Some(description) = update.description {
            fields
                .push("description = ")
                .push_bind_unseparated(non_blank(description));
            touched = true;
        }
        if let Some(image_url) = update.image_url {
            fields
                .push("image_url = ")
                .push_bind_unseparated(non_blank(image_url));
            touched = true;
        }
        if let Some(category_id) = update.category_id {
            let category_id = non_blank(category_id);
            if let Some(ref cid) = category_id {
                self.ensure_category_exists(cid).await?;
            }
            fields
                .push("category_id = ")
                .push_bind_unseparated(category_id);
            touched = true;
        }

        if !touched {
            return self.get_channel(id).await;
        }

        builder.push(" WHERE id = ").push_bind(id);
        let result = builder.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get_channel(id).await
    }

    /// Delete a channel. Bookmarks taken from it are kept.
    pub async fn delete_channel(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM channels WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All channels in registration order.
    pub async fn get_channels(&self) -> Result<Vec<Channel>> {
        let query = format!("{} ORDER BY CAST(c.id AS INTEGER), c.id", CHANNEL_SELECT);
        let rows: Vec<ChannelRow> = sqlx::query_as(&query).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(ChannelRow::into_channel).collect())
    }

    pub async fn get_channel(&self, id: &str) -> Result<Option<Channel>> {
        let query = format!("{} WHERE c.id = ?", CHANNEL_SELECT);
        let row: Option<ChannelRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ChannelRow::into_channel))
    }
}

// ============================================================================
// Channel Catalog
// ============================================================================

/// In-memory view of the channel table with write-through mutations.
///
/// Reads (`list`, `get`) never touch the database. Every successful write
/// reloads the list and notifies subscribers, which is how a front end learns
/// that the catalog changed and a new aggregation pass is due.
#[derive(Clone)]
pub struct ChannelCatalog {
    db: Database,
    state: Arc<watch::Sender<Arc<Vec<Channel>>>>,
}

impl ChannelCatalog {
    /// Load the catalog from the database.
    pub async fn load(db: Database) -> Result<Self> {
        let channels = db.get_channels().await.context("Failed to load channels")?;
        tracing::debug!(count = channels.len(), "Loaded channel catalog");
        let (tx, _rx) = watch::channel(Arc::new(channels));
        Ok(Self {
            db,
            state: Arc::new(tx),
        })
    }

    /// Current channel list. Cheap: clones an `Arc`.
    pub fn list(&self) -> Arc<Vec<Channel>> {
        self.state.borrow().clone()
    }

    pub fn get(&self, id: &str) -> Option<Channel> {
        self.state.borrow().iter().find(|c| c.id == id).cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Channel>>> {
        self.state.subscribe()
    }

    pub async fn add(&self, channel: NewChannel) -> Result<Channel> {
        let created = self.db.insert_channel(channel).await?;
        self.reload().await?;
        Ok(created)
    }

    pub async fn update(&self, id: &str, update: ChannelUpdate) -> Result<Option<Channel>> {
        let updated = self.db.update_channel(id, update).await?;
        if updated.is_some() {
            self.reload().await?;
        }
        Ok(updated)
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        let removed = self.db.delete_channel(id).await?;
        if removed {
            self.reload().await?;
        }
        Ok(removed)
    }

    /// Re-read the channel table, e.g. after a category rename.
    pub async fn reload(&self) -> Result<()> {
        let channels = self.db.get_channels().await?;
        self.state.send_replace(Arc::new(channels));
        Ok(())
    }
}
