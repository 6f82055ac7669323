use anyhow::{bail, Result};

use super::schema::Database;
use super::types::Category;
use crate::util::strip_control_chars;

impl Database {
    // ========================================================================
    // Category Operations
    // ========================================================================

    /// Strip control characters and surrounding whitespace; reject empty names.
    pub(crate) fn sanitize_name(kind: &str, name: &str) -> Result<String> {
        let sanitized = strip_control_chars(name);
        let trimmed = sanitized.trim();
        if trimmed.is_empty() {
            bail!("{} name cannot be empty or whitespace-only", kind);
        }
        Ok(trimmed.to_owned())
    }

    /// Create a category and return it with its assigned id.
    pub async fn create_category(&self, name: &str) -> Result<Category> {
        let name = Self::sanitize_name("Category", name)?;

        let mut tx = self.pool.begin().await?;
        let (next,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(CAST(id AS INTEGER)), 0) + 1 FROM categories")
                .fetch_one(&mut *tx)
                .await?;
        let id = next.to_string();

        sqlx::query("INSERT INTO categories (id, name) VALUES (?, ?)")
            .bind(&id)
            .bind(&name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(id = %id, name = %name, "Created category");
        Ok(Category { id, name })
    }

    /// Rename a category. Returns `false` if no category has that id.
    pub async fn rename_category(&self, id: &str, new_name: &str) -> Result<bool> {
        let name = Self::sanitize_name("Category", new_name)?;

        let result = sqlx::query("UPDATE categories SET name = ? WHERE id = ?")
            .bind(&name)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a category. Its channels become uncategorized.
    pub async fn delete_category(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE channels SET category_id = NULL WHERE category_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// All categories ordered by name.
    pub async fn get_categories(&self) -> Result<Vec<Category>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, name FROM categories ORDER BY name COLLATE NOCASE, id")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name)| Category { id, name })
            .collect())
    }
}
