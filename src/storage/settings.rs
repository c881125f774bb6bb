use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::schema::Database;

impl Database {
    // ========================================================================
    // Settings Operations
    // ========================================================================

    /// Get a setting, deserialized from its stored JSON.
    ///
    /// Returns `None` if the key has never been set.
    pub async fn get_setting<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((raw,)) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Set a setting (UPSERT), stored as JSON.
    pub async fn set_setting<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(raw)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_get_setting_missing() {
        let db = test_db().await;
        let value: Option<String> = db.get_setting("theme").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_set_setting_upsert() {
        let db = test_db().await;
        db.set_setting("fontSize", &16).await.unwrap();
        db.set_setting("fontSize", &18).await.unwrap();

        let value: Option<u32> = db.get_setting("fontSize").await.unwrap();
        assert_eq!(value, Some(18));
    }

    #[tokio::test]
    async fn test_structured_setting_roundtrip() {
        let db = test_db().await;
        db.set_setting("collapsed", &vec!["news", "blogs"])
            .await
            .unwrap();

        let value: Option<Vec<String>> = db.get_setting("collapsed").await.unwrap();
        assert_eq!(value, Some(vec!["news".to_string(), "blogs".to_string()]));
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let db = test_db().await;
        db.set_setting("theme", "dark").await.unwrap();
        assert!(db.get_setting::<u32>("theme").await.is_err());
    }
}
