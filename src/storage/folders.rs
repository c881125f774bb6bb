use anyhow::{bail, Result};

use super::schema::Database;
use super::types::Folder;

impl Database {
    // ========================================================================
    // Folder Operations
    // ========================================================================

    /// Create a folder, returning its ID. Names are trimmed and must be
    /// non-empty and unique.
    pub async fn create_folder(&self, name: &str) -> Result<i64> {
        let name = name.trim();
        if name.is_empty() {
            bail!("Folder name cannot be empty or whitespace-only");
        }

        let row: (i64,) = sqlx::query_as("INSERT INTO folders (name) VALUES (?) RETURNING id")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0)
    }

    pub async fn get_folders(&self) -> Result<Vec<Folder>> {
        let rows: Vec<(i64, String, bool)> =
            sqlx::query_as("SELECT id, name, collapsed FROM folders ORDER BY name")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, collapsed)| Folder {
                id,
                name,
                collapsed,
            })
            .collect())
    }

    pub async fn set_folder_collapsed(&self, id: i64, collapsed: bool) -> Result<()> {
        sqlx::query("UPDATE folders SET collapsed = ? WHERE id = ?")
            .bind(collapsed)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a folder. Its feeds become uncategorized via ON DELETE SET NULL.
    pub async fn delete_folder(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM folders WHERE id = ?")
            .bind(id)
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
    async fn test_create_and_list_folders() {
        let db = test_db().await;
        db.create_folder("  News ").await.unwrap();
        db.create_folder("Blogs").await.unwrap();

        let folders = db.get_folders().await.unwrap();
        let names: Vec<&str> = folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Blogs", "News"]);
        assert!(folders.iter().all(|f| !f.collapsed));
    }

    #[tokio::test]
    async fn test_empty_folder_name_rejected() {
        let db = test_db().await;
        assert!(db.create_folder("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_folder_name_rejected() {
        let db = test_db().await;
        db.create_folder("News").await.unwrap();
        assert!(db.create_folder("News").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_folder_uncategorizes_feeds() {
        let db = test_db().await;
        let folder = db.create_folder("News").await.unwrap();
        let feed = db
            .insert_feed("https://example.com/rss", "Feed", "", Some(folder))
            .await
            .unwrap();

        db.set_folder_collapsed(folder, true).await.unwrap();
        assert!(db.get_folders().await.unwrap()[0].collapsed);

        db.delete_folder(folder).await.unwrap();
        assert!(db.get_folders().await.unwrap().is_empty());
        assert_eq!(db.get_feed(feed).await.unwrap().unwrap().folder_id, None);
    }
}
