use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::books::repo_types::Book;

#[async_trait]
pub trait BookRepo: Send + Sync {
    async fn insert(&self, book: &Book) -> anyhow::Result<()>;
    /// Rewrites the mutable columns; the owner is never updated.
    async fn update(&self, book: &Book) -> anyhow::Result<()>;
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Book>>;
    /// Newest first.
    async fn list_page(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Book>>;
    async fn count(&self) -> anyhow::Result<i64>;
    /// Newest first.
    async fn list_by_owner(&self, user_id: Uuid) -> anyhow::Result<Vec<Book>>;
}

#[derive(Clone)]
pub struct PgBookRepo {
    db: PgPool,
}

impl PgBookRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BookRepo for PgBookRepo {
    async fn insert(&self, book: &Book) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO books (id, user_id, title, caption, rating, image_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(book.id)
        .bind(book.user_id)
        .bind(&book.title)
        .bind(&book.caption)
        .bind(book.rating)
        .bind(&book.image_key)
        .bind(book.created_at)
        .bind(book.updated_at)
        .execute(&self.db)
        .await
        .context("insert book")?;
        Ok(())
    }

    async fn update(&self, book: &Book) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE books
               SET title = $2, caption = $3, rating = $4, updated_at = $5
             WHERE id = $1
            "#,
        )
        .bind(book.id)
        .bind(&book.title)
        .bind(&book.caption)
        .bind(book.rating)
        .bind(book.updated_at)
        .execute(&self.db)
        .await
        .context("update book")?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete book")?;
        Ok(res.rows_affected() > 0)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(
            r#"
            SELECT id, user_id, title, caption, rating, image_key, created_at, updated_at
            FROM books
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find book")?;
        Ok(book)
    }

    async fn list_page(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Book>> {
        let rows = sqlx::query_as::<_, Book>(
            r#"
            SELECT id, user_id, title, caption, rating, image_key, created_at, updated_at
            FROM books
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .context("list books")?;
        Ok(rows)
    }

    async fn count(&self) -> anyhow::Result<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM books")
            .fetch_one(&self.db)
            .await
            .context("count books")?;
        Ok(n)
    }

    async fn list_by_owner(&self, user_id: Uuid) -> anyhow::Result<Vec<Book>> {
        let rows = sqlx::query_as::<_, Book>(
            r#"
            SELECT id, user_id, title, caption, rating, image_key, created_at, updated_at
            FROM books
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await
        .context("list books by owner")?;
        Ok(rows)
    }
}

#[cfg(test)]
pub use memory::MemoryBookRepo;
