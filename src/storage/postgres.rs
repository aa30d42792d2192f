use crate::models::{
    ClickEvent, Enrichment, KeyCount, NewClick, PendingClick, ShortLink, ShortLinkSummary,
    TimeBucketCount, User,
};
use crate::permission::Permission;
use crate::storage::{
    is_unique_violation, ClickDimension, Storage, StorageError, StorageResult, DAY_SECS,
    UNKNOWN_KEY,
};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

const LINK_COLUMNS: &str = "id, short_path, original_url, user_id, created_at";
const USER_COLUMNS: &str = "id, username, password_hash, permissions, chat_id, created_at";
const CLICK_COLUMNS: &str = "id, short_link_id, clicked_at, user_agent, ip_address, os_name, \
     browser_name, country, country_code, region, city, lat, lon, isp, as_info, \
     enrich_status, enrich_attempts";

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGSERIAL PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                permissions BIGINT NOT NULL DEFAULT 0,
                chat_id BIGINT UNIQUE,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS short_links (
                id BIGSERIAL PRIMARY KEY,
                short_path TEXT NOT NULL UNIQUE,
                original_url TEXT NOT NULL,
                user_id BIGINT NOT NULL REFERENCES users(id),
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_short_links_user ON short_links(user_id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clicks (
                id BIGSERIAL PRIMARY KEY,
                short_link_id BIGINT NOT NULL REFERENCES short_links(id),
                clicked_at BIGINT NOT NULL,
                user_agent TEXT,
                ip_address TEXT,
                os_name TEXT,
                browser_name TEXT,
                country TEXT,
                country_code TEXT,
                region TEXT,
                city TEXT,
                lat DOUBLE PRECISION,
                lon DOUBLE PRECISION,
                isp TEXT,
                as_info TEXT,
                enrich_status INTEGER NOT NULL DEFAULT 0,
                enrich_attempts INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_clicks_link_time ON clicks(short_link_id, clicked_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_clicks_pending ON clicks(enrich_status, id)")
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn create_link(
        &self,
        short_path: &str,
        original_url: &str,
        user_id: i64,
    ) -> StorageResult<ShortLink> {
        let created_at = chrono::Utc::now().timestamp();

        let link = sqlx::query_as::<_, ShortLink>(&format!(
            r#"
            INSERT INTO short_links (short_path, original_url, user_id, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (short_path) DO NOTHING
            RETURNING {LINK_COLUMNS}
            "#
        ))
        .bind(short_path)
        .bind(original_url)
        .bind(user_id)
        .bind(created_at)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        link.ok_or(StorageError::Conflict)
    }

    async fn get_link_by_path(&self, short_path: &str) -> Result<Option<ShortLink>> {
        let link = sqlx::query_as::<_, ShortLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM short_links WHERE short_path = $1"
        ))
        .bind(short_path)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(link)
    }

    async fn get_link_by_id(&self, id: i64) -> Result<Option<ShortLink>> {
        let link = sqlx::query_as::<_, ShortLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM short_links WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(link)
    }

    async fn delete_link(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM clicks WHERE short_link_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM short_links WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_links_by_owner(&self, user_id: i64) -> Result<Vec<ShortLinkSummary>> {
        let links = sqlx::query_as::<_, ShortLinkSummary>(
            r#"
            SELECT l.id, l.short_path, l.original_url, l.user_id, l.created_at,
                   u.username AS owner_username,
                   (SELECT COUNT(*) FROM clicks c WHERE c.short_link_id = l.id) AS total_clicks
            FROM short_links l
            JOIN users u ON u.id = l.user_id
            WHERE l.user_id = $1
            ORDER BY l.created_at DESC, l.id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(links)
    }

    async fn list_all_links(&self) -> Result<Vec<ShortLinkSummary>> {
        let links = sqlx::query_as::<_, ShortLinkSummary>(
            r#"
            SELECT l.id, l.short_path, l.original_url, l.user_id, l.created_at,
                   u.username AS owner_username,
                   (SELECT COUNT(*) FROM clicks c WHERE c.short_link_id = l.id) AS total_clicks
            FROM short_links l
            JOIN users u ON u.id = l.user_id
            ORDER BY l.created_at DESC, l.id DESC
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(links)
    }

    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        permissions: Permission,
    ) -> StorageResult<User> {
        let created_at = chrono::Utc::now().timestamp();

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, password_hash, permissions, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (username) DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(username)
        .bind(password_hash)
        .bind(i64::from(permissions))
        .bind(created_at)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        user.ok_or(StorageError::Conflict)
    }

    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    async fn get_user_by_chat_id(&self, chat_id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE chat_id = $1"
        ))
        .bind(chat_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    async fn update_permissions(&self, user_id: i64, permissions: Permission) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET permissions = $1 WHERE id = $2")
            .bind(i64::from(permissions))
            .bind(user_id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_chat_id(&self, user_id: i64, chat_id: Option<i64>) -> StorageResult<bool> {
        let result = sqlx::query("UPDATE users SET chat_id = $1 WHERE id = $2")
            .bind(chat_id)
            .bind(user_id)
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::Conflict
                } else {
                    StorageError::Other(e.into())
                }
            })?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_user(&self, user_id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM clicks WHERE short_link_id IN (SELECT id FROM short_links WHERE user_id = $1)",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM short_links WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id"
        ))
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(users)
    }

    async fn insert_click(&self, click: &NewClick) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO clicks (short_link_id, clicked_at, user_agent, ip_address, os_name, browser_name)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(click.short_link_id)
        .bind(click.clicked_at)
        .bind(click.user_agent.as_deref())
        .bind(click.ip_address.as_deref())
        .bind(click.os_name.as_deref())
        .bind(click.browser_name.as_deref())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(id)
    }

    async fn get_click(&self, id: i64) -> Result<Option<ClickEvent>> {
        let click = sqlx::query_as::<_, ClickEvent>(&format!(
            "SELECT {CLICK_COLUMNS} FROM clicks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(click)
    }

    async fn count_clicks(&self, short_link_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM clicks WHERE short_link_id = $1",
        )
        .bind(short_link_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    async fn clicks_by_day(
        &self,
        short_link_id: i64,
        from: i64,
        to: i64,
    ) -> Result<Vec<TimeBucketCount>> {
        let buckets = sqlx::query_as::<_, TimeBucketCount>(&format!(
            r#"
            SELECT (clicked_at / {DAY_SECS}) * {DAY_SECS} AS bucket_start, COUNT(*) AS "count"
            FROM clicks
            WHERE short_link_id = $1 AND clicked_at >= $2 AND clicked_at < $3
            GROUP BY 1
            ORDER BY 1
            "#
        ))
        .bind(short_link_id)
        .bind(from)
        .bind(to)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(buckets)
    }

    async fn clicks_by_dimension(
        &self,
        short_link_id: i64,
        from: i64,
        to: i64,
        dimension: ClickDimension,
    ) -> Result<Vec<KeyCount>> {
        let column = dimension.column();
        let counts = sqlx::query_as::<_, KeyCount>(&format!(
            r#"
            SELECT COALESCE(NULLIF({column}, ''), '{UNKNOWN_KEY}') AS "key", COUNT(*) AS "count"
            FROM clicks
            WHERE short_link_id = $1 AND clicked_at >= $2 AND clicked_at < $3
            GROUP BY 1
            ORDER BY 2 DESC, 1
            "#
        ))
        .bind(short_link_id)
        .bind(from)
        .bind(to)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(counts)
    }

    async fn fetch_pending_clicks(&self, limit: i64) -> Result<Vec<PendingClick>> {
        let clicks = sqlx::query_as::<_, PendingClick>(
            r#"
            SELECT id, ip_address, enrich_attempts
            FROM clicks
            WHERE enrich_status = 0
            ORDER BY id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(clicks)
    }

    async fn apply_enrichment(&self, click_id: i64, enrichment: &Enrichment) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE clicks
            SET country = $1, country_code = $2, region = $3, city = $4, lat = $5, lon = $6,
                isp = $7, as_info = $8, enrich_status = 1, enrich_attempts = enrich_attempts + 1
            WHERE id = $9 AND enrich_status = 0
            "#,
        )
        .bind(enrichment.country.as_deref())
        .bind(enrichment.country_code.as_deref())
        .bind(enrichment.region.as_deref())
        .bind(enrichment.city.as_deref())
        .bind(enrichment.lat)
        .bind(enrichment.lon)
        .bind(enrichment.isp.as_deref())
        .bind(enrichment.as_info.as_deref())
        .bind(click_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_enrichment_failure(&self, click_id: i64, max_attempts: i32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE clicks
            SET enrich_attempts = enrich_attempts + 1,
                enrich_status = CASE WHEN enrich_attempts + 1 >= $1 THEN 2 ELSE 0 END
            WHERE id = $2 AND enrich_status = 0
            "#,
        )
        .bind(max_attempts)
        .bind(click_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
