//! SQLite-backed [`Store`]: operators (`tg_users`) and destinations (`vk_groups`).

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use vkpub_core::{
    domain::{
        Destination, GroupId, NewDestination, Operator, RefreshableOperator, TokenSet, UserId,
    },
    errors::Error,
    ports::Store,
    Result,
};

fn db(e: sqlx::Error) -> Error {
    Error::Persistence(e.to_string())
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and make sure the schema exists.
    pub async fn open(url: &str) -> Result<Self> {
        info!("Opening SQLite database at: {url}");

        let opts = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::Config(format!("invalid DATABASE_URL {url}: {e}")))?
            .create_if_missing(true);

        // Every connection to an in-memory database is a separate database.
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        }
        .connect_with(opts)
        .await
        .map_err(db)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        debug!("Initializing SQLite schema...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tg_users (
                tg_id INTEGER PRIMARY KEY,
                username TEXT,
                is_admin BOOL DEFAULT FALSE,
                access_token TEXT,
                refresh_token TEXT,
                token_id TEXT,
                device_id TEXT
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vk_groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_name TEXT,
                group_link TEXT,
                description TEXT,
                group_id INTEGER
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db)?;

        Ok(())
    }

    async fn set_admin(&self, username: &str, value: bool) -> Result<()> {
        let done = sqlx::query("UPDATE tg_users SET is_admin = ? WHERE username = ?")
            .bind(value)
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(username.to_string()));
        }
        Ok(())
    }
}

fn operator_from_row(row: &SqliteRow) -> Result<Operator> {
    Ok(Operator {
        user_id: UserId(row.try_get("tg_id").map_err(db)?),
        username: row.try_get("username").map_err(db)?,
        is_admin: row
            .try_get::<Option<bool>, _>("is_admin")
            .map_err(db)?
            .unwrap_or(false),
        access_token: row.try_get("access_token").map_err(db)?,
        refresh_token: row.try_get("refresh_token").map_err(db)?,
        id_token: row.try_get("token_id").map_err(db)?,
        device_id: row.try_get("device_id").map_err(db)?,
    })
}

fn destination_from_row(row: &SqliteRow) -> Result<Destination> {
    Ok(Destination {
        internal_id: row.try_get("id").map_err(db)?,
        name: row
            .try_get::<Option<String>, _>("group_name")
            .map_err(db)?
            .unwrap_or_default(),
        link: row
            .try_get::<Option<String>, _>("group_link")
            .map_err(db)?
            .unwrap_or_default(),
        group_id: GroupId(row.try_get("group_id").map_err(db)?),
        description: row
            .try_get::<Option<String>, _>("description")
            .map_err(db)?
            .unwrap_or_default(),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn ensure_operator(&self, user_id: UserId, username: Option<&str>) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO tg_users (tg_id, username) VALUES (?, ?)")
            .bind(user_id.0)
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(())
    }

    async fn operator(&self, user_id: UserId) -> Result<Option<Operator>> {
        let row = sqlx::query("SELECT * FROM tg_users WHERE tg_id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.as_ref().map(operator_from_row).transpose()
    }

    async fn is_admin(&self, user_id: UserId) -> Result<bool> {
        Ok(self
            .operator(user_id)
            .await?
            .map(|o| o.is_admin)
            .unwrap_or(false))
    }

    async fn grant_admin(&self, username: &str) -> Result<()> {
        self.set_admin(username, true).await
    }

    async fn revoke_admin(&self, username: &str) -> Result<()> {
        self.set_admin(username, false).await
    }

    async fn set_tokens(&self, user_id: UserId, tokens: &TokenSet, device_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE tg_users SET access_token = ?, refresh_token = ?, token_id = ?, device_id = ? WHERE tg_id = ?",
        )
        .bind(&tokens.access_token)
        .bind(&tokens.refresh_token)
        .bind(tokens.id_token.as_deref())
        .bind(device_id)
        .bind(user_id.0)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn update_tokens(
        &self,
        user_id: UserId,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE tg_users SET access_token = ?, refresh_token = ? WHERE tg_id = ?")
            .bind(access_token)
            .bind(refresh_token)
            .bind(user_id.0)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(())
    }

    async fn access_token(&self, user_id: UserId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT access_token FROM tg_users WHERE tg_id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        match row {
            Some(r) => r.try_get("access_token").map_err(db),
            None => Ok(None),
        }
    }

    async fn refreshable_operators(&self) -> Result<Vec<RefreshableOperator>> {
        let rows = sqlx::query(
            "SELECT tg_id, refresh_token, device_id FROM tg_users \
             WHERE is_admin = 1 AND refresh_token IS NOT NULL AND device_id IS NOT NULL \
             ORDER BY tg_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.iter()
            .map(|r| {
                Ok(RefreshableOperator {
                    user_id: UserId(r.try_get("tg_id").map_err(db)?),
                    refresh_token: r.try_get("refresh_token").map_err(db)?,
                    device_id: r.try_get("device_id").map_err(db)?,
                })
            })
            .collect()
    }

    async fn list_destinations(&self) -> Result<Vec<Destination>> {
        let rows = sqlx::query(
            "SELECT id, group_name, group_link, description, group_id FROM vk_groups ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(destination_from_row).collect()
    }

    async fn destination(&self, group_id: GroupId) -> Result<Option<Destination>> {
        let row = sqlx::query(
            "SELECT id, group_name, group_link, description, group_id FROM vk_groups \
             WHERE group_id = ? ORDER BY id LIMIT 1",
        )
        .bind(group_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.as_ref().map(destination_from_row).transpose()
    }

    async fn save_destination(&self, dest: &NewDestination, description: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO vk_groups (group_name, group_link, description, group_id) VALUES (?, ?, ?, ?)",
        )
        .bind(&dest.name)
        .bind(&dest.link)
        .bind(description)
        .bind(dest.group_id.0)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn delete_destination(&self, group_id: GroupId) -> Result<bool> {
        let done = sqlx::query("DELETE FROM vk_groups WHERE group_id = ?")
            .bind(group_id.0)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(done.rows_affected() > 0)
    }

    async fn update_description(&self, group_id: GroupId, description: &str) -> Result<bool> {
        let done = sqlx::query("UPDATE vk_groups SET description = ? WHERE group_id = ?")
            .bind(description)
            .bind(group_id.0)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(done.rows_affected() > 0)
    }
}
