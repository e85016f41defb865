//! SQLite-backed relational store for the panel.
//!
//! Holds the four record kinds the panel tracks: users, network addresses,
//! images and containers, plus the container/owner join table. The address
//! claim is the concurrency serialization point: [`Store::claim_address`] is
//! a conditional update, so of two racing creates exactly one wins the row.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use thiserror::Error;

use dockyard_common::DockyardError;

pub mod models;

pub use models::{
    AddressRow, ContainerRow, ImageRow, NewAddress, NewContainer, NewImage, NewUser, UserRow,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,
    #[error("constraint violated: {0}")]
    Conflict(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl From<StoreError> for DockyardError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => DockyardError::NotFound("record not found".to_string()),
            StoreError::Conflict(msg) => DockyardError::Conflict(msg),
            StoreError::Sqlx(e) => DockyardError::Store(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Surface unique-index violations as [`StoreError::Conflict`].
fn conflict_on_unique(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        _ => StoreError::Sqlx(err),
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    email       TEXT    NOT NULL UNIQUE,
    name        TEXT    NOT NULL,
    is_active   INTEGER NOT NULL DEFAULT 1,
    is_admin    INTEGER NOT NULL DEFAULT 0,
    ssh_pub_key TEXT,
    created_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS addresses (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    ip_addr      TEXT    NOT NULL UNIQUE,
    mac_addr     TEXT,
    is_routed    INTEGER NOT NULL DEFAULT 0,
    is_active    INTEGER NOT NULL DEFAULT 1,
    is_available INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS images (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    name                TEXT    NOT NULL,
    tag                 TEXT    NOT NULL,
    user_id             INTEGER REFERENCES users(id) ON DELETE SET NULL,
    source_container_id INTEGER REFERENCES containers(id) ON DELETE SET NULL,
    is_snapshot         INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT    NOT NULL,
    UNIQUE (name, tag)
);

CREATE TABLE IF NOT EXISTS containers (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname   TEXT    NOT NULL UNIQUE,
    engine_id  TEXT    NOT NULL UNIQUE,
    image_id   INTEGER REFERENCES images(id) ON DELETE SET NULL,
    address_id INTEGER NOT NULL REFERENCES addresses(id),
    created_at TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS container_users (
    container_id INTEGER NOT NULL REFERENCES containers(id) ON DELETE CASCADE,
    user_id      INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    PRIMARY KEY (container_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_container_users_user ON container_users(user_id);
"#;

#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    /// Open (creating if missing) the database at `path` and apply the
    /// schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Sqlx(sqlx::Error::Io(e)))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
            .map_err(StoreError::Sqlx)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        // SQLite permits limited write concurrency; a single connection
        // avoids persistent lock failures under axum concurrency.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Fresh private in-memory database, used by tests.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(StoreError::Sqlx)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // --- Users ---

    pub async fn create_user(&self, new: &NewUser) -> Result<UserRow> {
        let res = sqlx::query(
            "INSERT INTO users (email, name, is_active, is_admin, ssh_pub_key, created_at)
             VALUES (?, ?, 1, ?, ?, ?)",
        )
        .bind(&new.email)
        .bind(&new.name)
        .bind(new.is_admin)
        .bind(&new.ssh_pub_key)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(conflict_on_unique)?;
        self.user_by_id(res.last_insert_rowid()).await
    }

    pub async fn user_by_id(&self, id: i64) -> Result<UserRow> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        Ok(
            sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn list_users(&self) -> Result<Vec<UserRow>> {
        Ok(
            sqlx::query_as::<_, UserRow>("SELECT * FROM users ORDER BY email")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    pub async fn update_user(
        &self,
        id: i64,
        name: &str,
        is_active: bool,
        is_admin: bool,
    ) -> Result<UserRow> {
        let res = sqlx::query("UPDATE users SET name = ?, is_active = ?, is_admin = ? WHERE id = ?")
            .bind(name)
            .bind(is_active)
            .bind(is_admin)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.user_by_id(id).await
    }

    pub async fn set_ssh_key(&self, id: i64, key: Option<&str>) -> Result<()> {
        let res = sqlx::query("UPDATE users SET ssh_pub_key = ? WHERE id = ?")
            .bind(key)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn delete_user(&self, id: i64) -> Result<()> {
        let res = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // --- Addresses ---

    pub async fn create_address(&self, new: &NewAddress) -> Result<AddressRow> {
        let res = sqlx::query(
            "INSERT INTO addresses (ip_addr, mac_addr, is_routed, is_active, is_available)
             VALUES (?, ?, ?, 1, 1)",
        )
        .bind(&new.ip_addr)
        .bind(&new.mac_addr)
        .bind(new.is_routed)
        .execute(&self.pool)
        .await
        .map_err(conflict_on_unique)?;
        self.address_by_id(res.last_insert_rowid()).await
    }

    pub async fn address_by_id(&self, id: i64) -> Result<AddressRow> {
        sqlx::query_as::<_, AddressRow>("SELECT * FROM addresses WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn list_addresses(&self) -> Result<Vec<AddressRow>> {
        Ok(
            sqlx::query_as::<_, AddressRow>("SELECT * FROM addresses ORDER BY ip_addr")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    pub async fn list_available_addresses(&self) -> Result<Vec<AddressRow>> {
        Ok(sqlx::query_as::<_, AddressRow>(
            "SELECT * FROM addresses WHERE is_available = 1 AND is_active = 1 ORDER BY ip_addr",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Conditionally mark the address taken. Of two racing claims only one
    /// sees `rows_affected == 1`; the loser gets [`StoreError::Conflict`].
    pub async fn claim_address(&self, id: i64) -> Result<AddressRow> {
        let address = self.address_by_id(id).await?;
        let res = sqlx::query(
            "UPDATE addresses SET is_available = 0
             WHERE id = ? AND is_available = 1 AND is_active = 1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "address {} is not available",
                address.ip_addr
            )));
        }
        self.address_by_id(id).await
    }

    /// Undo a claim whose container never materialized.
    pub async fn release_address(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE addresses SET is_available = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Rewrite an address. Refused while a container holds the row; the
    /// engine side would keep the old attachment either way.
    pub async fn update_address(&self, id: i64, new: &NewAddress) -> Result<AddressRow> {
        let in_use: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM containers WHERE address_id = ?)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        if in_use {
            return Err(StoreError::Conflict(
                "address is assigned to a container".to_string(),
            ));
        }
        let res = sqlx::query(
            "UPDATE addresses SET ip_addr = ?, mac_addr = ?, is_routed = ? WHERE id = ?",
        )
        .bind(&new.ip_addr)
        .bind(&new.mac_addr)
        .bind(new.is_routed)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(conflict_on_unique)?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.address_by_id(id).await
    }

    pub async fn delete_address(&self, id: i64) -> Result<()> {
        let in_use: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM containers WHERE address_id = ?)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        if in_use {
            return Err(StoreError::Conflict(
                "address is assigned to a container".to_string(),
            ));
        }
        let res = sqlx::query("DELETE FROM addresses WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // --- Images ---

    pub async fn create_image(&self, new: &NewImage) -> Result<ImageRow> {
        let res = sqlx::query(
            "INSERT INTO images (name, tag, user_id, source_container_id, is_snapshot, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&new.name)
        .bind(&new.tag)
        .bind(new.user_id)
        .bind(new.source_container_id)
        .bind(new.is_snapshot)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(conflict_on_unique)?;
        self.image_by_id(res.last_insert_rowid()).await
    }

    pub async fn image_by_id(&self, id: i64) -> Result<ImageRow> {
        sqlx::query_as::<_, ImageRow>("SELECT * FROM images WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn image_by_name_tag(&self, name: &str, tag: &str) -> Result<Option<ImageRow>> {
        Ok(
            sqlx::query_as::<_, ImageRow>("SELECT * FROM images WHERE name = ? AND tag = ?")
                .bind(name)
                .bind(tag)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn list_images(&self) -> Result<Vec<ImageRow>> {
        Ok(
            sqlx::query_as::<_, ImageRow>("SELECT * FROM images ORDER BY name, tag")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// Images visible to one user: shared base images plus the user's own
    /// pulls and snapshots.
    pub async fn list_images_for_user(&self, user_id: i64) -> Result<Vec<ImageRow>> {
        Ok(sqlx::query_as::<_, ImageRow>(
            "SELECT * FROM images
             WHERE user_id IS NULL OR user_id = ?
             ORDER BY name, tag",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn delete_image(&self, id: i64) -> Result<()> {
        let res = sqlx::query("DELETE FROM images WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // --- Containers ---

    /// Persist a container the engine has confirmed, together with its owner
    /// set, in one transaction.
    pub async fn persist_container(&self, new: &NewContainer) -> Result<ContainerRow> {
        let mut tx = self.pool.begin().await?;
        let res = sqlx::query(
            "INSERT INTO containers (hostname, engine_id, image_id, address_id, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&new.hostname)
        .bind(&new.engine_id)
        .bind(new.image_id)
        .bind(new.address_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(conflict_on_unique)?;
        let id = res.last_insert_rowid();
        for owner in &new.owner_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO container_users (container_id, user_id) VALUES (?, ?)",
            )
            .bind(id)
            .bind(owner)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        self.container_by_id(id).await
    }

    pub async fn container_by_id(&self, id: i64) -> Result<ContainerRow> {
        sqlx::query_as::<_, ContainerRow>("SELECT * FROM containers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn container_by_hostname(&self, hostname: &str) -> Result<Option<ContainerRow>> {
        Ok(
            sqlx::query_as::<_, ContainerRow>("SELECT * FROM containers WHERE hostname = ?")
                .bind(hostname)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn list_containers(&self) -> Result<Vec<ContainerRow>> {
        Ok(
            sqlx::query_as::<_, ContainerRow>("SELECT * FROM containers ORDER BY hostname")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    pub async fn list_containers_for_user(&self, user_id: i64) -> Result<Vec<ContainerRow>> {
        Ok(sqlx::query_as::<_, ContainerRow>(
            "SELECT c.* FROM containers c
             JOIN container_users cu ON cu.container_id = c.id
             WHERE cu.user_id = ?
             ORDER BY c.hostname",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn owner_ids(&self, container_id: i64) -> Result<Vec<i64>> {
        Ok(sqlx::query_scalar(
            "SELECT user_id FROM container_users WHERE container_id = ? ORDER BY user_id",
        )
        .bind(container_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn add_owner(&self, container_id: i64, user_id: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO container_users (container_id, user_id) VALUES (?, ?)")
            .bind(container_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_owner(&self, container_id: i64, user_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM container_users WHERE container_id = ? AND user_id = ?")
            .bind(container_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete the container row, its owner set, and free its address, in one
    /// transaction. Runs only after the engine confirmed removal.
    pub async fn remove_container(&self, id: i64) -> Result<()> {
        let container = self.container_by_id(id).await?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM container_users WHERE container_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM containers WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE addresses SET is_available = 1 WHERE id = ?")
            .bind(container.address_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
