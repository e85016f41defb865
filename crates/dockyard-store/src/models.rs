use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A panel account. `ssh_pub_key` is injected into containers created for
/// this user.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub ssh_pub_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub is_admin: bool,
    pub ssh_pub_key: Option<String>,
}

/// One assignable network address. `is_routed` decides the attachment kind;
/// `is_available` is the claim flag the allocator flips.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AddressRow {
    pub id: i64,
    pub ip_addr: String,
    pub mac_addr: Option<String>,
    pub is_routed: bool,
    pub is_active: bool,
    pub is_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAddress {
    pub ip_addr: String,
    pub mac_addr: Option<String>,
    pub is_routed: bool,
}

/// A known image, either pulled from a registry or committed from a
/// container (`is_snapshot`).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ImageRow {
    pub id: i64,
    pub name: String,
    pub tag: String,
    pub user_id: Option<i64>,
    pub source_container_id: Option<i64>,
    pub is_snapshot: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewImage {
    pub name: String,
    pub tag: String,
    pub user_id: Option<i64>,
    pub source_container_id: Option<i64>,
    pub is_snapshot: bool,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ContainerRow {
    pub id: i64,
    pub hostname: String,
    pub engine_id: String,
    pub image_id: Option<i64>,
    pub address_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Everything persisted once the engine has confirmed a run.
#[derive(Debug, Clone)]
pub struct NewContainer {
    pub hostname: String,
    pub engine_id: String,
    pub image_id: Option<i64>,
    pub address_id: i64,
    pub owner_ids: Vec<i64>,
}
