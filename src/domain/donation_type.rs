use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fund a gift is attributed to (tithe, missions, building fund...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonationType {
    pub id: Uuid,
    pub church_id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
