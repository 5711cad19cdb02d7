use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::DonationType,
    error::{AppError, Result},
    repository::{parse_uuid, to_utc, DonationTypeRepository},
};

#[derive(FromRow)]
struct DonationTypeRow {
    id: String,
    church_id: String,
    name: String,
    is_active: bool,
    created_at: NaiveDateTime,
}

pub struct SqliteDonationTypeRepository {
    pool: SqlitePool,
}

impl SqliteDonationTypeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_type(row: DonationTypeRow) -> Result<DonationType> {
        Ok(DonationType {
            id: parse_uuid(&row.id)?,
            church_id: parse_uuid(&row.church_id)?,
            name: row.name,
            is_active: row.is_active,
            created_at: to_utc(row.created_at),
        })
    }
}

#[async_trait]
impl DonationTypeRepository for SqliteDonationTypeRepository {
    async fn create(&self, church_id: Uuid, name: &str) -> Result<DonationType> {
        let id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO donation_types (id, church_id, name, is_active, created_at) VALUES (?, ?, ?, TRUE, ?)",
        )
        .bind(id.to_string())
        .bind(church_id.to_string())
        .bind(name)
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await?;

        self.find_for_church(id, church_id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve created donation type".to_string()))
    }

    async fn find_for_church(&self, id: Uuid, church_id: Uuid) -> Result<Option<DonationType>> {
        let row = sqlx::query_as::<_, DonationTypeRow>(
            r#"
            SELECT id, church_id, name, is_active, created_at
            FROM donation_types
            WHERE id = ? AND church_id = ?
            "#,
        )
        .bind(id.to_string())
        .bind(church_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_type).transpose()
    }

    async fn list_for_church(&self, church_id: Uuid) -> Result<Vec<DonationType>> {
        let rows = sqlx::query_as::<_, DonationTypeRow>(
            r#"
            SELECT id, church_id, name, is_active, created_at
            FROM donation_types
            WHERE church_id = ?
            ORDER BY name
            "#,
        )
        .bind(church_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_type).collect()
    }

    async fn set_active(&self, id: Uuid, is_active: bool) -> Result<()> {
        sqlx::query("UPDATE donation_types SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
