use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{Church, StripeConnectAccount, SubscriptionStatus},
    error::{AppError, Result},
    repository::{parse_uuid, to_utc, ChurchRepository, NewChurch, NewConnectAccount},
};

#[derive(FromRow)]
struct ChurchRow {
    id: String,
    name: String,
    onboarding_completed: bool,
    subscription_status: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(FromRow)]
struct ConnectAccountRow {
    id: String,
    church_id: String,
    stripe_account_id: String,
    charges_enabled: bool,
    payouts_enabled: bool,
    details_submitted: bool,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqliteChurchRepository {
    pool: SqlitePool,
}

impl SqliteChurchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_church(row: ChurchRow) -> Result<Church> {
        Ok(Church {
            id: parse_uuid(&row.id)?,
            name: row.name,
            onboarding_completed: row.onboarding_completed,
            subscription_status: SubscriptionStatus::parse(&row.subscription_status).ok_or_else(
                || AppError::Database(format!("Invalid subscription status: {}", row.subscription_status)),
            )?,
            created_at: to_utc(row.created_at),
            updated_at: to_utc(row.updated_at),
        })
    }

    fn row_to_account(row: ConnectAccountRow) -> Result<StripeConnectAccount> {
        Ok(StripeConnectAccount {
            id: parse_uuid(&row.id)?,
            church_id: parse_uuid(&row.church_id)?,
            stripe_account_id: row.stripe_account_id,
            charges_enabled: row.charges_enabled,
            payouts_enabled: row.payouts_enabled,
            details_submitted: row.details_submitted,
            created_at: to_utc(row.created_at),
            updated_at: to_utc(row.updated_at),
        })
    }

    async fn find_account_where(&self, column: &str, value: String) -> Result<Option<StripeConnectAccount>> {
        let query = format!(
            r#"
            SELECT id, church_id, stripe_account_id, charges_enabled,
                   payouts_enabled, details_submitted, created_at, updated_at
            FROM stripe_connect_accounts
            WHERE {} = ?
            "#,
            column
        );
        let row = sqlx::query_as::<_, ConnectAccountRow>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_account).transpose()
    }
}

#[async_trait]
impl ChurchRepository for SqliteChurchRepository {
    async fn create(&self, church: NewChurch) -> Result<Church> {
        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO churches (id, name, onboarding_completed, subscription_status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&church.name)
        .bind(church.onboarding_completed)
        .bind(church.subscription_status.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve created church".to_string()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Church>> {
        let row = sqlx::query_as::<_, ChurchRow>(
            r#"
            SELECT id, name, onboarding_completed, subscription_status, created_at, updated_at
            FROM churches
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_church).transpose()
    }

    async fn update_status(
        &self,
        id: Uuid,
        onboarding_completed: bool,
        subscription_status: SubscriptionStatus,
    ) -> Result<Church> {
        sqlx::query(
            r#"
            UPDATE churches
            SET onboarding_completed = ?, subscription_status = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(onboarding_completed)
        .bind(subscription_status.as_str())
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Church not found".to_string()))
    }

    async fn create_connect_account(&self, account: NewConnectAccount) -> Result<StripeConnectAccount> {
        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO stripe_connect_accounts (
                id, church_id, stripe_account_id, charges_enabled,
                payouts_enabled, details_submitted, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(account.church_id.to_string())
        .bind(&account.stripe_account_id)
        .bind(account.charges_enabled)
        .bind(account.payouts_enabled)
        .bind(account.details_submitted)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_connect_account(account.church_id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve connected account".to_string()))
    }

    async fn find_connect_account(&self, church_id: Uuid) -> Result<Option<StripeConnectAccount>> {
        self.find_account_where("church_id", church_id.to_string()).await
    }

    async fn find_connect_account_by_stripe_id(
        &self,
        stripe_account_id: &str,
    ) -> Result<Option<StripeConnectAccount>> {
        self.find_account_where("stripe_account_id", stripe_account_id.to_string())
            .await
    }

    async fn set_charges_enabled(&self, church_id: Uuid, enabled: bool) -> Result<()> {
        sqlx::query(
            "UPDATE stripe_connect_accounts SET charges_enabled = ?, updated_at = ? WHERE church_id = ?",
        )
        .bind(enabled)
        .bind(Utc::now().naive_utc())
        .bind(church_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
