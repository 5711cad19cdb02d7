use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{Donor, DonorContact, PostalAddress},
    error::{AppError, Result},
    repository::{parse_optional_uuid, parse_uuid, to_utc, DonorRepository},
};

const DONOR_COLUMNS: &str = r#"
    id, church_id, member_id, email, first_name, last_name, phone,
    address_line1, address_line2, city, state, postal_code, country,
    stripe_customer_id, total_given_cents, last_donation_at, created_at, updated_at
"#;

#[derive(FromRow)]
struct DonorRow {
    id: String,
    church_id: String,
    member_id: Option<String>,
    email: String,
    first_name: String,
    last_name: String,
    phone: Option<String>,
    address_line1: Option<String>,
    address_line2: Option<String>,
    city: Option<String>,
    state: Option<String>,
    postal_code: Option<String>,
    country: Option<String>,
    stripe_customer_id: Option<String>,
    total_given_cents: i64,
    last_donation_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqliteDonorRepository {
    pool: SqlitePool,
}

impl SqliteDonorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_donor(row: DonorRow) -> Result<Donor> {
        Ok(Donor {
            id: parse_uuid(&row.id)?,
            church_id: parse_uuid(&row.church_id)?,
            member_id: parse_optional_uuid(row.member_id)?,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            phone: row.phone,
            address: PostalAddress {
                line1: row.address_line1,
                line2: row.address_line2,
                city: row.city,
                state: row.state,
                postal_code: row.postal_code,
                country: row.country,
            },
            stripe_customer_id: row.stripe_customer_id,
            total_given_cents: row.total_given_cents,
            last_donation_at: row.last_donation_at.map(to_utc),
            created_at: to_utc(row.created_at),
            updated_at: to_utc(row.updated_at),
        })
    }
}

#[async_trait]
impl DonorRepository for SqliteDonorRepository {
    async fn upsert(&self, church_id: Uuid, contact: &DonorContact) -> Result<Donor> {
        let now = Utc::now().naive_utc();

        // Names are refreshed from the latest checkout; optional fields only
        // overwrite when the donor supplied them again.
        sqlx::query(
            r#"
            INSERT INTO donors (
                id, church_id, email, first_name, last_name, phone,
                address_line1, address_line2, city, state, postal_code, country,
                total_given_cents, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            ON CONFLICT (church_id, email) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                phone = COALESCE(excluded.phone, donors.phone),
                address_line1 = COALESCE(excluded.address_line1, donors.address_line1),
                address_line2 = COALESCE(excluded.address_line2, donors.address_line2),
                city = COALESCE(excluded.city, donors.city),
                state = COALESCE(excluded.state, donors.state),
                postal_code = COALESCE(excluded.postal_code, donors.postal_code),
                country = COALESCE(excluded.country, donors.country),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(church_id.to_string())
        .bind(&contact.email)
        .bind(&contact.first_name)
        .bind(&contact.last_name)
        .bind(&contact.phone)
        .bind(&contact.address.line1)
        .bind(&contact.address.line2)
        .bind(&contact.address.city)
        .bind(&contact.address.state)
        .bind(&contact.address.postal_code)
        .bind(&contact.address.country)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_by_email(church_id, &contact.email)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve upserted donor".to_string()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Donor>> {
        let query = format!("SELECT {} FROM donors WHERE id = ?", DONOR_COLUMNS);
        let row = sqlx::query_as::<_, DonorRow>(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_donor).transpose()
    }

    async fn find_by_email(&self, church_id: Uuid, email: &str) -> Result<Option<Donor>> {
        let query = format!(
            "SELECT {} FROM donors WHERE church_id = ? AND email = ?",
            DONOR_COLUMNS
        );
        let row = sqlx::query_as::<_, DonorRow>(&query)
            .bind(church_id.to_string())
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_donor).transpose()
    }
}

/// Credit a settled gift to the donor's running totals. Callers pass the
/// intended gift; fees the donor covered are not giving.
pub async fn record_gift(
    conn: &mut SqliteConnection,
    donor_id: Uuid,
    stripe_customer_id: Option<&str>,
    amount_cents: i64,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE donors
        SET stripe_customer_id = COALESCE(stripe_customer_id, ?),
            total_given_cents = total_given_cents + ?,
            last_donation_at = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(stripe_customer_id)
    .bind(amount_cents)
    .bind(at.naive_utc())
    .bind(at.naive_utc())
    .bind(donor_id.to_string())
    .execute(conn)
    .await?;

    Ok(())
}

/// Remove refunded money from the donor's lifetime total.
pub async fn deduct_refund(
    conn: &mut SqliteConnection,
    donor_id: Uuid,
    refunded_cents: i64,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE donors
        SET total_given_cents = MAX(total_given_cents - ?, 0),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(refunded_cents)
    .bind(at.naive_utc())
    .bind(donor_id.to_string())
    .execute(conn)
    .await?;

    Ok(())
}
