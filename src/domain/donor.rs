use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A giving profile within one church, optionally tied to a member record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Donor {
    pub id: Uuid,
    pub church_id: Uuid,
    pub member_id: Option<Uuid>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub address: PostalAddress,
    pub stripe_customer_id: Option<String>,
    pub total_given_cents: i64,
    pub last_donation_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PostalAddress {
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    /// ISO 3166-1 alpha-2, uppercase.
    pub country: Option<String>,
}

impl PostalAddress {
    pub fn is_empty(&self) -> bool {
        self.line1.is_none()
            && self.line2.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.postal_code.is_none()
            && self.country.is_none()
    }
}

/// Contact details as supplied at checkout, normalized for storage and for
/// the Stripe customer record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DonorContact {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub address: PostalAddress,
}

impl DonorContact {
    pub fn normalized(self) -> Self {
        Self {
            email: self.email.trim().to_lowercase(),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            phone: non_blank(self.phone),
            address: PostalAddress {
                line1: non_blank(self.address.line1),
                line2: non_blank(self.address.line2),
                city: non_blank(self.address.city),
                state: non_blank(self.address.state),
                postal_code: non_blank(self.address.postal_code),
                country: non_blank(self.address.country).map(|c| c.to_uppercase()),
            },
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    /// A gift is international when the billing country is known and not US.
    pub fn is_international(&self) -> bool {
        self.address
            .country
            .as_deref()
            .map(|country| country != "US")
            .unwrap_or(false)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
