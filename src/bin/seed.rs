use clap::Parser;
use fake::{
    faker::address::en::{CityName, PostCode, StateAbbr, StreetName},
    faker::internet::en::SafeEmail,
    faker::name::en::{FirstName, LastName},
    faker::phone_number::en::PhoneNumber,
    Fake,
};
use offertory::{
    domain::{DonorContact, PostalAddress, SubscriptionStatus},
    repository::{
        ChurchRepository, DonationTypeRepository, DonorRepository, NewChurch, NewConnectAccount,
        SqliteChurchRepository, SqliteDonationTypeRepository, SqliteDonorRepository,
    },
};
use sqlx::sqlite::SqlitePoolOptions;

/// Populate a local database with a demo church ready to take donations.
#[derive(Parser, Debug)]
#[command(name = "seed")]
struct Args {
    #[arg(long, default_value = "sqlite://offertory.db?mode=rwc")]
    database_url: String,

    #[arg(long, default_value = "Grace Community Church")]
    church_name: String,

    /// Connected account id the demo church routes funds to.
    #[arg(long, default_value = "acct_demo_offertory")]
    stripe_account: String,

    #[arg(long, default_value_t = 10)]
    donors: usize,
}

const DONATION_TYPES: &[&str] = &["General Fund", "Building Fund", "Missions", "Benevolence"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    println!("🌱 Starting database seeding...");

    let db_pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&args.database_url)
        .await?;

    println!("📋 Running migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await?;

    let church_repo = SqliteChurchRepository::new(db_pool.clone());
    let donation_type_repo = SqliteDonationTypeRepository::new(db_pool.clone());
    let donor_repo = SqliteDonorRepository::new(db_pool.clone());

    println!("⛪ Creating church...");
    let church = church_repo
        .create(NewChurch {
            name: args.church_name.clone(),
            onboarding_completed: true,
            subscription_status: SubscriptionStatus::Active,
        })
        .await?;

    church_repo
        .create_connect_account(NewConnectAccount {
            church_id: church.id,
            stripe_account_id: args.stripe_account.clone(),
            charges_enabled: true,
            payouts_enabled: true,
            details_submitted: true,
        })
        .await?;

    println!("🗂️  Creating donation types...");
    let mut type_ids = Vec::new();
    for name in DONATION_TYPES {
        type_ids.push(donation_type_repo.create(church.id, name).await?.id);
    }

    println!("👥 Creating {} donors...", args.donors);
    for _ in 0..args.donors {
        let contact = DonorContact {
            email: SafeEmail().fake(),
            first_name: FirstName().fake(),
            last_name: LastName().fake(),
            phone: Some(PhoneNumber().fake()),
            address: PostalAddress {
                line1: Some(format!("{} {}", (1..9999).fake::<u32>(), StreetName().fake::<String>())),
                line2: None,
                city: Some(CityName().fake()),
                state: Some(StateAbbr().fake()),
                postal_code: Some(PostCode().fake()),
                country: Some("US".to_string()),
            },
        }
        .normalized();
        donor_repo.upsert(church.id, &contact).await?;
    }

    println!("✅ Seeding complete!");
    println!();
    println!("Church:          {} ({})", church.name, church.id);
    println!("Stripe account:  {}", args.stripe_account);
    for (name, id) in DONATION_TYPES.iter().zip(&type_ids) {
        println!("Donation type:   {} ({})", name, id);
    }

    Ok(())
}
