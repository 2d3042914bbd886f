use clap::Parser;
use fake::{
    faker::{
        address::en::StreetName,
        company::en::CompanyName,
        name::en::{FirstName, LastName},
        phone_number::en::PhoneNumber,
    },
    Fake,
};
use gymdesk::{
    auth::CurrentUser,
    config::Settings,
    domain::{CreateGymRequest, CreateUserRequest, MembershipPurchase, Role},
    gateway::VirtualGateway,
    repository::{GymRepository, UserRepository},
    service::{CreatePaymentRequest, ServiceContext},
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "seed", about = "Fill a gymdesk database with sample data")]
struct Args {
    #[arg(long, default_value = "sqlite://gymdesk.db?mode=rwc")]
    database_url: String,

    /// Athletes to create in the sample gym
    #[arg(long, default_value_t = 10)]
    athletes: usize,

    /// Password given to every seeded account
    #[arg(long, default_value = "password123")]
    password: String,
}

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

    let settings = Settings::new().unwrap_or_default();
    let gateway = Arc::new(VirtualGateway::new(settings.server.base_url.clone()));
    let ctx = ServiceContext::new(db_pool, gateway, &settings);

    println!("🏋️ Creating gym...");
    let gym = ctx.gym_repo.create(CreateGymRequest {
        name: CompanyName().fake(),
        address: StreetName().fake(),
        phone: PhoneNumber().fake(),
    }).await?;
    let gym = ctx.gym_repo.approve(gym.id).await?;
    println!("  ✅ {} ({})", gym.name, gym.id);

    if ctx.user_repo.find_by_national_code("0000000000").await?.is_none() {
        ctx.user_repo.create(CreateUserRequest {
            gym_id: None,
            first_name: "Super".to_string(),
            last_name: "Admin".to_string(),
            national_code: "0000000000".to_string(),
            phone: PhoneNumber().fake(),
            password: args.password.clone(),
            role: Role::SuperAdmin,
        }).await?;
        println!("  ✅ Created super admin (0000000000 / {})", args.password);
    }

    let admin_code = random_national_code();
    let admin = ctx.user_repo.create(CreateUserRequest {
        gym_id: Some(gym.id),
        first_name: FirstName().fake(),
        last_name: LastName().fake(),
        national_code: admin_code.clone(),
        phone: PhoneNumber().fake(),
        password: args.password.clone(),
        role: Role::GymAdmin,
    }).await?;
    println!("  ✅ Created gym admin ({} / {})", admin_code, args.password);

    let desk = CurrentUser {
        user_id: admin.id,
        gym_id: Some(gym.id),
        role: admin.role,
        national_code: admin.national_code.clone(),
    };

    println!("👥 Creating {} athletes...", args.athletes);
    for i in 0..args.athletes {
        let athlete = ctx.user_repo.create(CreateUserRequest {
            gym_id: Some(gym.id),
            first_name: FirstName().fake(),
            last_name: LastName().fake(),
            national_code: random_national_code(),
            phone: PhoneNumber().fake(),
            password: args.password.clone(),
            role: Role::Athlete,
        }).await?;

        // Every other athlete pays at the desk for a plan.
        let purchase = match i % 4 {
            0 => Some(MembershipPurchase::monthly((1..4).fake::<i32>())),
            2 => Some(MembershipPurchase::sessions((8..25).fake::<i32>())),
            _ => None,
        };

        if let Some(purchase) = purchase {
            ctx.payment_service.create_payment(&desk, CreatePaymentRequest {
                gym_id: gym.id,
                user_id: Some(athlete.id),
                amount: (500_000..3_000_000).fake::<i64>(),
                is_online: false,
                purchase: Some(purchase),
            }).await?;
        }

        println!("  ✅ {} {} ({})", athlete.first_name, athlete.last_name, athlete.national_code);
    }

    println!("🎉 Seeding complete!");
    Ok(())
}

fn random_national_code() -> String {
    format!("{:010}", (1_000_000_000u64..9_999_999_999u64).fake::<u64>())
}
