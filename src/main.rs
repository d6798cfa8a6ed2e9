use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use raspberryio::aggregator::FeedSyncer;
use raspberryio::config::Config;
use raspberryio::models::CreateUserInput;
use raspberryio::notify::{Mailer, MemoryMailer, PendingApprovalNotifier, SmtpMailer};
use raspberryio::push::HubClient;
use raspberryio::{api, db};

#[derive(Parser)]
#[command(name = "raspberryio")]
#[command(about = "Community site for Raspberry Pi projects: blog aggregator and activity stream")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Email the feed approvers if feeds are waiting for moderation
    SendPendingApprovalEmail {
        /// Print the email instead of sending it
        #[arg(long)]
        dry_run: bool,
    },
    /// Fetch every approved feed and store new entries
    RefreshFeeds,
    /// Ask the hub to push updates of every approved feed
    SubscribeFeeds {
        /// Hub URL, overriding the configured one
        #[arg(long)]
        hub: Option<String>,
    },
    /// Create a user account
    CreateUser {
        username: String,
        email: String,

        #[arg(long)]
        password: String,

        /// Add the user to this group, e.g. feed-approver
        #[arg(long)]
        group: Option<String>,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "raspberryio=debug,tower_http=debug".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn open_database(config: &Config) -> anyhow::Result<db::Database> {
    let db = match &config.database_path {
        Some(path) => db::Database::open(path.clone())?,
        None => db::Database::open_default()?,
    };
    db.migrate()?;
    Ok(db)
}

async fn serve(config: Config, host: &str, port: u16) -> anyhow::Result<()> {
    tracing::info!("Starting RaspberryIO server on {}:{}", host, port);

    let db = open_database(&config)?;
    let mailer: Arc<dyn Mailer> = Arc::new(SmtpMailer::new(&config.email)?);
    if config.access.api_key.is_none() {
        tracing::warn!("RASPBERRYIO_API_KEY is not set; the moderation API is open");
    }
    let state = api::AppState::new(db, config, mailer);

    let throttles = state.access.throttles();
    if !throttles.is_empty() {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                interval.tick().await;
                throttles.iter().for_each(api::Throttle::sweep);
            }
        });
    }

    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    tracing::info!("RaspberryIO server listening on http://{}:{}", host, port);

    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = Config::from_env()?;

    match cli.command {
        Some(Commands::Serve { port, host }) => serve(config, &host, port).await?,
        Some(Commands::SendPendingApprovalEmail { dry_run }) => {
            let db = open_database(&config)?;
            let outbox = Arc::new(MemoryMailer::new());
            let mailer: Arc<dyn Mailer> = if dry_run {
                outbox.clone()
            } else {
                Arc::new(SmtpMailer::new(&config.email)?)
            };

            let sent = PendingApprovalNotifier::new(db, mailer, Arc::new(config))
                .run()
                .await?;

            for email in outbox.outbox() {
                println!("To: {}", email.to.join(", "));
                println!("Subject: {}", email.subject);
                println!();
                println!("{}", email.body);
            }
            println!("{} email(s) {}", sent, if dry_run { "prepared" } else { "sent" });
        }
        Some(Commands::RefreshFeeds) => {
            let db = open_database(&config)?;
            let report = FeedSyncer::new(db)?.sync_all().await?;
            println!(
                "{} feed(s) synced, {} failed, {} item(s) stored",
                report.synced, report.failed, report.items
            );
        }
        Some(Commands::SubscribeFeeds { hub }) => {
            let db = open_database(&config)?;
            let client = HubClient::new(config.push.clone(), config.site_url.clone());
            let mut failed = 0;

            for feed in db.get_active_approved_feeds()? {
                match client.subscribe(&db, &feed.feed_url, hub.as_deref()).await {
                    Ok(subscription) => {
                        println!("{} -> {}", feed.feed_url, client.callback_url(&subscription))
                    }
                    Err(e) => {
                        failed += 1;
                        tracing::warn!(feed = %feed.feed_url, error = %e, "Subscription failed");
                    }
                }
            }

            if failed > 0 {
                anyhow::bail!("{} subscription request(s) failed", failed);
            }
        }
        Some(Commands::CreateUser {
            username,
            email,
            password,
            group,
        }) => {
            let db = open_database(&config)?;
            let user = db.create_user(CreateUserInput {
                username,
                email,
                password,
            })?;
            if let Some(group) = group {
                db.add_user_to_group(&group, user.id)?;
                println!("Created {} in group {}", user.username, group);
            } else {
                println!("Created {}", user.username);
            }
        }
        None => serve(config, "127.0.0.1", 8000).await?,
    }

    Ok(())
}
