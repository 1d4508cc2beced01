use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine as _;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "presence", about = "Presence attendance CLI")]
struct Cli {
    /// User to act as (defaults to $USER).
    #[arg(short, long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check in for today with a captured face image
    CheckIn {
        /// Path to the captured image
        #[arg(short, long)]
        image: PathBuf,
        /// Device latitude
        #[arg(long)]
        latitude: f64,
        /// Device longitude
        #[arg(long)]
        longitude: f64,
    },
    /// Check out for today
    CheckOut {
        #[arg(short, long)]
        image: PathBuf,
        #[arg(long)]
        latitude: f64,
        #[arg(long)]
        longitude: f64,
    },
    /// Compare a captured image against the enrolled template
    Verify {
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Enroll (replace) the active face template
    Enroll {
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Show today's attendance record
    Today,
    /// Show attendance history
    History {
        /// Start date (YYYY-MM-DD)
        #[arg(long, default_value = "")]
        from: String,
        /// End date (YYYY-MM-DD)
        #[arg(long, default_value = "")]
        to: String,
    },
    /// Show daemon status
    Status,
}

// `#[zbus::proxy]` generates `PresenceProxy`, the async client used below.
#[zbus::proxy(
    interface = "org.freedesktop.Presence1",
    default_service = "org.freedesktop.Presence1",
    default_path = "/org/freedesktop/Presence1"
)]
trait Presence {
    async fn check_in(
        &self,
        user: &str,
        image: &str,
        latitude: f64,
        longitude: f64,
        device_info: &str,
    ) -> zbus::Result<String>;

    async fn check_out(
        &self,
        user: &str,
        image: &str,
        latitude: f64,
        longitude: f64,
        device_info: &str,
    ) -> zbus::Result<String>;

    async fn verify(&self, user: &str, image: &str) -> zbus::Result<String>;

    async fn enroll(&self, user: &str, image: &str) -> zbus::Result<String>;

    async fn today(&self, user: &str) -> zbus::Result<String>;

    async fn history(&self, user: &str, from: &str, to: &str) -> zbus::Result<String>;

    async fn status(&self) -> zbus::Result<String>;
}

fn load_image(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("cannot read image {}", path.display()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn device_info() -> String {
    format!("presence-cli/{}", env!("CARGO_PKG_VERSION"))
}

fn print_json(payload: &str) {
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{payload}"),
        },
        Err(_) => println!("{payload}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let user = cli
        .user
        .or_else(|| std::env::var("USER").ok())
        .context("no user given and $USER is unset")?;

    let conn = zbus::Connection::system()
        .await
        .context("cannot reach the system bus (is presenced running?)")?;
    let proxy = PresenceProxy::new(&conn).await?;

    let payload = match cli.command {
        Commands::CheckIn {
            image,
            latitude,
            longitude,
        } => {
            proxy
                .check_in(&user, &load_image(&image)?, latitude, longitude, &device_info())
                .await?
        }
        Commands::CheckOut {
            image,
            latitude,
            longitude,
        } => {
            proxy
                .check_out(&user, &load_image(&image)?, latitude, longitude, &device_info())
                .await?
        }
        Commands::Verify { image } => proxy.verify(&user, &load_image(&image)?).await?,
        Commands::Enroll { image } => proxy.enroll(&user, &load_image(&image)?).await?,
        Commands::Today => proxy.today(&user).await?,
        Commands::History { from, to } => proxy.history(&user, &from, &to).await?,
        Commands::Status => proxy.status().await?,
    };

    print_json(&payload);
    Ok(())
}
