use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use site_mirror::common::CancelToken;
use site_mirror::mirror::{mirror, ItemState, MirrorReport, MirrorRequest};
use site_mirror::page::SiteProfile;
use site_mirror::session::{Credentials, HttpSession, Session};
use site_mirror::status::log_status;
use site_mirror::tree::{self, DownloadOptions, Folder};
use site_mirror::{api, State};

#[derive(Parser)]
#[command(name = "site_mirror")]
#[command(about = "Mirror sites behind a login into browsable local copies")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SiteArgs {
    /// Site profile (JSON)
    #[arg(short, long)]
    profile: Option<PathBuf>,

    /// Base URL for a generic profile when no profile file is given
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long, env = "MIRROR_USER")]
    user: Option<String>,

    #[arg(long, env = "MIRROR_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Cookie header of an already logged in browser session
    #[arg(long, env = "MIRROR_COOKIE", hide_env_values = true)]
    cookie: Option<String>,
}

impl SiteArgs {
    fn profile(&self) -> anyhow::Result<SiteProfile> {
        match (&self.profile, &self.base_url) {
            (Some(path), _) => Ok(SiteProfile::load(path)?),
            (None, Some(base_url)) => {
                let profile = SiteProfile::generic(base_url);
                profile.validate()?;
                Ok(profile)
            }
            (None, None) => anyhow::bail!("either --profile or --base-url is required"),
        }
    }

    fn credentials(&self) -> Credentials {
        if let Some(cookie) = &self.cookie {
            return Credentials::Cookie(cookie.clone());
        }
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Credentials::Password {
                user: user.clone(),
                password: password.clone(),
            },
            _ => Credentials::None,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror a site into a directory
    Mirror {
        #[command(flatten)]
        site: SiteArgs,
        /// Target directory
        #[arg(short, long)]
        target: PathBuf,
        /// Entry page relative to the base URL
        #[arg(long)]
        root: Option<String>,
        /// Start from these sub-sections instead of the entry page
        #[arg(long)]
        seed: Vec<String>,
        /// Only follow pages and documents whose URL matches this pattern
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        max_items: Option<usize>,
    },

    /// Browse a document library into a tree file
    Browse {
        #[command(flatten)]
        site: SiteArgs,
        /// Listing of the top folder
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "root")]
        name: String,
        /// Where to write the tree
        #[arg(short, long, default_value = "tree.json")]
        out: PathBuf,
    },

    /// Download every file of a tree file
    Download {
        #[command(flatten)]
        site: SiteArgs,
        #[arg(long, default_value = "tree.json")]
        tree: PathBuf,
        #[arg(short, long)]
        target: PathBuf,
        /// Replace files that exist already
        #[arg(long)]
        overwrite: bool,
        /// Extensions to skip, e.g. mp4,iso
        #[arg(long, value_delimiter = ',')]
        ignore_ext: Vec<String>,
        /// Directory an external agent delivers triggered downloads to
        #[arg(long)]
        landing: Option<PathBuf>,
        /// Seconds to wait for a triggered download
        #[arg(long, default_value = "30")]
        wait_secs: u64,
    },

    /// Serve the mirror job API
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: String,
    },
}

fn print_report(report: &MirrorReport) {
    for outcome in report.outcomes.iter().filter(|x| x.state == ItemState::Failed) {
        println!(
            "failed: {} ({})",
            outcome.url,
            outcome.reason.as_deref().unwrap_or("unknown")
        );
    }
    println!(
        "{} saved, {} skipped, {} failed",
        report.count(ItemState::Saved),
        report.count(ItemState::Skipped),
        report.count(ItemState::Failed)
    );
}

async fn login(site: &SiteArgs, profile: &SiteProfile, cancel: &CancelToken) -> anyhow::Result<HttpSession> {
    let session = HttpSession::new(profile, cancel.clone())?;
    session
        .authenticate(&site.credentials())
        .await
        .context("login failed")?;
    Ok(session)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cancel = CancelToken::new();

    match cli.command {
        Commands::Mirror {
            site,
            target,
            root,
            seed,
            filter,
            max_items,
        } => {
            let profile = site.profile()?;
            let session = HttpSession::new(&profile, cancel.clone())?;
            let request = MirrorRequest {
                target,
                credentials: site.credentials(),
                root,
                seeds: seed,
                filter,
                max_items,
            };
            let report = mirror(&session, &profile, &request, log_status(), cancel).await?;
            print_report(&report);
        }
        Commands::Browse { site, url, name, out } => {
            let profile = site.profile()?;
            let session = login(&site, &profile, &cancel).await?;
            let root = tree::browse(&session, &profile, &name, &url, log_status()).await?;
            root.save(&out).await?;
            println!("{} files in {}", root.file_count(), out.display());
        }
        Commands::Download {
            site,
            tree: tree_file,
            target,
            overwrite,
            ignore_ext,
            landing,
            wait_secs,
        } => {
            let profile = site.profile()?;
            let root = Folder::load(&tree_file).await?;
            let session = login(&site, &profile, &cancel).await?;
            let options = DownloadOptions {
                overwrite,
                ignore_extensions: ignore_ext,
                landing,
                wait: Duration::from_secs(wait_secs),
            };
            let report = tree::download(&session, &root, &target, &options, log_status(), cancel).await?;
            print_report(&report);
        }
        Commands::Serve { listen } => {
            let app = api::app(State::new());
            tracing::info!("listening on {}", listen);
            app.listen(listen).await?;
        }
    }
    Ok(())
}

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose {
        "site_mirror=debug"
    } else {
        "site_mirror=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    run(cli).await
}
