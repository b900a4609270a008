//! Yomu CLI - browse and read from a self-hosted manga library server.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use yomu::cache::{ImageCache, ReadingMode};
use yomu::console::Console;
use yomu::credentials::{
    CredentialStore, CredentialStoreExt, FileCredentialStore, KEY_API_KEY, KEY_BASE_URL,
    parse_opds_url,
};
use yomu::gateway::{Gateway, Platform};
use yomu::images::DirectUrlStrategy;
use yomu::reader::{ReaderSession, ReaderState};
use yomu::error::Result;
use yomu::{LibraryClient, ReaderApi};

/// Manga library client.
#[derive(Parser, Debug)]
#[command(name = "yomu")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to a server using its OPDS bootstrap URL.
    Connect {
        /// OPDS URL of the form https://host/api/opds/{apiKey}.
        opds_url: String,
    },

    /// List series in the library, or search for a term.
    Series {
        /// Search term; lists everything when omitted.
        #[arg(long)]
        search: Option<String>,
    },

    /// List volumes and chapters of a series.
    Chapters {
        /// Series ID as shown by `series`.
        series_id: u32,
    },

    /// Open a chapter and resolve its current page image.
    Read {
        /// Chapter ID as shown by `chapters`.
        chapter_id: u32,

        /// Jump to a 1-based page instead of resuming stored progress.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        page: Option<u32>,

        /// Use continuous vertical scrolling preload behavior.
        #[arg(long)]
        vertical: bool,
    },

    /// Forget the stored server connection.
    Logout,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let console = Console::new();

    match run(args, &console).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            console.error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, console: &Console) -> Result<()> {
    let store: Arc<FileCredentialStore> =
        Arc::new(FileCredentialStore::open().context("Failed to open credential store")?);

    match args.command {
        Command::Connect { opds_url } => connect(console, store, &opds_url).await,
        Command::Series { search } => list_series(console, store, search).await,
        Command::Chapters { series_id } => list_chapters(console, store, series_id).await,
        Command::Read {
            chapter_id,
            page,
            vertical,
        } => read_chapter(console, store, chapter_id, page, vertical).await,
        Command::Logout => logout(console, store),
    }
}

/// Builds a native-platform client over the stored credentials.
fn client_for(store: Arc<FileCredentialStore>) -> LibraryClient {
    let gateway = Arc::new(Gateway::new(Platform::Native, store.clone()));
    LibraryClient::new(gateway, store)
}

async fn connect(console: &Console, store: Arc<FileCredentialStore>, opds_url: &str) -> Result<()> {
    console.step("Parsing OPDS URL...");
    let (base_url, api_key) = parse_opds_url(opds_url).context("Invalid OPDS URL")?;

    store.set(KEY_BASE_URL, &base_url)?;
    store.set(KEY_API_KEY, &api_key)?;
    console.info(&format!("Server: {}", base_url));

    console.step("Authenticating...");
    let client = client_for(store);
    let auth = client
        .authenticate()
        .await
        .context("Plugin authentication failed")?;

    match auth.username {
        Some(username) => console.success(&format!("Connected as {}", username)),
        None => console.success("Connected"),
    }
    Ok(())
}

async fn list_series(
    console: &Console,
    store: Arc<FileCredentialStore>,
    search: Option<String>,
) -> Result<()> {
    let client = client_for(store);

    let series = match search {
        Some(term) => {
            console.step(&format!("Searching for \"{}\"...", term));
            client.search(&term).await?
        }
        None => {
            console.step("Fetching series...");
            client.list_series().await?
        }
    };

    if series.is_empty() {
        console.warning("No series found");
        return Ok(());
    }

    console.success(&format!("Found {} series", console.count(series.len())));
    for entry in &series {
        println!(
            "  {:>5}  {}  {}",
            entry.id,
            entry.name,
            console.muted(&format!("({}/{} pages read)", entry.pages_read, entry.pages))
        );
    }
    Ok(())
}

async fn list_chapters(
    console: &Console,
    store: Arc<FileCredentialStore>,
    series_id: u32,
) -> Result<()> {
    let client = client_for(store);

    console.step("Fetching volumes...");
    let series = client.series(series_id).await?;
    let volumes = client.volumes(series_id).await?;

    console.section(&series.name);
    for volume in &volumes {
        println!("{}", volume.name);
        for chapter in &volume.chapters {
            println!(
                "  {:>5}  {}  {}",
                chapter.id,
                chapter.title,
                console.muted(&format!("{} pages", chapter.pages))
            );
        }
    }
    Ok(())
}

async fn read_chapter(
    console: &Console,
    store: Arc<FileCredentialStore>,
    chapter_id: u32,
    page: Option<u32>,
    vertical: bool,
) -> Result<()> {
    let client = client_for(store.clone());
    let strategy = Arc::new(DirectUrlStrategy::new(store));
    let cache = Arc::new(ImageCache::new(strategy));

    let mode = if vertical {
        ReadingMode::Vertical
    } else {
        ReadingMode::Paged
    };

    let api: Arc<dyn ReaderApi> = Arc::new(client);
    let mut session = ReaderSession::new(api, cache, chapter_id, mode);

    console.step("Opening chapter...");
    session.open().await;

    match session.state() {
        ReaderState::Ready => {}
        ReaderState::Error(message) => anyhow::bail!("Failed to open chapter: {}", message),
        state => anyhow::bail!("Unexpected reader state: {:?}", state),
    }

    if let Some(page) = page {
        session.go_to_page(page as usize - 1);
    }

    console.success(&format!(
        "Chapter open: page {}/{}",
        session.current_page_number(),
        session.total_pages()
    ));

    match session.current_image().await {
        Some(image) => console.info(&format!("Image URL: {}", image.uri)),
        None => console.warning("Current page image unavailable"),
    }

    session.close();
    Ok(())
}

fn logout(console: &Console, store: Arc<FileCredentialStore>) -> Result<()> {
    store.clear_all().context("Failed to clear credentials")?;
    console.success("Logged out; stored credentials removed");
    Ok(())
}
