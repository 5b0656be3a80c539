use std::{
    error::Error,
    io,
    path::{Path, PathBuf},
    process,
    sync::Arc,
};

use clap::{command, Parser, Subcommand, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use url::Url;

use cadenza::{
    api::ApiClient,
    auth::{Authenticator, EXPIRY_MARGIN},
    config::Config,
    duration,
    events::Event,
    http::{self, Transport},
    library::{Library, Selection},
    protocol::catalog::TrackList,
    store::FileStore,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value = "cadenza.toml")]
    config: PathBuf,

    /// Session file
    ///
    /// Holds the access and refresh tokens. Keep this file private: anyone
    /// who can read it can access your account until you log out.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, env = "CADENZA_SESSION_FILE", default_value = "session.toml")]
    session_file: PathBuf,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// Log in through the browser
    Login,
    /// Remove the stored tokens
    Logout,
    /// Show whether you are logged in
    Status,
    /// Renew the access token now
    Refresh,
    /// Print a valid access token, renewing it when it is about to expire
    Token,
    /// List your playlists
    Playlists,
    /// List your saved albums
    Albums,
    /// List your playlists and saved albums
    Library,
    /// Show a playlist and its tracks
    Playlist {
        /// Playlist id
        id: String,
    },
    /// Show an album and its tracks
    Album {
        /// Album id
        id: String,
    },
    /// Show your profile
    Me,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(args: &Args) {
    let mut logger = env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if args.quiet || args.verbose > 0 {
        let level = match args.verbose {
            // Quiet and verbose are mutually exclusive.
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module("cadenza", level);
    }

    logger.init();
}

/// Loads the configuration, pointing at the example on a missing file.
fn load_config(path: &Path) -> cadenza::error::Result<Config> {
    let config = Config::from_file(path);

    if let Err(ref e) = config {
        if e
            .downcast::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
        {
            info!(
                "copy cadenza.toml.example to {} and set your client id",
                path.display()
            );
        }
    }

    config
}

/// Sends the user to the authorization page and completes the login with
/// the redirect URL they paste back.
async fn login(auth: &Authenticator) -> Result<(), Box<dyn Error>> {
    let url = auth.begin_login()?;

    if let Err(e) = open::that(url.as_str()) {
        warn!("could not open a browser: {e}");
    }
    println!("Authorize cadenza in your browser:\n\n    {url}\n");
    println!("Then paste the address you were redirected to:");

    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        io::stdin().read_line(&mut line).map(|_| line)
    })
    .await??;

    let callback = Url::parse(line.trim())?;
    let credential = auth.complete_login_from_callback(&callback).await?;
    info!(
        "logged in; access token valid for {} minutes",
        credential.time_to_live().as_secs() / 60
    );

    Ok(())
}

fn print_tracks(tracks: &TrackList) {
    for (number, track) in tracks.items.iter().enumerate() {
        println!(
            "{:>4}. {} - {} [{}]",
            number + 1,
            track.artist_names(),
            track.name,
            duration::format_track_duration(track.duration_ms)
        );
    }

    let total = duration::total_duration_ms(&tracks.items);
    println!(
        "\n{} of {} tracks, {}",
        tracks.items.len(),
        tracks.total,
        duration::format_collection_duration(total)
    );
}

/// Runs one command.
///
/// # Errors
///
/// This function returns an error when the configuration or session file
/// cannot be loaded, or when the command itself fails.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args.config)?;
    let store = Arc::new(FileStore::open(&args.session_file)?);
    let transport: Arc<dyn Transport> = Arc::new(http::Client::new(&config)?);
    let auth = Arc::new(Authenticator::new(&config, transport.clone(), store));

    let mut events = auth.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if event == Event::LoggedOut {
                info!("session ended; run `cadenza login` to log in again");
            }
        }
    });

    let library = Library::new(ApiClient::new(&config, transport, auth.clone()));

    match args.command {
        Command::Login => login(&auth).await?,
        Command::Logout => auth.logout()?,

        Command::Status => {
            println!("{}", auth.state());
            if let Some(credential) = auth.credential()? {
                if credential.is_expired() {
                    println!("access token expired");
                } else if credential.expires_within(EXPIRY_MARGIN) {
                    println!("access token expires soon; it is renewed on next use");
                } else {
                    println!(
                        "access token valid for {} minutes",
                        credential.time_to_live().as_secs() / 60
                    );
                }
            }
        }

        Command::Refresh => {
            auth.refresh().await?;
            info!("access token refreshed");
        }

        Command::Token => println!("{}", auth.valid_access_token().await?),

        Command::Playlists => {
            for playlist in library.api().user_playlists().await? {
                println!(
                    "{}\t{} ({} tracks)",
                    playlist.id, playlist.name, playlist.tracks.total
                );
            }
        }

        Command::Albums => {
            for saved in library.api().user_saved_albums().await? {
                println!("{}\t{}", saved.album.id, saved.album.name);
            }
        }

        Command::Library => {
            let landing = library.load_landing().await?;
            if landing.is_degraded() {
                warn!("library is incomplete");
            }

            println!("Playlists");
            for playlist in &landing.value.playlists {
                println!("  {}\t{}", playlist.id, playlist.name);
            }
            println!("\nAlbums");
            for saved in &landing.value.albums {
                println!("  {}\t{}", saved.album.id, saved.album.name);
            }
        }

        Command::Playlist { id } => {
            if let Selection::Current(loaded) = library.select_playlist(&id).await? {
                let playlist = loaded.value;
                let owner = playlist
                    .owner
                    .display_name
                    .as_deref()
                    .unwrap_or(&playlist.owner.id);
                println!("{} by {owner}\n", playlist.name);
                print_tracks(&playlist.tracks);
            }
        }

        Command::Album { id } => {
            if let Selection::Current(loaded) = library.select_album(&id).await? {
                let album = loaded.value;
                let artists: Vec<_> = album.artists.iter().map(|a| a.name.as_str()).collect();
                println!("{} by {}\n", album.name, artists.join(", "));
                print_tracks(&album.tracks);
            }
        }

        Command::Me => {
            let me = library.api().current_user().await?;
            println!("{}", me.display_name.as_deref().unwrap_or(&me.id));
            if let Some(email) = me.email {
                println!("{email}");
            }
        }
    }

    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and runs the command until it completes or is interrupted.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    debug!("starting {name}/{version}; {BUILD_PROFILE}");

    tokio::select! {
        biased;

        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            process::exit(130);
        }

        result = run(args) => {
            if let Err(e) = result {
                error!("{e}");
                if e
                    .downcast_ref::<cadenza::error::Error>()
                    .is_some_and(|e| e.kind.is_credential())
                {
                    info!("run `cadenza login` to log in");
                }
                process::exit(1);
            }
        }
    }
}
