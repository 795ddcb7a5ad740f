use std::{error::Error, path::PathBuf, process, sync::Arc};

use clap::{builder::FalseyValueParser, command, Parser, Subcommand, ValueHint};
use log::{debug, error, info, warn, LevelFilter};

use audictl::{
    config::{self, Config},
    provider::{Resolver, Spotify, YouTube},
    remote::{self, Request},
    session::Orchestrator,
    shell::Shell,
    signal,
    track::Quality,
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
    #[command(subcommand)]
    command: Command,

    /// Configuration file
    ///
    /// [default: audictl/config.toml in the user configuration directory]
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Daemon socket
    ///
    /// [default: $XDG_RUNTIME_DIR/audictl.sock]
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath, env = "AUDICTL_SOCKET")]
    socket: Option<PathBuf>,

    /// Media player binary
    #[arg(long, value_name = "FILE", value_hint = ValueHint::ExecutablePath, env = "AUDICTL_PLAYER")]
    player: Option<PathBuf>,

    /// Audio output device, passed to the player unmodified
    #[arg(short, long, env = "AUDICTL_DEVICE")]
    device: Option<String>,

    /// Resample output to 48 kHz
    ///
    /// `--resample=0` turns it off when the configuration file enables it.
    #[arg(
        long,
        value_name = "BOOL",
        env = "AUDICTL_RESAMPLE",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "1",
        value_parser = FalseyValueParser::new(),
    )]
    resample: Option<bool>,

    /// Stream selection: `any` or `lossless-first`
    #[arg(long, value_name = "QUALITY")]
    quality: Option<Quality>,

    /// Seconds to wait for the player to exit when stopping
    #[arg(long, value_name = "SECONDS")]
    stop_timeout: Option<u64>,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Run the player daemon in the foreground
    Daemon,

    /// Play a search query or link
    ///
    /// Queues on the daemon when it is running, and plays directly otherwise.
    Play {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },

    /// Add a search query or link to the queue without starting playback
    Enqueue {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },

    /// List the queue
    Queue,

    /// Empty the queue
    Clear,

    /// Play queue entry INDEX now
    Skip { index: usize },

    /// Remove queue entry INDEX
    Remove { index: usize },

    /// Stop playback
    Stop,

    /// Skip to the next track
    Next,

    /// Show the current track and the queue
    Status,

    /// Pause the current track
    Pause,

    /// Resume the current track
    Resume,

    /// Seek the current track by SECONDS, backward when negative
    Seek {
        #[arg(allow_negative_numbers = true)]
        seconds: f64,
    },

    /// Start an interactive shell
    Shell,

    /// Search without playing
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Maximum number of results
        #[arg(short, long, default_value_t = YouTube::DEFAULT_LIMIT)]
        limit: usize,
    },
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
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Builds the configuration from defaults, the configuration file and the
/// command line, in increasing order of precedence.
fn load_config(args: &Args) -> Result<Config, Box<dyn Error>> {
    let mut config = Config::new();

    let path = args.config.clone().or_else(config::File::default_path);
    if let Some(path) = path {
        debug!("loading configuration from {}", path.display());
        config.merge(config::File::load(&path)?);
    }

    apply_args(&mut config, args);
    Ok(config)
}

/// Overrides `config` with whatever was given on the command line or in the
/// environment.
fn apply_args(config: &mut Config, args: &Args) {
    if let Some(socket) = &args.socket {
        config.socket_path.clone_from(socket);
    }
    if let Some(player) = &args.player {
        config.player.clone_from(player);
    }
    if args.device.is_some() {
        config.device.clone_from(&args.device);
    }
    if let Some(resample) = args.resample {
        config.resample = resample;
    }
    if let Some(quality) = args.quality {
        config.quality = quality;
    }
    if let Some(secs) = args.stop_timeout {
        config.stop_timeout = std::time::Duration::from_secs(secs);
    }
}

/// Playback goes through YouTube; Spotify links are looked up for their
/// metadata and played from YouTube.
fn resolver(config: &Config) -> Result<Resolver, Box<dyn Error>> {
    Ok(Resolver::new(config.quality)
        .with_provider(YouTube::new())
        .with_provider(Spotify::new(config)?))
}

/// Sends `request` to the daemon and prints the response.
async fn rpc(config: &Config, request: Request) -> Result<(), Box<dyn Error>> {
    let response = remote::send(&config.socket_path, &request)
        .await
        .map_err(|e| {
            format!(
                "cannot reach daemon at {}: {e}",
                config.socket_path.display()
            )
        })?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if response.ok {
        Ok(())
    } else {
        Err(format!("{} failed", request.cmd).into())
    }
}

/// Runs the orchestrator and the remote control server until signalled.
async fn daemon(config: &Config) -> Result<(), Box<dyn Error>> {
    let orchestrator = Orchestrator::new(
        resolver(config)?,
        Arc::new(config.mpv()),
        config.stop_timeout,
    );
    let server = remote::Server::bind(&config.socket_path, orchestrator.clone())?;
    let mut signals = signal::Handler::new()?;

    tokio::select! {
        result = server.serve() => {
            orchestrator.kill();
            result?;
        }

        signal = signals.recv() => {
            info!("received {signal}, shutting down gracefully");

            // A second signal forces the player down.
            tokio::select! {
                () = orchestrator.shutdown() => {}
                signal = signals.recv() => {
                    warn!("received {signal}, killing player");
                    orchestrator.kill();
                }
            }
        }
    }

    Ok(())
}

/// Plays `query` without a daemon, one track after another.
async fn play_once(config: &Config, query: &str) -> Result<(), Box<dyn Error>> {
    let resolver = resolver(config)?;
    let mpv = config.mpv();

    for track in resolver.resolve(query).await? {
        let stream = resolver.resolve_stream(&track).await?;
        info!("playing {track}");

        let output = mpv.run_capture(&stream.url).await?;
        if !output.trim().is_empty() {
            debug!("{}", output.trim_end());
        }
    }

    Ok(())
}

/// Main application entry.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args)?;

    match args.command {
        Command::Daemon => daemon(&config).await,
        Command::Play { query } => {
            let query = query.join(" ");
            if config.socket_path.exists() {
                rpc(&config, Request::new("play").with_arg("query", query)).await
            } else {
                info!("no daemon running, playing directly");
                play_once(&config, &query).await
            }
        }
        Command::Enqueue { query } => {
            let request = Request::new("queue.add").with_arg("query", query.join(" "));
            rpc(&config, request).await
        }
        Command::Queue => rpc(&config, Request::new("queue.list")).await,
        Command::Clear => rpc(&config, Request::new("queue.clear")).await,
        Command::Skip { index } => {
            rpc(&config, Request::new("queue.skip").with_arg("index", index)).await
        }
        Command::Remove { index } => {
            rpc(&config, Request::new("queue.remove").with_arg("index", index)).await
        }
        Command::Stop => rpc(&config, Request::new("stop")).await,
        Command::Next => rpc(&config, Request::new("next")).await,
        Command::Status => rpc(&config, Request::new("status")).await,
        Command::Pause => rpc(&config, Request::new("pause")).await,
        Command::Resume => rpc(&config, Request::new("resume")).await,
        Command::Seek { seconds } => {
            rpc(&config, Request::new("seek").with_arg("seconds", seconds)).await
        }
        Command::Shell => {
            let mut shell = Shell::new(config.clone(), resolver(&config)?);
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            shell.run(stdin, tokio::io::stdout()).await?;
            Ok(())
        }
        Command::Search { query, limit } => {
            let tracks = resolver(&config)?.search(&query.join(" "), limit).await?;
            println!("{}", serde_json::to_string_pretty(&tracks)?);
            Ok(())
        }
    }
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and runs the requested command.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    if matches!(args.command, Command::Daemon) {
        info!("starting {name}/{version}; {BUILD_PROFILE}");
    } else {
        debug!("starting {name}/{version}; {BUILD_PROFILE}");
    }

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_accepts_numeric_values() {
        let parse = |args: &[&str]| Args::try_parse_from(args).unwrap().resample;

        // The only test touching the environment.
        std::env::remove_var("AUDICTL_RESAMPLE");
        assert_eq!(parse(&["audictl", "status"]), None);
        assert_eq!(parse(&["audictl", "--resample", "status"]), Some(true));
        assert_eq!(parse(&["audictl", "--resample=0", "status"]), Some(false));
        assert_eq!(parse(&["audictl", "--resample=1", "status"]), Some(true));

        std::env::set_var("AUDICTL_RESAMPLE", "1");
        assert_eq!(parse(&["audictl", "status"]), Some(true));
        std::env::set_var("AUDICTL_RESAMPLE", "0");
        assert_eq!(parse(&["audictl", "status"]), Some(false));
        std::env::remove_var("AUDICTL_RESAMPLE");
    }

    #[test]
    fn command_line_overrides_file() {
        let mut config = Config::new();
        config.merge(config::File {
            resample: Some(true),
            device: Some("hw:0".to_owned()),
            ..config::File::default()
        });

        let args = Args::try_parse_from(["audictl", "--resample=0", "-d", "hw:1", "status"]).unwrap();
        apply_args(&mut config, &args);
        assert!(!config.resample);
        assert_eq!(config.device.as_deref(), Some("hw:1"));
    }

    #[test]
    fn seek_accepts_negative_offsets() {
        let args = Args::try_parse_from(["audictl", "seek", "-10"]).unwrap();
        assert!(matches!(args.command, Command::Seek { seconds } if seconds == -10.0));
    }
}
