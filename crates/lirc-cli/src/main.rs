//! lircctl: command-line client for the LIRC daemon
//!
//! Queries lircd for its version and configured remotes, transmits button
//! presses and prints the presses lircd decodes.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use lirc_client::{
    ClientConfig, DEFAULT_SOCKET_PATH, DecodedButton, Endpoint, EventReceiver, LircClient,
    LircEvent,
};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// LIRC daemon client
#[derive(Parser, Debug)]
#[command(name = "lircctl")]
#[command(about = "Talk to the LIRC daemon - query remotes, send and receive IR buttons")]
#[command(version)]
#[command(after_help = "\
Examples:
  lircctl version                          Show lircd version
  lircctl list                             List configured remotes
  lircctl list Samsung                     List the buttons of a remote
  lircctl send-once Samsung KEY_POWER      Transmit a button once
  lircctl send-once Samsung KEY_UP -r 3    Transmit a button with 3 repeats
  lircctl send-start Samsung KEY_VOLUMEUP  Start repeating a button
  lircctl send-stop Samsung KEY_VOLUMEUP   Stop repeating it
  lircctl listen                           Print received button presses
  lircctl -e 192.168.1.220 listen          Same, over TCP (port 8765)
")]
struct Cli {
    /// lircd endpoint: a socket path, or host[:port] for TCP
    #[arg(
        long,
        short,
        env = "LIRC_ENDPOINT",
        value_name = "ENDPOINT",
        default_value = DEFAULT_SOCKET_PATH
    )]
    endpoint: Endpoint,

    /// Time to wait for a response from lircd
    #[arg(long, value_name = "MS", default_value_t = 10_000)]
    timeout_ms: u64,

    /// Print results and events as JSON, one value per line
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Show the lircd version
    Version,

    /// List remotes, or the buttons of one remote
    List {
        /// Remote control to list the buttons of
        remote: Option<String>,
    },

    /// Transmit a button once
    #[command(name = "send-once")]
    SendOnce {
        remote: String,
        button: String,
        /// Number of extra repeats
        #[arg(long, short, default_value_t = 0)]
        repeats: u32,
    },

    /// Start transmitting a button repeatedly
    #[command(name = "send-start")]
    SendStart { remote: String, button: String },

    /// Stop a transmission started with send-start
    #[command(name = "send-stop")]
    SendStop { remote: String, button: String },

    /// Print button presses and reloads until interrupted
    Listen,
}

/// Event as printed with `--json`
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum EventRecord<'a> {
    ButtonReceived {
        #[serde(flatten)]
        press: &'a DecodedButton,
    },
    DaemonReloaded,
    Disconnected {
        reason: String,
    },
}

impl<'a> From<&'a LircEvent> for EventRecord<'a> {
    fn from(event: &'a LircEvent) -> Self {
        match event {
            LircEvent::ButtonReceived(press) => EventRecord::ButtonReceived { press },
            LircEvent::DaemonReloaded => EventRecord::DaemonReloaded,
            LircEvent::Disconnected(reason) => EventRecord::Disconnected {
                reason: reason.to_string(),
            },
        }
    }
}

/// Log to stderr so stdout stays clean for results.
/// Defaults to debug in debug builds and info otherwise; `RUST_LOG` overrides.
fn setup_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lirc={default_level}")));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging();
    tracing::debug!("Running {:?} against {}", cli.command, cli.endpoint);

    let config =
        ClientConfig::default().with_response_timeout(Duration::from_millis(cli.timeout_ms));

    let (client, events) = LircClient::connect_to(&cli.endpoint, config)
        .await
        .with_context(|| format!("Failed to connect to lircd at {}. Is it running?", cli.endpoint))?;

    let result = run(&client, events, cli.command, cli.json).await;
    client.dispose().await;
    result
}

async fn run(
    client: &LircClient,
    events: EventReceiver,
    command: Commands,
    json: bool,
) -> Result<()> {
    match command {
        Commands::Version => run_version(client, json).await,
        Commands::List { remote: None } => run_list_remotes(client, json).await,
        Commands::List {
            remote: Some(remote),
        } => run_list_keys(client, &remote, json).await,
        Commands::SendOnce {
            remote,
            button,
            repeats,
        } => client
            .send_once(&remote, &button, repeats)
            .await
            .with_context(|| format!("Failed to send {button} on {remote}")),
        Commands::SendStart { remote, button } => client
            .send_start(&remote, &button)
            .await
            .with_context(|| format!("Failed to start sending {button} on {remote}")),
        Commands::SendStop { remote, button } => client
            .send_stop(&remote, &button)
            .await
            .with_context(|| format!("Failed to stop sending {button} on {remote}")),
        Commands::Listen => run_listen(events, json).await,
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

async fn run_version(client: &LircClient, json: bool) -> Result<()> {
    let version = client
        .get_version()
        .await
        .context("Version request failed")?;

    if json {
        print_json(&serde_json::json!({ "version": version }))
    } else {
        println!("lircd {version}");
        Ok(())
    }
}

async fn run_list_remotes(client: &LircClient, json: bool) -> Result<()> {
    let remotes = client
        .list_remote_controls()
        .await
        .context("Failed to list remotes")?;

    if json {
        return print_json(&remotes);
    }

    if remotes.is_empty() {
        println!("No remotes configured");
    }
    for remote in &remotes {
        println!("{remote}");
    }
    Ok(())
}

async fn run_list_keys(client: &LircClient, remote: &str, json: bool) -> Result<()> {
    let keys = client
        .list_remote_control_keys(remote)
        .await
        .with_context(|| format!("Failed to list buttons of {remote}"))?;

    if json {
        return print_json(&keys);
    }

    for key in &keys {
        println!("{:<24} {}", key.button, hex::encode(&key.code));
    }
    Ok(())
}

fn describe(event: &LircEvent) -> String {
    match event {
        LircEvent::ButtonReceived(press) => format!(
            "{} {} (repeat {}, code {})",
            press.button.remote_control,
            press.button.button,
            press.repeat,
            hex::encode(&press.button.code)
        ),
        LircEvent::DaemonReloaded => "lircd reloaded its configuration".to_string(),
        LircEvent::Disconnected(reason) => format!("disconnected: {reason}"),
    }
}

async fn run_listen(mut events: EventReceiver, json: bool) -> Result<()> {
    eprintln!("Listening for button presses, Ctrl-C to stop");

    loop {
        let event = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                return Ok(());
            }
            event = events.recv() => event,
        };

        let Some(event) = event else {
            return Ok(());
        };

        if json {
            print_json(&EventRecord::from(&event))?;
        } else {
            println!("{}", describe(&event));
        }

        if let LircEvent::Disconnected(reason) = event {
            tracing::debug!("Event stream ended with {:?}", reason);
            bail!("Lost connection to lircd: {reason}");
        }
    }
}
