/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dropit_core::config::DropConfig;
use dropit_core::room::RoomId;
use dropit_core::sender::OutgoingFile;
use dropit_core::session::{start_session, Role, SessionHandle};
use dropit_core::ui_events::{UiEvent, UiEventKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Dropit - direct browser-style file transfer between two peers.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// WebSocket URL of the room relay (overrides DROPIT_SIGNALING_URL).
    #[clap(long)]
    signaling_url: Option<String>,

    /// ICE server URL; repeat for several (overrides DROPIT_ICE_URLS).
    #[clap(long = "ice-url")]
    ice_urls: Vec<String>,

    /// Bytes per chunk frame.
    #[clap(long)]
    chunk_size: Option<usize>,

    /// Print UI events as JSON lines on stdout.
    #[clap(long)]
    json: bool,

    /// Verbosity level (-v, -vv).
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a new room and send files to whoever joins it.
    Send {
        #[clap(required = true)]
        files: Vec<PathBuf>,
    },
    /// Join a room and save the files it delivers.
    Receive {
        room: String,
        /// Directory for received files.
        #[clap(long, default_value = ".")]
        out: PathBuf,
    },
}

fn init_tracing(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn load_config(args: &Args) -> Result<DropConfig> {
    let mut cfg = DropConfig::from_env().context("read environment")?;
    if let Some(url) = &args.signaling_url {
        cfg.signaling_url = url.clone();
    }
    if !args.ice_urls.is_empty() {
        cfg.ice_urls = args.ice_urls.clone();
    }
    if let Some(n) = args.chunk_size {
        cfg.chunk_size = n;
    }
    cfg.validate().context("invalid configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;
    let cfg = load_config(&args)?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    match &args.command {
        Command::Send { files } => {
            let mut outgoing = Vec::with_capacity(files.len());
            for path in files {
                outgoing.push(OutgoingFile::from_path(path).await?);
            }
            let room = RoomId::generate();
            let handle = start_session(&cfg, Role::Sender, room.clone(), events_tx).await?;
            println!("room: {room}");
            handle.send_files(outgoing)?;
            drive(handle, events_rx, args.json, None).await
        }
        Command::Receive { room, out } => {
            let room: RoomId = room.parse().map_err(anyhow::Error::msg)?;
            tokio::fs::create_dir_all(out)
                .await
                .with_context(|| format!("create {}", out.display()))?;
            let handle = start_session(&cfg, Role::Receiver, room, events_tx).await?;
            drive(handle, events_rx, args.json, Some(out.clone())).await
        }
    }
}

/// Pumps UI events until the session closes. A sender closes once its queue
/// is done; a receiver saves every file into `out`.
async fn drive(
    handle: SessionHandle,
    mut events: mpsc::UnboundedReceiver<UiEvent>,
    json: bool,
    out: Option<PathBuf>,
) -> Result<()> {
    loop {
        let ev = tokio::select! {
            ev = events.recv() => ev,
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, closing session");
                handle.close();
                continue;
            }
        };
        let Some(ev) = ev else { break };
        if json {
            if let Ok(line) = serde_json::to_string(&ev) {
                println!("{line}");
            }
        }
        match ev.kind {
            UiEventKind::FileReceived { file } => {
                if let Some(dir) = &out {
                    match file.save_into(dir).await {
                        Ok(path) => info!(path = %path.display(), size = file.size, "saved"),
                        Err(e) => error!(name = %file.name, "save failed: {e}"),
                    }
                }
            }
            UiEventKind::QueueFinished { sent, failed } => {
                info!(sent, failed, "all files processed");
                if out.is_none() {
                    handle.close();
                }
            }
            UiEventKind::Closed => break,
            _ => {}
        }
    }
    let metrics = handle.metrics();
    info!(
        files_sent = metrics.files_sent,
        files_received = metrics.files_received,
        bytes_out = metrics.channel_tx_bytes,
        bytes_in = metrics.channel_rx_bytes,
        "done"
    );
    handle.wait().await
}
