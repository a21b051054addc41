#![deny(dead_code)] // DO NOT REMOVE THIS EVER
use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use chrono::Local;
use log::{debug, info, LevelFilter};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use chatterbox_core::{
    ChannelNotifier, ChatConfig, ChatController, ChatNotice, ConnectionState, DeliveryStatus,
    Direction, LocalHub, LogNotifier, Message, MessageId, SqliteMessageStore,
};

/// Command line arguments for Chatterbox
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Chatterbox: a minimal pub/sub chat with local message history.",
    long_about = "Chatterbox runs a chat screen and a built-in peer over an in-process realtime hub.\n\n\
    Type a line to send it. Commands:\n\
    /peer <text>   Make the peer send <text>\n\
    /offline       Drop our connection (Disconnected)\n\
    /suspend       Suspend our connection\n\
    /online        Reconnect\n\
    /history       Print every stored message\n\
    /quit          Leave"
)]
struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Message database, overrides the config
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Where log output goes
    #[arg(long, value_name = "PATH", default_value = "chatterbox.log")]
    log_file: PathBuf,

    /// Write the effective config back to disk
    #[arg(long)]
    save_config: bool,
}

/// One line of user input
#[derive(Debug, PartialEq)]
enum Command<'a> {
    Send(&'a str),
    PeerSend(&'a str),
    Connection(ConnectionState),
    History,
    Quit,
    Unknown(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    let trimmed = line.trim();
    if !trimmed.starts_with('/') {
        return Command::Send(line);
    }

    let (name, rest) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
    match name {
        "/peer" => Command::PeerSend(rest),
        "/offline" => Command::Connection(ConnectionState::Disconnected),
        "/suspend" => Command::Connection(ConnectionState::Suspended),
        "/online" => Command::Connection(ConnectionState::Connected),
        "/history" => Command::History,
        "/quit" | "/exit" => Command::Quit,
        _ => Command::Unknown(name),
    }
}

/// Log to `log_file` only, stdout belongs to the chat. `RUST_LOG` overrides `level`.
fn setup_logging(log_file: &Path, level: LevelFilter) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(log_file)?;
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Pipe(Box::new(file)))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} [{}:{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .try_init()?;

    info!("Logging initialized at level: {}", level);
    info!("App version: {} ({})", env!("CARGO_PKG_VERSION"), env!("CARGO_PKG_NAME"));
    Ok(())
}

fn format_message(message: &Message) -> String {
    match message.direction {
        Direction::Received => format!("[{}] peer: {}", message.id, message.text),
        Direction::Sent => {
            let status = match message.status {
                DeliveryStatus::Pending => "sending...",
                DeliveryStatus::Sent => "sent",
                DeliveryStatus::Failed => "FAILED",
                DeliveryStatus::Received => "received",
            };
            format!("[{}] me: {} ({})", message.id, message.text, status)
        }
    }
}

/// Print the entries of a snapshot that are new or changed since the last one
fn render_changes(rendered: &mut HashMap<MessageId, DeliveryStatus>, snapshot: &[Message]) {
    for message in snapshot {
        if rendered.get(&message.id) != Some(&message.status) {
            rendered.insert(message.id, message.status);
            println!("{}", format_message(message));
        }
    }
}

fn print_notice(notice: &ChatNotice) {
    match notice {
        ChatNotice::Warning(text) => println!("! {}", text),
        ChatNotice::SendFailed { id, reason } => println!("! message {} not sent: {}", id, reason),
        ChatNotice::Connection(state) => println!("* connection {}", state),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments FIRST
    let args = Args::parse();

    setup_logging(&args.log_file, LevelFilter::Debug)?;
    info!("Chatterbox starting up");
    info!("System information: {} {}", std::env::consts::OS, std::env::consts::ARCH);
    info!("Logging to file: {}", args.log_file.display());

    let mut config = ChatConfig::load(args.config.as_deref())?;
    config.apply_env_overrides();
    if let Some(db) = args.db {
        config.database_path = Some(db);
    }
    if args.save_config {
        config.save(args.config.as_deref())?;
    }

    let store = match &config.database_path {
        Some(path) => SqliteMessageStore::open(path)?,
        None => SqliteMessageStore::open_default()?,
    };

    // Our side and a built-in peer share one hub, on crossed channels
    let hub = LocalHub::new();
    let connection = Arc::new(hub.connect(&config.client_id));
    let (notifier, mut notifications) = ChannelNotifier::new(100);
    let (controller, mut notices) = ChatController::new(
        Arc::new(store),
        connection.clone(),
        Arc::new(notifier),
        config.channels.clone(),
    );

    let peer_connection = Arc::new(hub.connect("peer"));
    let (peer, mut peer_notices) = ChatController::new(
        Arc::new(SqliteMessageStore::open_in_memory()?),
        peer_connection,
        Arc::new(LogNotifier),
        config.channels.crossed(),
    );
    tokio::spawn(async move {
        while let Some(notice) = peer_notices.recv().await {
            debug!("Peer notice: {:?}", notice);
        }
    });

    controller.start()?;
    peer.start()?;

    println!(
        "Chatting as {} on {} (type /quit to leave)",
        config.client_id, config.channels.publish_channel
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut feed = controller.messages().into_stream();
    let mut rendered = HashMap::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line) {
                    Command::Send(text) => {
                        controller.submit(text).await;
                    }
                    Command::PeerSend(text) => {
                        peer.submit(text).await;
                    }
                    Command::Connection(state) => connection.set_state(state),
                    Command::History => {
                        for message in controller.messages().current().iter() {
                            println!("{}", format_message(message));
                        }
                    }
                    Command::Quit => break,
                    Command::Unknown(name) => println!("! unknown command {}", name),
                }
            }
            Some(snapshot) = feed.next() => render_changes(&mut rendered, &snapshot),
            Some(notice) = notices.recv() => print_notice(&notice),
            Some(notification) = notifications.recv() => {
                println!("({}) {}", notification.title, notification.body);
            }
        }
    }

    controller.shutdown().await;
    peer.shutdown().await;

    println!("Chat session ended.");
    Ok(())
}
