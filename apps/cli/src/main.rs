use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    check_server_status, load_settings, send_through, ChannelTimeline, ChatClient, ClientHandle,
    ClientSettings, FileUpload, LoginOutcome, SocketConnector, TungsteniteConnector,
};
use futures::StreamExt;
use shared::{
    domain::{filter_channels, normalize_server_url, Message, RecordId, ServerStatus},
    protocol::{OutgoingMessage, RealtimeEvent},
};
use storage::{SessionStore, Storage};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chat", about = "Command-line client for the chat backend")]
struct Cli {
    /// Backend to talk to. Defaults to the logged-in session's server.
    #[arg(long, global = true)]
    server: Option<String>,
    /// Overrides `database_url` from client.toml.
    #[arg(long, global = true)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Saved server bookmarks.
    #[command(subcommand)]
    Servers(ServersCommand),
    Register {
        username: String,
        #[arg(long)]
        password: String,
    },
    Login {
        username: String,
        #[arg(long)]
        password: String,
        /// Authenticator code, when the account has 2FA enabled.
        #[arg(long)]
        code: Option<String>,
    },
    Logout,
    Channels {
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        refresh: bool,
    },
    CreateChannel {
        name: String,
    },
    Join {
        channel: String,
    },
    Search {
        query: String,
    },
    Messages {
        channel: String,
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long)]
        refresh: bool,
    },
    Send {
        channel: String,
        text: String,
        #[arg(long)]
        reply_to: Option<String>,
    },
    Upload {
        channel: String,
        path: PathBuf,
        /// Caption sent with the file.
        #[arg(long, default_value = "")]
        text: String,
    },
    User {
        username: String,
        /// Writes the avatar image to this path when the user has one.
        #[arg(long)]
        avatar_out: Option<PathBuf>,
    },
    #[command(subcommand)]
    TwoFactor(TwoFactorCommand),
    /// Prints live messages for a channel until interrupted.
    Tail {
        channel: String,
    },
}

#[derive(Subcommand, Debug)]
enum ServersCommand {
    List,
    Add { name: String, url: String },
    Rename { id: i64, name: String },
    Remove { id: i64 },
    /// Pings every saved server.
    Status,
}

#[derive(Subcommand, Debug)]
enum TwoFactorCommand {
    Setup,
    Enable { code: String },
    Disable {
        #[arg(long)]
        password: String,
    },
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings();
    if let Some(database_url) = &cli.database_url {
        settings.database_url = database_url.clone();
    }
    let storage = Storage::new(&settings.database_url)
        .await
        .with_context(|| format!("failed to open client state at {}", settings.database_url))?;

    match cli.command {
        Command::Servers(command) => run_servers(command, &storage, &settings).await,
        command => {
            let client = open_client(cli.server.as_deref(), &settings, &storage).await?;
            run_client(command, &client).await
        }
    }
}

async fn run_servers(command: ServersCommand, storage: &Storage, settings: &ClientSettings) -> Result<()> {
    match command {
        ServersCommand::List => {
            for server in storage.list_servers().await? {
                println!("{:>4}  {:<20} {}", server.id, server.name, server.url);
            }
        }
        ServersCommand::Add { name, url } => {
            let server = storage.add_server(&name, &url).await?;
            println!("saved server {} ({})", server.id, server.url);
        }
        ServersCommand::Rename { id, name } => {
            let server = storage.rename_server(id, &name).await?;
            println!("server {} is now '{}'", server.id, server.name);
        }
        ServersCommand::Remove { id } => {
            if !storage.delete_server(id).await? {
                bail!("no saved server with id {id}");
            }
            println!("removed server {id}");
        }
        ServersCommand::Status => {
            for server in storage.list_servers().await? {
                let status = match check_server_status(&server.url, settings).await {
                    ServerStatus::Online { ping_ms } => format!("online ({ping_ms} ms)"),
                    ServerStatus::Error { http_status } => format!("error (HTTP {http_status})"),
                    ServerStatus::Offline => "offline".to_string(),
                };
                println!("{:<20} {:<40} {status}", server.name, server.url);
            }
        }
    }
    Ok(())
}

/// Reuses the stored session when it belongs to the requested server.
async fn open_client(
    server: Option<&str>,
    settings: &ClientSettings,
    storage: &Storage,
) -> Result<ChatClient> {
    let store: Arc<dyn SessionStore> = Arc::new(storage.clone());
    let connector: Arc<dyn SocketConnector> = Arc::new(TungsteniteConnector);
    let requested = server
        .map(normalize_server_url)
        .or_else(|| settings.server_url.clone());

    if let Some(session) = store.load_session().await? {
        if requested.as_deref().map_or(true, |url| url == session.server_url) {
            return Ok(ChatClient::from_session(
                session,
                settings.clone(),
                store,
                connector,
            )?);
        }
        info!(server = %session.server_url, "stored session belongs to another server");
    }

    let Some(url) = requested else {
        bail!("no server given: pass --server or set server_url in client.toml");
    };
    Ok(ChatClient::new_with_dependencies(
        &url,
        settings.clone(),
        store,
        connector,
    )?)
}

async fn run_client(command: Command, client: &ChatClient) -> Result<()> {
    match command {
        Command::Servers(_) => bail!("server bookmarks are managed without a client"),
        Command::Register { username, password } => {
            let outcome = client.register(&username, &password).await?;
            report_login(outcome)?;
        }
        Command::Login {
            username,
            password,
            code,
        } => {
            let outcome = client.login(&username, &password, None).await?;
            let outcome = match (outcome, code.as_deref()) {
                (LoginOutcome::SecondFactorRequired { session_id: Some(id) }, Some(code)) => {
                    client.verify_2fa_login(&username, &id, code).await?
                }
                (LoginOutcome::SecondFactorRequired { session_id: None }, Some(code)) => {
                    client.login(&username, &password, Some(code)).await?
                }
                (outcome, _) => outcome,
            };
            report_login(outcome)?;
        }
        Command::Logout => {
            client.logout().await?;
            println!("logged out");
        }
        Command::Channels { filter, refresh } => {
            let channels = client.get_channels(refresh).await?;
            for channel in filter_channels(&channels, filter.as_deref().unwrap_or_default()) {
                match &channel.description {
                    Some(description) => println!(
                        "#{:<20} {:>4} members  {description}",
                        channel.name, channel.member_count
                    ),
                    None => println!("#{:<20} {:>4} members", channel.name, channel.member_count),
                }
            }
        }
        Command::CreateChannel { name } => {
            client.create_channel(&name).await?;
            println!("created #{}", name.trim());
        }
        Command::Join { channel } => {
            client.join_channel(&channel).await?;
            println!("joined #{channel}");
        }
        Command::Search { query } => {
            for channel in client.search_channels(&query).await? {
                println!("#{}", channel.name);
            }
        }
        Command::Messages {
            channel,
            limit,
            refresh,
        } => {
            let mut timeline = ChannelTimeline::new(channel.as_str());
            timeline.replace_history(client.get_messages(&channel, limit, refresh).await?);
            for message in timeline.messages() {
                if let Some(preview) = timeline.reply_preview(message) {
                    println!("    > {}: {}", preview.from, preview.text);
                }
                println!("{}", render(message));
            }
        }
        Command::Send {
            channel,
            text,
            reply_to,
        } => {
            let session = client
                .session()
                .await
                .context("log in before sending messages")?;
            let mut timeline = ChannelTimeline::new(channel.as_str());
            let reply_to = reply_to.as_deref().map(parse_record_id);
            match send_through(client, &mut timeline, &session.username, &text, reply_to).await {
                Ok(client_id) => info!(%client_id, channel = %channel, "message sent"),
                Err(failure) => {
                    warn!(channel = %channel, "send failed, draft kept: {}", failure.text);
                    return Err(failure.into());
                }
            }
        }
        Command::Upload {
            channel,
            path,
            text,
        } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string());
            let uploaded = client.upload_file(FileUpload::new(filename, bytes)).await?;
            let Some(file_id) = uploaded.id else {
                bail!("server accepted the upload but returned no file id");
            };
            client
                .send_message(OutgoingMessage {
                    file_id: Some(file_id),
                    ..OutgoingMessage::text(channel.as_str(), text)
                })
                .await?;
            println!("shared {} in #{channel}", path.display());
        }
        Command::User {
            username,
            avatar_out,
        } => {
            let user = client.get_user_info(&username, false).await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
            if let Some(target) = avatar_out {
                match client.fetch_avatar(&username).await? {
                    Some(bytes) => {
                        tokio::fs::write(&target, bytes).await?;
                        println!("avatar written to {}", target.display());
                    }
                    None => println!("{username} has no avatar"),
                }
            }
        }
        Command::TwoFactor(command) => run_two_factor(command, client).await?,
        Command::Tail { channel } => tail(client, &channel).await?,
    }
    Ok(())
}

async fn run_two_factor(command: TwoFactorCommand, client: &ChatClient) -> Result<()> {
    match command {
        TwoFactorCommand::Setup => {
            let setup = client.setup_2fa().await?;
            println!("secret: {}", setup.secret);
            if let Some(url) = setup.qr_code_url {
                println!("qr code: {url}");
            }
        }
        TwoFactorCommand::Enable { code } => {
            client.enable_2fa(&code).await?;
            println!("two-factor authentication enabled");
        }
        TwoFactorCommand::Disable { password } => {
            client.disable_2fa(&password).await?;
            println!("two-factor authentication disabled");
        }
        TwoFactorCommand::Status => {
            let enabled = client.get_2fa_status().await?;
            println!("two-factor authentication is {}", if enabled { "on" } else { "off" });
        }
    }
    Ok(())
}

async fn tail(client: &ChatClient, channel: &str) -> Result<()> {
    let mut timeline = ChannelTimeline::new(channel);
    timeline.replace_history(client.get_messages(channel, 50, true).await?);
    for message in timeline.messages() {
        println!("{}", render(message));
    }

    let realtime = client.realtime_channel().await?;
    let (tx, mut rx) = mpsc::unbounded_channel::<RealtimeEvent>();
    realtime
        .add_handler(move |event: &RealtimeEvent| -> anyhow::Result<()> {
            tx.send(event.clone())?;
            Ok(())
        })
        .await;
    realtime.start().await?;
    let mut states = realtime.state_changes();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(state) = states.next() => info!(?state, "realtime connection"),
            Some(event) = rx.recv() => {
                if timeline.apply_event(&event) {
                    if let Some(message) = timeline.messages().last() {
                        println!("{}", render(message));
                    }
                }
            }
        }
    }

    realtime.close().await;
    Ok(())
}

fn render(message: &Message) -> String {
    let time = message
        .timestamp
        .as_ref()
        .and_then(|time| time.to_datetime())
        .map(|time| time.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "--".to_string());
    let mut line = format!("[{time}] {}: {}", message.from, message.text);
    if let Some(file) = &message.file {
        let name = file
            .original_name
            .as_deref()
            .or(file.filename.as_deref())
            .unwrap_or("file");
        line.push_str(&format!(" [file: {name}]"));
    }
    if message.voice_message.is_some() {
        line.push_str(" [voice message]");
    }
    line
}

fn parse_record_id(raw: &str) -> RecordId {
    raw.parse::<i64>()
        .map(RecordId::from)
        .unwrap_or_else(|_| RecordId::from(raw))
}

fn report_login(outcome: LoginOutcome) -> Result<()> {
    match outcome {
        LoginOutcome::Authenticated(session) => {
            println!("logged in as {} on {}", session.username, session.server_url);
            Ok(())
        }
        LoginOutcome::SecondFactorRequired { .. } => {
            bail!("this account needs a second factor: retry with --code <authenticator code>")
        }
        LoginOutcome::Rejected { message } => bail!("login rejected: {message}"),
    }
}
