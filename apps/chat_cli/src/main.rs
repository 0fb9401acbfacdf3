use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use client_core::{
    ChatClient, ClientError, ClientEvent, DisplayBlock, Inbox, InboxUpdate, PushOutcome, Side,
    Transcript,
};
use shared::{
    domain::{AccountId, AccountSummary},
    protocol::ServerEvent,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Terminal client for the chat server")]
struct Cli {
    #[arg(long, env = "CHAT_SERVER_URL", default_value = "http://127.0.0.1:8080")]
    server_url: String,
    #[arg(long)]
    username: String,
    #[arg(long, env = "CHAT_PASSWORD")]
    password: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the account, then print who we are.
    Register {
        #[arg(long)]
        email: String,
    },
    Whoami,
    Search {
        query: String,
    },
    Send {
        to: String,
        content: String,
    },
    History {
        with: String,
    },
    Favorites {
        #[command(subcommand)]
        action: Option<FavoriteAction>,
    },
    /// Print live events; deliveries show up as notifications.
    Watch,
    /// Interactive conversation: stdin lines are sent, events are rendered.
    Chat {
        with: String,
    },
}

#[derive(Subcommand, Debug)]
enum FavoriteAction {
    Add { user: String },
    Remove { user: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
    let cli = Cli::parse();
    let client = ChatClient::new(&cli.server_url)?;

    if let Command::Register { email } = &cli.command {
        let me = client.register(email, &cli.username, &cli.password).await?;
        println!("registered {} (#{})", cli.username, display_id(me.account_no));
        return Ok(());
    }

    let me = match client.login(&cli.username, &cli.password).await {
        Ok(me) => me,
        Err(ClientError::BadCredentials) => return Err(anyhow!("wrong username or password")),
        Err(err) => return Err(err).context("login failed"),
    };

    match cli.command {
        Command::Register { .. } => {}
        Command::Whoami => {
            println!(
                "{} <{}> #{} session={}",
                me.username.unwrap_or_default(),
                me.email.unwrap_or_default(),
                display_id(me.account_no),
                me.session
            );
        }
        Command::Search { query } => {
            for account in client.search_users(&query).await? {
                println!("#{} {}", account.id, account.username);
            }
        }
        Command::Send { to, content } => {
            let peer = resolve(&client, &to).await?;
            client.send_message(peer.id, &content).await?;
        }
        Command::History { with } => {
            let peer = resolve(&client, &with).await?;
            let mut transcript = Transcript::new(peer.clone());
            transcript.seed(client.history(peer.id).await?);
            render(&transcript, &cli.username);
        }
        Command::Favorites { action } => {
            let favorites = match action {
                None => client.favorites().await?,
                Some(FavoriteAction::Add { user }) => {
                    let peer = resolve(&client, &user).await?;
                    client.add_favorite(peer.id).await?
                }
                Some(FavoriteAction::Remove { user }) => {
                    let peer = resolve(&client, &user).await?;
                    client.remove_favorite(peer.id).await?
                }
            };
            for account in favorites {
                println!("#{} {}", account.id, account.username);
            }
        }
        Command::Watch => watch(&client).await?,
        Command::Chat { with } => {
            let me_id = me.account_no.ok_or_else(|| anyhow!("login did not return an account"))?;
            chat(&client, me_id, &cli.username, &with).await?
        }
    }

    Ok(())
}

fn display_id(id: Option<AccountId>) -> String {
    id.map(|id| id.to_string()).unwrap_or_else(|| "?".into())
}

async fn resolve(client: &ChatClient, username: &str) -> Result<AccountSummary> {
    client
        .search_users(username)
        .await?
        .into_iter()
        .find(|account| account.username.eq_ignore_ascii_case(username))
        .ok_or_else(|| anyhow!("no user named '{username}'"))
}

fn render(transcript: &Transcript, me: &str) {
    for block in transcript.blocks() {
        render_block(block, me, &transcript.peer().username);
    }
}

fn render_block(block: &DisplayBlock, me: &str, peer: &str) {
    let author = match block.side {
        Side::Sent => me,
        Side::Received => peer,
    };
    println!("[{}] {author}:", block.label(Local::now()));
    for line in &block.contents {
        println!("    {line}");
    }
}

async fn watch(client: &ChatClient) -> Result<()> {
    let mut events = client.subscribe_events();
    let reader = client.connect_events().await?;
    let mut inbox = Inbox::new();
    loop {
        match events.recv().await {
            Ok(ClientEvent::Server(event)) => {
                if let InboxUpdate::Notified { from } = inbox.handle_event(&event) {
                    if let Some(n) = inbox.notifications().iter().find(|n| n.from.id == from) {
                        println!("{} ({} unread): {}", n.from.username, n.unread, n.preview);
                    }
                } else if let ServerEvent::Echo { message } = &event {
                    println!("you -> #{}: {}", message.to, message.content);
                }
            }
            Ok(ClientEvent::Error(err)) => warn!(%err, "event stream error"),
            Ok(ClientEvent::Disconnected) | Err(RecvError::Closed) => break,
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "dropped events"),
        }
    }
    reader.abort();
    Ok(())
}

async fn chat(client: &ChatClient, me_id: AccountId, me: &str, with: &str) -> Result<()> {
    let peer = resolve(client, with).await?;
    let mut events = client.subscribe_events();
    let reader = client.connect_events().await?;

    let mut inbox = Inbox::new();
    let transcript = client.open_conversation(&mut inbox, peer.clone()).await?;
    render(transcript, me);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Err(err) = client.send_message(peer.id, line).await {
                    if err.is_session_expired() {
                        return Err(anyhow!("session expired, please log in again"));
                    }
                    eprintln!("send failed: {err}");
                }
            }
            event = events.recv() => match event {
                Ok(ClientEvent::Server(event)) => {
                    let Some(message) = event.message() else { continue };
                    let in_conversation = message.is_between(me_id, peer.id);
                    match inbox.handle_event(&event) {
                        InboxUpdate::Displayed { outcome, .. } if in_conversation => {
                            let block = match outcome {
                                PushOutcome::Coalesced { block } | PushOutcome::Inserted { block } => block,
                                PushOutcome::Duplicate => continue,
                            };
                            if let Some(block) = inbox
                                .conversation(peer.id)
                                .and_then(|transcript| transcript.blocks().nth(block))
                            {
                                render_block(block, me, &peer.username);
                            }
                        }
                        InboxUpdate::Notified { from } => {
                            if let Some(n) = inbox.notifications().iter().find(|n| n.from.id == from) {
                                println!("* {} says: {} ({} unread)", n.from.username, n.preview, n.unread);
                            }
                        }
                        _ => {}
                    }
                }
                Ok(ClientEvent::Error(err)) => warn!(%err, "event stream error"),
                Ok(ClientEvent::Disconnected) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "dropped events"),
            },
        }
    }
    reader.abort();
    Ok(())
}
