use anyhow::Result;
use clap::Parser;
use relaychat_core::settings::SETTINGS_FILE;
use relaychat_core::{
    CoreConfig, FrontendDelegate, MiscSettings, RelayChatCore, Settings, UiEvent,
};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "relaychat")]
#[command(about = "Peer-to-peer encrypted chat over a relay server")]
struct Cli {
    /// Set data directory
    #[arg(long)]
    data_dir: Option<String>,

    /// Relay server address (host:port)
    #[arg(long)]
    relay: Option<String>,

    /// Write a default settings file if none exists yet
    #[arg(long)]
    init: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Terminal front end: prints core events and rings the terminal bell for
/// sound cues.
#[derive(Default)]
struct TerminalFrontend {
    viewing: Mutex<Option<String>>,
}

impl FrontendDelegate for TerminalFrontend {
    fn on_event(&self, event: UiEvent) {
        match event {
            UiEvent::PendingContact { uid, profile } => {
                println!(
                    "📨 Friend request from {} ({}) — /accept or /deny",
                    profile.username, uid
                );
            }
            UiEvent::ContactAccepted { uid, profile } => {
                println!("🤝 {} ({}) is now a contact", profile.username, uid);
            }
            UiEvent::RefreshChat { uid } => {
                println!("💬 New activity in the conversation with {}", uid);
            }
            UiEvent::SettingsLoaded { settings } => {
                println!("⚙️  Signed in as {}", settings.username);
            }
            UiEvent::PlaySound(_cue) => {
                // The closest a terminal gets to an mp3
                print!("\x07");
                let _ = io::stdout().flush();
            }
        }
    }

    fn currently_viewing(&self) -> Option<String> {
        self.viewing.lock().unwrap().clone()
    }
}

fn help_text() -> &'static str {
    r#"
Commands:
  /add <uid>          Send a friend request
  /accept <uid>       Accept a pending friend request
  /deny <uid>         Deny a pending friend request
  /open <uid>         Open a conversation (prints its history)
  /msg <uid> <text>   Send an encrypted message
  /contacts           List pending and accepted contacts
  /name <username>    Change your display name
  /whoami             Show your uid
  /stats              Show inbound traffic counters
  /help               Show this help
  /quit               Exit
"#
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    let mut config = CoreConfig::default();
    if let Some(data_dir) = cli.data_dir {
        config.data_root = data_dir.into();
    }
    if let Some(relay) = cli.relay {
        config.relay_addr = relay;
    }

    if cli.init {
        std::fs::create_dir_all(&config.data_root)?;
        let settings_path = config.data_root.join(SETTINGS_FILE);
        if !settings_path.exists() {
            Settings::default().save(&settings_path)?;
            println!("Wrote default settings to {}", settings_path.display());
        }
    }

    let frontend = Arc::new(TerminalFrontend::default());
    let core = RelayChatCore::new(config, frontend.clone())?;

    println!("🆔 Your uid: {}", core.self_uid());

    if let Err(e) = core.connect().await {
        warn!("running in offline mode: {}", e);
        println!("⚠️  Could not reach the relay; running offline");
    }

    println!("Type /help for commands, /quit to exit\n");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    print!("> ");
    io::stdout().flush()?;

    while let Some(line) = lines.next_line().await? {
        if let Err(e) = run_command(&core, &frontend, line.trim()).await {
            println!("⚠️  {e}");
        }
        if line.trim() == "/quit" {
            break;
        }
        print!("> ");
        io::stdout().flush()?;
    }

    Ok(())
}

async fn run_command(
    core: &RelayChatCore,
    frontend: &TerminalFrontend,
    line: &str,
) -> Result<()> {
    let mut parts = line.split_whitespace();
    let command = match parts.next() {
        Some(command) => command,
        None => return Ok(()),
    };

    match command {
        "/add" => {
            let uid = parts.next().ok_or_else(|| anyhow::anyhow!("Usage: /add <uid>"))?;
            core.add_friend(uid).await?;
            println!("Friend request sent to {uid}");
        }
        "/accept" => {
            let uid = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("Usage: /accept <uid>"))?;
            core.accept_friend_request(uid).await?;
        }
        "/deny" => {
            let uid = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("Usage: /deny <uid>"))?;
            core.deny_friend_request(uid).await?;
            println!("Denied {uid}");
        }
        "/open" => {
            let uid = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("Usage: /open <uid>"))?;
            *frontend.viewing.lock().unwrap() = Some(uid.to_string());

            let history = core.message_history(uid).await;
            if history.is_empty() {
                println!("No messages with {uid} yet");
            }
            for (time, record) in &history {
                println!("[{}] {}: {}", time, record.username, record.content);
            }
        }
        "/msg" => {
            let uid = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("Usage: /msg <uid> <text>"))?;
            let text = parts.collect::<Vec<_>>().join(" ");
            if text.is_empty() {
                anyhow::bail!("Usage: /msg <uid> <text>");
            }
            core.send_message(&text, uid).await?;
        }
        "/contacts" => {
            let pending = core.pending_contacts().await;
            let accepted = core.accepted_contacts().await;
            println!("Accepted ({}):", accepted.len());
            for uid in accepted {
                let name = core
                    .contact_field("username", &uid)
                    .await
                    .unwrap_or_else(|| uid.clone());
                println!("  {name} ({uid})");
            }
            println!("Pending ({}):", pending.len());
            for uid in pending {
                let name = core
                    .contact_field("username", &uid)
                    .await
                    .unwrap_or_else(|| uid.clone());
                println!("  {name} ({uid})");
            }
        }
        "/name" => {
            let username = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("Usage: /name <username>"))?;
            let settings = core.settings().await;
            core.update_settings(
                MiscSettings {
                    username: username.to_string(),
                    status: settings.status.clone(),
                    internal_server_port: settings.internal_server_port,
                },
                &settings.color_scheme.to_vec(),
            )
            .await?;
        }
        "/whoami" => println!("{}", core.self_uid()),
        "/stats" => {
            let stats = core.listener_stats().await;
            println!(
                "received: {} | decode failures: {} | dropped: {}",
                stats.packets_received, stats.decode_failures, stats.packets_dropped
            );
        }
        "/help" => println!("{}", help_text()),
        "/quit" => {}
        other => anyhow::bail!("Unknown command: {other} (try /help)"),
    }
    Ok(())
}
