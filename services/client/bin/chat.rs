//! Terminal chat client
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Resuming a stored session, or registering and logging in.
//! 3. Forwarding typed lines to the chat and printing everything that comes back.

use anyhow::Context;
use chatroom_client::{
    api::{ChatApi, HttpChatApi},
    config::Config,
    controller::{
        ChatSessionController, ControllerState, ControllerUpdate, LoginRequest, RegisterRequest,
    },
    terminal::TerminalView,
};
use chatroom_core::{
    protocol::MusicAction,
    router::RenderAction,
    session::{FileStore, SessionStore},
    weather::{EFFECT_DURATION, WeatherCategory},
};
use clap::Parser;
use secrecy::SecretString;
use std::{io, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{self, Instant};
use tracing::{info, warn};

const HELP: &str = "命令: :login <昵称> [服务器]  :logout  :users  :effect <天气>  :play <歌曲ID>  :pause <歌曲ID>  :quit";

#[derive(Parser, Debug)]
#[command(version, about = "Chat room terminal client")]
struct Args {
    /// Nickname to join with. Without it the stored session is resumed.
    #[arg(short, long)]
    nickname: Option<String>,

    /// Real-time server address. Defaults to CHAT_SERVER, then the first listed server.
    #[arg(short, long)]
    server: Option<String>,

    /// Account password. Without it the nickname alone is used.
    #[arg(long, env = "CHAT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Create the account before logging in.
    #[arg(long, requires = "password")]
    register: bool,

    /// Password confirmation for --register. Defaults to the password.
    #[arg(long)]
    confirm: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(io::stderr)
        .init();
    info!(api = %config.api_base, "Configuration loaded");

    // --- 3. Build the Controller ---
    let api: Arc<dyn ChatApi> = Arc::new(
        HttpChatApi::new(config.api_base.clone())
            .with_weather(config.weather_url.clone(), config.weather_api_key.clone()),
    );
    let sessions = SessionStore::new(FileStore::new(config.session_dir.clone()));
    let mut controller = ChatSessionController::new(api, sessions)
        .with_reconnect(config.reconnect)
        .with_content_policy(config.fragment_policy);
    let mut view = TerminalView::new(io::stdout());

    // --- 4. Pick a Server ---
    let servers = match controller.load_servers().await {
        Ok(servers) => servers.servers,
        Err(e) => {
            warn!(error = %e, "Could not load server list");
            Vec::new()
        }
    };
    for server in &servers {
        view.notice(&format!("服务器: {} ({})", server.name, server.address))?;
    }
    let server = args
        .server
        .clone()
        .or_else(|| config.preferred_server.clone())
        .or_else(|| servers.first().map(|server| server.address.clone()))
        .unwrap_or_default();

    // --- 5. Join ---
    let mut registered = true;
    if let (true, Some(nickname), Some(password)) =
        (args.register, args.nickname.as_ref(), args.password.as_ref())
    {
        let confirm = args.confirm.clone().unwrap_or_else(|| password.clone());
        let result = controller
            .register(RegisterRequest {
                username: nickname.clone(),
                password: SecretString::from(password.clone()),
                confirm: SecretString::from(confirm),
            })
            .await;
        match result {
            Ok(message) => view.notice(&message)?,
            Err(e) => {
                view.notice(&e.to_string())?;
                registered = false;
            }
        }
    }

    match &args.nickname {
        Some(_) if !registered => {}
        Some(nickname) => {
            let request = LoginRequest {
                identity: nickname.clone(),
                password: args.password.clone().map(SecretString::from),
                server_address: server.clone(),
            };
            if let Err(e) = controller.login(request).await {
                view.notice(&e.to_string())?;
            }
        }
        None => match controller.resume().await {
            Ok(true) => {}
            Ok(false) => view.notice("请使用 :login <昵称> 登录")?,
            Err(e) => view.notice(&e.to_string())?,
        },
    }

    // --- 6. Chat ---
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    // Next reconnect attempt, while the controller is reconnecting.
    let mut retry_at: Option<Instant> = None;
    loop {
        tokio::select! {
            Some(update) = controller.next_update() => {
                view.render(&update)?;
                if let ControllerUpdate::Reconnecting { delay, .. } = update {
                    retry_at = Some(Instant::now() + delay);
                }
            }
            _ = time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                retry_at = None;
                if let Err(e) = controller.reconnect().await {
                    view.notice(&e.to_string())?;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if !handle_line(&mut controller, &mut view, &server, &line).await? {
                    break;
                }
                if !matches!(controller.state(), ControllerState::Reconnecting { .. }) {
                    retry_at = None;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Exiting");
    Ok(())
}

/// Handles one typed line. Returns `false` to quit.
async fn handle_line(
    controller: &mut ChatSessionController,
    view: &mut TerminalView<io::Stdout>,
    default_server: &str,
    line: &str,
) -> io::Result<bool> {
    let mut words = line.split_whitespace();
    let result = match words.next() {
        Some(":quit") => return Ok(false),
        Some(":help") => return view.notice(HELP).map(|_| true),
        Some(":logout") => {
            controller.logout();
            Ok(())
        }
        Some(":login") => {
            let identity = words.next().unwrap_or_default().to_string();
            let server_address = words.next().unwrap_or(default_server).to_string();
            controller
                .login(LoginRequest {
                    identity,
                    password: None,
                    server_address,
                })
                .await
        }
        Some(":users") => {
            let users = controller.roster().users().join(", ");
            return view
                .notice(&format!("在线用户 ({}): {users}", controller.roster().len()))
                .map(|_| true);
        }
        Some(":effect") => {
            return match words.next().map(str::parse::<WeatherCategory>) {
                Some(Ok(category)) => view
                    .render(&ControllerUpdate::Render(RenderAction::WeatherEffect {
                        category,
                        duration: EFFECT_DURATION,
                    }))
                    .map(|_| true),
                Some(Err(e)) => view.notice(&e.to_string()).map(|_| true),
                None => view.notice(HELP).map(|_| true),
            };
        }
        Some(command @ (":play" | ":pause")) => {
            let action = if command == ":play" {
                MusicAction::Play
            } else {
                MusicAction::Pause
            };
            match words.next() {
                Some(song_id) => controller.send_music_control(song_id, action),
                None => return view.notice(HELP).map(|_| true),
            }
        }
        _ => controller.submit(line).await.map(|_| ()),
    };

    if let Err(e) = result {
        view.notice(&e.to_string())?;
    }
    Ok(true)
}
