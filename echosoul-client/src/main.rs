use echosoul_client::{
    AiChatClient, AiChatMessage, AiEventKind, AiSessionState, ClientConfig, ConnectionEvent,
    ConnectionEventKind, Role, SessionUpdate, WsConnector,
};
use echosoul_proto::Id;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, source) = load_config()?;

    init_logging(&config);

    info!("EchoSoul Client v{}", env!("CARGO_PKG_VERSION"));
    match source {
        Some(path) => info!("Loaded config from {}", path),
        None => {
            warn!("No config file found, using default configuration");
            warn!("IMPORTANT: Set user_id and token in configs/client.toml");
        }
    }

    let base = config.endpoint()?;
    info!(
        "Environment {:?}, endpoint {}",
        config.server.environment, base
    );

    let client = AiChatClient::new(
        base,
        config.user.user_id.clone(),
        &config.user.token,
        WsConnector::new(config.connection.connect_timeout()),
        config.connection.to_settings(),
    );

    let state = Arc::new(Mutex::new(AiSessionState::new()));
    let (updates_tx, mut updates) = mpsc::unbounded_channel();

    for kind in AiEventKind::ALL {
        let state = state.clone();
        let updates_tx = updates_tx.clone();
        client.on(kind, move |event| {
            if let Some(update) = lock(&state).apply(event) {
                let _ = updates_tx.send(update);
            }
        });
    }

    for kind in [
        ConnectionEventKind::Connect,
        ConnectionEventKind::Disconnect,
        ConnectionEventKind::Error,
        ConnectionEventKind::Close,
        ConnectionEventKind::ReconnectExhausted,
    ] {
        client.on_connection(kind, print_connection_event);
    }

    if let Err(e) = client.connect().await {
        warn!("Initial connect failed: {}", e);
        println!("[WARN] Not connected yet, retrying in the background");
    }

    println!("\nEchoSoul client ready.");
    println!("Commands: /start <character> [conversation], /end, /characters, /history [limit], /status, /quit");
    println!("Anything else is sent to the active AI character.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input == "/quit" || input == "/exit" {
                    info!("Exiting...");
                    break;
                }
                run_command(&client, &state, &config, input);
            }
            Some(update) = updates.recv() => {
                render(&client, &state, update);
            }
        }
    }

    client.disconnect();
    Ok(())
}

fn run_command(
    client: &AiChatClient,
    state: &Arc<Mutex<AiSessionState>>,
    config: &ClientConfig,
    input: &str,
) {
    let mut parts = input.split_whitespace();
    let sent = match parts.next().unwrap_or_default() {
        "/start" => {
            let character = parts
                .next()
                .map(parse_id)
                .or_else(|| config.user.default_character_id.clone());
            let Some(character) = character else {
                println!("Error: /start requires a character id");
                return;
            };
            let conversation = parts.next().map(parse_id);
            client.start_ai_session(character, conversation)
        }
        "/end" => {
            lock(state).end_session();
            client.end_ai_session()
        }
        "/characters" => client.get_ai_characters(),
        "/history" => {
            let Some(conversation) = lock(state).conversation_id().cloned() else {
                println!("No active conversation, use /start first");
                return;
            };
            let limit = match parts.next().map(str::parse::<u32>) {
                Some(Ok(limit)) => Some(limit),
                Some(Err(_)) => {
                    println!("Error: limit must be a number");
                    return;
                }
                None => None,
            };
            client.get_conversation_history(conversation, limit)
        }
        "/status" => {
            print_status(client, state);
            return;
        }
        cmd if cmd.starts_with('/') => {
            println!("Unknown command: {}", cmd);
            return;
        }
        _ => {
            let (conversation, character) = {
                let state = lock(state);
                (
                    state.conversation_id().cloned(),
                    state.character().map(|c| c.id.clone()),
                )
            };
            let Some(conversation) = conversation else {
                println!("No active conversation, use /start first");
                return;
            };

            let mut message = AiChatMessage::text(conversation, input);
            if let Some(character) = character {
                message = message.with_character(character);
            }
            let sent = client.send_chat_message(message);
            if sent {
                lock(state).record_outgoing(input);
            }
            sent
        }
    };

    if !sent {
        println!("[ERROR] Not sent: not connected");
    }
}

fn render(client: &AiChatClient, state: &Arc<Mutex<AiSessionState>>, update: SessionUpdate) {
    match update {
        SessionUpdate::SessionStarted {
            character,
            conversation_id,
        } => {
            let name = character.map(|c| c.name).unwrap_or_else(|| "AI".to_string());
            match &conversation_id {
                Some(id) => println!("[SESSION] Talking to {} (conversation {})", name, id),
                None => println!("[SESSION] Talking to {}", name),
            }

            let mut state = lock(state);
            if let (true, Some(id)) = (state.needs_history_bootstrap(), conversation_id) {
                if client.get_conversation_history(id, None) {
                    state.mark_history_requested();
                }
            }
        }
        SessionUpdate::StreamStarted(_) => {
            let name = lock(state)
                .character()
                .map(|c| c.name.clone())
                .unwrap_or_else(|| "AI".to_string());
            print!("{}: ", name);
            flush();
        }
        SessionUpdate::StreamAppended { text, .. } => {
            print!("{}", text);
            flush();
        }
        SessionUpdate::StreamFinished(_) => println!(),
        SessionUpdate::UserMessageConfirmed(entry) => {
            debug!("Message {:?} stored", entry.message_id);
        }
        SessionUpdate::HistoryLoaded(count) => {
            println!("[HISTORY] {} messages", count);
            for entry in lock(state).transcript() {
                let who = match entry.role {
                    Role::User => "you",
                    Role::Ai => "ai",
                };
                println!("  {}: {}", who, entry.content);
            }
        }
        SessionUpdate::CharactersLoaded(_) => {
            for character in lock(state).characters() {
                match &character.description {
                    Some(description) => {
                        println!("  {} - {}: {}", character.id, character.name, description)
                    }
                    None => println!("  {} - {}", character.id, character.name),
                }
            }
        }
        SessionUpdate::Error(message) => println!("[ERROR] {}", message),
    }
}

fn print_status(client: &AiChatClient, state: &Arc<Mutex<AiSessionState>>) {
    let state = lock(state);
    println!("Connection:   {:?}", client.state());
    let connection = client.connection();
    println!(
        "Reconnects:   {}/{}",
        connection.reconnect_attempts(),
        connection.settings().max_reconnect_attempts
    );
    println!(
        "Character:    {}",
        state.character().map_or("-", |c| c.name.as_str())
    );
    println!(
        "Conversation: {}",
        state
            .conversation_id()
            .map_or_else(|| "-".to_string(), Id::to_string)
    );
    println!("Streaming:    {}", state.is_streaming());
    if let Some(error) = state.last_error() {
        println!("Last error:   {}", error);
    }
}

fn print_connection_event(event: &ConnectionEvent) {
    match event {
        ConnectionEvent::Connected => println!("[CONNECTED]"),
        ConnectionEvent::Disconnected => println!("[DISCONNECTED]"),
        ConnectionEvent::Error(e) => println!("[CONNECTION ERROR] {}", e),
        ConnectionEvent::Closed { code, reason } => {
            println!("[CLOSED] code {:?} {}", code, reason)
        }
        ConnectionEvent::ReconnectExhausted { attempts } => {
            println!("[OFFLINE] Gave up after {} reconnect attempts", attempts)
        }
    }
}

/// Numeric ids go out as numbers, anything else as a string
fn parse_id(raw: &str) -> Id {
    raw.parse::<i64>().map(Id::Num).unwrap_or_else(|_| Id::from(raw))
}

fn lock(state: &Mutex<AiSessionState>) -> MutexGuard<'_, AiSessionState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn flush() {
    let _ = std::io::stdout().flush();
}

fn load_config() -> anyhow::Result<(ClientConfig, Option<&'static str>)> {
    // Try configs/client.toml (development), then ./client.toml
    for path in ["configs/client.toml", "client.toml"] {
        if Path::new(path).exists() {
            let config = ClientConfig::from_file(path)
                .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", path, e))?;
            return Ok((config, Some(path)));
        }
    }

    // Use default config as last resort
    Ok((ClientConfig::default_config(), None))
}

fn init_logging(config: &ClientConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level));

    if config.logging.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }
}
