//! chat-realtime - terminal front end for the realtime chat client
//!
//! Reads lines from stdin. Plain text is sent as a chat message; lines
//! starting with `/` are commands (`/help` lists them).

use anyhow::Result;
use clap::Parser;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use chat_realtime::{
    config::Args, AccountService, ChatClient, ConnectionState, ConversationSignal,
    ConversationSnapshot, CredentialStore, HttpOriginLookup, IdentityResolver,
    MemoryCredentialStore, OriginLookup, SocketIoConnector, StaticOrigin,
};

const HELP: &str = "\
Commands:
  /login <email> <password>         sign in
  /logout                           sign out
  /signup <name> <email> <password> create an account
  /forgot <email>                   email a reset code
  /verify <otp> <email>             check a reset code
  /reset <email> <new password>     set a new password
  /status                           connection and conversation state
  /quit                             leave
Anything else is sent as a message.";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("chat_realtime={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  chat-realtime");
    info!("======================================");
    info!("Server: {}{}", args.server_url, args.socket_path);
    info!("Namespace: {} (event '{}')", args.namespace, args.event_name);
    info!("Account API: {}", args.api_url);
    info!(
        "Reconnect: {} attempts, {} ms apart",
        args.reconnect_attempts, args.reconnect_delay_ms
    );
    info!("Match strategy: {}", args.match_strategy);
    info!("======================================");

    let store = Arc::new(MemoryCredentialStore::new());
    let account = AccountService::new(args.account_config(), store.clone());

    if let (Some(email), Some(password)) = (&args.email, &args.password) {
        match account.login(email, password).await {
            Ok(Some(user)) => info!("Signed in as {}", user.name),
            Ok(None) => warn!("Login returned no profile, continuing anonymously"),
            Err(e) => warn!("Startup login failed, continuing anonymously: {}", e),
        }
    }

    let lookup: Arc<dyn OriginLookup> = match &args.origin_address {
        Some(address) => Arc::new(StaticOrigin(address.clone())),
        None => Arc::new(HttpOriginLookup::new(
            args.origin_lookup_url.clone(),
            args.http_timeout(),
        )),
    };
    let credentials: Arc<dyn CredentialStore> = store.clone();
    let resolver = IdentityResolver::new(lookup, credentials);

    let client = ChatClient::mount(
        SocketIoConnector::new(args.socket_config()),
        resolver,
        args.chat_config(),
    );

    let printer = tokio::spawn(print_updates(
        client.watch_conversation(),
        client.subscribe_signals().await,
        client.watch_connection(),
    ));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                };
                if !handle_line(line.trim(), &client, &account).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    printer.abort();
    client.unmount().await;
    Ok(())
}

/// Handle one input line. Returns false when the user wants to leave.
async fn handle_line(line: &str, client: &ChatClient, account: &AccountService) -> bool {
    if line.is_empty() {
        return true;
    }
    if !line.starts_with('/') {
        if client.submit(line).await.is_none() {
            println!("! not connected, message dropped");
        }
        return true;
    }

    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let rest: Vec<&str> = parts.collect();

    let outcome = match (command, rest.as_slice()) {
        ("/quit", _) | ("/exit", _) => return false,
        ("/help", _) => {
            println!("{}", HELP);
            Ok(())
        }
        ("/status", _) => {
            let snapshot = client.snapshot().await;
            let pending = snapshot.turns.iter().filter(|t| !t.is_answered()).count();
            println!(
                "connection: {:?}, authenticated: {}, turns: {}, pending: {}, loading: {}",
                client.connection_state(),
                client
                    .connection_params()
                    .is_some_and(|p| p.is_authenticated()),
                snapshot.turns.len(),
                pending,
                snapshot.loading
            );
            Ok(())
        }
        ("/login", [email, password]) => account.login(email, password).await.map(|user| {
            match user {
                Some(user) => println!("signed in as {}", user.name),
                None => println!("token stored, profile missing"),
            }
        }),
        ("/logout", _) => {
            account.logout();
            println!("signed out");
            Ok(())
        }
        ("/signup", [name, email, password]) => account
            .sign_up(name, email, password)
            .await
            .map(|()| println!("account created, you can /login now")),
        ("/forgot", [email]) => account
            .send_reset_code(email)
            .await
            .map(|()| println!("reset code sent to {}", email)),
        ("/verify", [otp, email]) => account
            .verify_reset_code(otp, email)
            .await
            .map(|()| println!("code accepted")),
        ("/reset", [email, new_password]) => account
            .reset_password(new_password, email)
            .await
            .map(|()| println!("password changed")),
        _ => {
            println!("unknown command or wrong arguments, try /help");
            Ok(())
        }
    };

    if let Err(e) = outcome {
        println!("! {}", e);
    }
    true
}

/// Print answers, auth prompts and connection changes as they happen.
async fn print_updates(
    mut conversation: watch::Receiver<ConversationSnapshot>,
    mut signals: broadcast::Receiver<ConversationSignal>,
    mut connection: watch::Receiver<ConnectionState>,
) {
    let mut printed: HashSet<Uuid> = HashSet::new();

    loop {
        tokio::select! {
            changed = conversation.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = conversation.borrow_and_update().clone();
                for turn in snapshot.turns.iter().filter(|t| t.is_answered()) {
                    if printed.insert(turn.id) {
                        println!("< {}", turn.response_text);
                    }
                }
                if snapshot.loading {
                    println!("...");
                }
            }
            signal = signals.recv() => match signal {
                Ok(ConversationSignal::AuthenticationRequired) => {
                    println!("! authentication required, use /login <email> <password>");
                }
                Ok(ConversationSignal::ScrollToLatest { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Signal receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = connection.borrow_and_update().clone();
                match state {
                    ConnectionState::Connected => println!("* connected"),
                    ConnectionState::Disconnected(reason) => println!("* disconnected: {:?}", reason),
                    ConnectionState::Connecting { attempt } if attempt > 0 => {
                        println!("* reconnecting (attempt {})", attempt)
                    }
                    _ => {}
                }
            }
        }
    }
}
