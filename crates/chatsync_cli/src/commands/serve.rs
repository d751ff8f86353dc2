//! Serve command implementation.

use chatsync_protocol::{NewMessage, ResourceKey};
use chatsync_server::{now_millis, CallerId, MemoryChangeLog, ServerConfig, SyncServer};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Demo sessions and how many messages each one starts with.
const DEMO_SESSIONS: &[(&str, usize)] = &[("general", 200), ("random", 20), ("announcements", 3)];

/// Runs the serve command.
pub fn run(
    bind: SocketAddr,
    secret: Option<String>,
    seed_demo: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ServerConfig::new(bind);
    if let Some(secret) = secret {
        config = config.with_auth(secret.into_bytes());
    }
    let server = SyncServer::new(config);

    if seed_demo {
        if let Some(log) = server.change_log() {
            let member = seed(log)?;
            match server.token_validator() {
                Some(validator) => {
                    let token = validator.create_token(member)?;
                    info!(caller = %member, "demo sessions seeded");
                    println!("Demo token: {token}");
                }
                None => info!("demo sessions seeded; authentication is disabled"),
            }
        }
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(chatsync_server::serve(Arc::new(server), shutdown_signal()))?;
    Ok(())
}

/// Creates the demo sessions and returns the caller allowed to read them.
pub fn seed(log: &MemoryChangeLog) -> Result<CallerId, Box<dyn std::error::Error>> {
    let member = CallerId::random();
    let base = now_millis() - 60 * 60 * 1000;

    for (name, count) in DEMO_SESSIONS {
        let key = ResourceKey::new(*name)?;
        log.create_session(key.clone(), [member]);
        for i in 0..*count {
            let content = format!("{name} message {i}").into_bytes();
            log.append(
                &key,
                NewMessage::new(content, base + i as i64 * 1000).with_local_id(format!("demo-{i}")),
            )?;
        }
    }
    Ok(member)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_protocol::DeltaParams;

    #[test]
    fn seeded_sessions_are_readable_by_member() {
        let server = SyncServer::new(ServerConfig::default().with_auth(b"demo".to_vec()));
        let member = seed(server.change_log().unwrap()).unwrap();
        let token = server.token_validator().unwrap().create_token(member).unwrap();
        let header = format!("Bearer {token}");

        let page = server
            .handle_messages("general", &DeltaParams::default(), Some(&header))
            .unwrap();
        assert_eq!(page.messages.len(), 150);
        assert!(page.has_more);

        let page = server
            .handle_messages("announcements", &DeltaParams::default(), Some(&header))
            .unwrap();
        assert_eq!(page.messages.len(), 3);
        assert!(!page.has_more);
    }
}
