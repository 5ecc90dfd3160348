//! Remote console (RCON) integration.
//!
//! The server keeps writing chunks while it runs. Before archiving, automatic
//! saving is switched off and pending writes are flushed; afterwards saving
//! is switched back on. [`with_frozen_world`] is the only way the executor
//! touches the console, and it sends the resume command whenever a freeze
//! was attempted, whatever the freeze or the archiving step did.

pub mod recording;

use crate::config::RconConfig;
use crate::utils::{Result, SyncError};
use async_trait::async_trait;
use futures_util::FutureExt;
use minecraft_client_rs::Client;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::spawn_blocking;
use tracing::{error, info};

pub const FREEZE_COMMANDS: &[&str] = &["save-off", "save-all flush"];
pub const RESUME_COMMANDS: &[&str] = &["save-on"];

#[async_trait]
pub trait Console: Send + Sync {
    /// Open one session and send `commands` in order.
    async fn run(&self, commands: &[&str]) -> Result<()>;
}

/// RCON session per call, over the blocking `minecraft-client-rs` client.
///
/// Sessions run one at a time. A session abandoned after a timeout keeps its
/// blocking thread, so the next session waits for it and commands are never
/// delivered out of order.
pub struct RconConsole {
    address: String,
    password: String,
    timeout: Duration,
    session_gate: Arc<Mutex<()>>,
}

impl RconConsole {
    pub fn new(config: &RconConfig) -> Self {
        Self {
            address: config.address.clone(),
            password: config.password.clone(),
            timeout: config.timeout,
            session_gate: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait]
impl Console for RconConsole {
    async fn run(&self, commands: &[&str]) -> Result<()> {
        let address = self.address.clone();
        let password = self.password.clone();
        let commands: Vec<String> = commands.iter().map(|c| c.to_string()).collect();
        let gate = Arc::clone(&self.session_gate);

        let session = spawn_blocking(move || {
            let _turn = gate.lock().unwrap_or_else(PoisonError::into_inner);
            let mut client = Client::new(address).map_err(|err| err.to_string())?;
            client
                .authenticate(password)
                .map_err(|err| format!("authentication failed: {}", err))?;
            for command in commands {
                let response = client
                    .send_command(command.clone())
                    .map_err(|err| format!("{:?} failed: {}", command, err))?;
                info!("RCON {} -> {}", command, response.body.trim());
            }
            client.close().map_err(|err| err.to_string())?;
            Ok::<_, String>(())
        });

        match tokio::time::timeout(self.timeout, session).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(SyncError::Console(format!("{}: {}", self.address, e))),
            Ok(Err(e)) => Err(SyncError::Console(format!("RCON task failed: {}", e))),
            Err(_) => Err(SyncError::Console(format!(
                "{}: no response within {}s",
                self.address,
                self.timeout.as_secs()
            ))),
        }
    }
}

/// Freeze world saving, run `action`, then resume saving.
///
/// A failed freeze returns before `action` runs. The freeze session may have
/// got as far as `save-off` before failing, so the resume command is sent on
/// that path too, and on every exit from `action`, including errors and
/// panics. A failed resume is logged and never replaces the original outcome.
pub async fn with_frozen_world<F, Fut, T>(
    console: &dyn Console,
    settle: Duration,
    action: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    info!("Freezing world saves");
    if let Err(e) = console.run(FREEZE_COMMANDS).await {
        error!(error = %e, "Freeze failed; sending save-on in case saving was already off");
        resume(console).await;
        return Err(e);
    }

    let outcome = AssertUnwindSafe(async {
        if !settle.is_zero() {
            info!("Waiting {}s for pending writes to settle", settle.as_secs_f32());
            tokio::time::sleep(settle).await;
        }
        action().await
    })
    .catch_unwind()
    .await;

    resume(console).await;

    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

async fn resume(console: &dyn Console) {
    match console.run(RESUME_COMMANDS).await {
        Ok(()) => info!("World saves resumed"),
        Err(e) => error!(
            error = %e,
            "Failed to resume world saves; run `save-on` on the server console manually"
        ),
    }
}

/// Read RCON settings from `server.properties` under `server_root`.
///
/// Returns `None` when the file is missing or RCON is disabled.
pub fn load_rcon_settings(server_root: &Path) -> Result<Option<(String, String)>> {
    let properties_path = server_root.join("server.properties");
    let content = match std::fs::read_to_string(&properties_path) {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };

    let mut enabled = false;
    let mut port: Option<u16> = None;
    let mut password: Option<String> = None;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        match key.trim() {
            "enable-rcon" => enabled = value.trim().eq_ignore_ascii_case("true"),
            "rcon.port" => port = value.trim().parse::<u16>().ok(),
            "rcon.password" => {
                let val = value.trim();
                if !val.is_empty() {
                    password = Some(val.to_string());
                }
            }
            _ => {}
        }
    }

    if !enabled {
        return Ok(None);
    }

    let password = password.ok_or_else(|| {
        SyncError::Config(format!(
            "enable-rcon is set but rcon.password is empty in {}",
            properties_path.display()
        ))
    })?;
    let address = format!("127.0.0.1:{}", port.unwrap_or(25575));
    Ok(Some((address, password)))
}

#[cfg(test)]
mod tests {
    use super::recording::RecordingConsole;
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_freeze_action_resume_order() {
        let console = RecordingConsole::new();

        let value = with_frozen_world(&console, Duration::ZERO, || async { Ok(42) })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(console.commands(), vec!["save-off", "save-all flush", "save-on"]);
        assert_eq!(console.sessions(), 2);
    }

    #[tokio::test]
    async fn test_resume_runs_when_action_fails() {
        let console = RecordingConsole::new();

        let result: Result<()> = with_frozen_world(&console, Duration::ZERO, || async {
            Err(SyncError::Archive("disk full".into()))
        })
        .await;

        assert!(matches!(result, Err(SyncError::Archive(_))));
        assert_eq!(console.count("save-on"), 1);
    }

    #[tokio::test]
    async fn test_freeze_failure_skips_action() {
        let console = RecordingConsole::new();
        console.fail_on("save-off");
        let mut ran = false;

        let result = with_frozen_world(&console, Duration::ZERO, || {
            ran = true;
            async { Ok(()) }
        })
        .await;

        assert!(matches!(result, Err(SyncError::Console(_))));
        assert!(!ran);
        // Rejected save-off still gets a (harmless) save-on
        assert_eq!(console.count("save-on"), 1);
    }

    #[tokio::test]
    async fn test_partial_freeze_still_resumes() {
        let console = RecordingConsole::new();
        console.fail_on("save-all flush");
        let mut ran = false;

        let result = with_frozen_world(&console, Duration::ZERO, || {
            ran = true;
            async { Ok(()) }
        })
        .await;

        assert!(matches!(result, Err(SyncError::Console(_))));
        assert!(!ran);
        assert_eq!(console.commands(), vec!["save-off", "save-on"]);
        assert_eq!(console.count("save-on"), 1);
    }

    #[tokio::test]
    async fn test_freeze_error_survives_failed_resume() {
        let console = RecordingConsole::new();
        console.fail_on("save-all flush");
        console.fail_on("save-on");

        let result: Result<()> =
            with_frozen_world(&console, Duration::ZERO, || async { Ok(()) }).await;

        match result {
            Err(SyncError::Console(msg)) => assert!(msg.contains("save-all flush")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(console.sessions(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_session_blocks_the_next_one() {
        let console = RconConsole {
            address: "127.0.0.1:1".to_string(),
            password: "unused".to_string(),
            timeout: Duration::from_millis(50),
            session_gate: Arc::new(Mutex::new(())),
        };
        let gate = Arc::clone(&console.session_gate);
        let held = gate.lock().unwrap();

        let err = console.run(RESUME_COMMANDS).await.unwrap_err();
        assert!(matches!(err, SyncError::Console(ref msg) if msg.contains("no response")));
        drop(held);
    }

    #[tokio::test]
    async fn test_resume_failure_keeps_action_result() {
        let console = RecordingConsole::new();
        console.fail_on("save-on");

        let value = with_frozen_world(&console, Duration::ZERO, || async { Ok("archived") })
            .await
            .unwrap();
        assert_eq!(value, "archived");

        let result: Result<()> = with_frozen_world(&console, Duration::ZERO, || async {
            Err(SyncError::Archive("unreadable".into()))
        })
        .await;
        assert!(matches!(result, Err(SyncError::Archive(_))));
    }

    #[tokio::test]
    async fn test_resume_runs_when_action_panics() {
        let console = std::sync::Arc::new(RecordingConsole::new());
        let inner = console.clone();

        let handle = tokio::spawn(async move {
            let _: Result<()> = with_frozen_world(inner.as_ref(), Duration::ZERO, || async {
                let broken = true;
                if broken {
                    panic!("archiver bug");
                }
                Ok(())
            })
            .await;
        });

        assert!(handle.await.unwrap_err().is_panic());
        assert_eq!(console.count("save-on"), 1);
    }

    #[test]
    fn test_load_rcon_settings() -> Result<()> {
        let temp_dir = TempDir::new()?;
        std::fs::write(
            temp_dir.path().join("server.properties"),
            "# Minecraft server properties\nenable-rcon=true\nrcon.port=25580\nrcon.password=secret\n",
        )?;

        let (address, password) = load_rcon_settings(temp_dir.path())?.unwrap();
        assert_eq!(address, "127.0.0.1:25580");
        assert_eq!(password, "secret");
        Ok(())
    }

    #[test]
    fn test_rcon_disabled_or_missing() -> Result<()> {
        let temp_dir = TempDir::new()?;
        assert!(load_rcon_settings(temp_dir.path())?.is_none());

        std::fs::write(
            temp_dir.path().join("server.properties"),
            "enable-rcon=false\nrcon.password=secret\n",
        )?;
        assert!(load_rcon_settings(temp_dir.path())?.is_none());
        Ok(())
    }

    #[test]
    fn test_rcon_enabled_without_password() -> Result<()> {
        let temp_dir = TempDir::new()?;
        std::fs::write(temp_dir.path().join("server.properties"), "enable-rcon=true\n")?;
        assert!(matches!(load_rcon_settings(temp_dir.path()), Err(SyncError::Config(_))));
        Ok(())
    }
}
