//! Console double that records commands instead of sending them.

use super::Console;
use crate::utils::{Result, SyncError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Recorded {
    commands: Vec<String>,
    sessions: usize,
    failing: HashSet<String>,
}

/// Records every session and command; can be told to fail on a command.
#[derive(Default)]
pub struct RecordingConsole {
    state: Mutex<Recorded>,
}

impl RecordingConsole {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Recorded> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make any session containing `command` fail at that command.
    pub fn fail_on(&self, command: &str) {
        self.state().failing.insert(command.to_string());
    }

    /// Commands successfully sent, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.state().commands.iter().filter(|c| *c == command).count()
    }

    /// Sessions opened, failed ones included.
    pub fn sessions(&self) -> usize {
        self.state().sessions
    }
}

#[async_trait]
impl Console for RecordingConsole {
    async fn run(&self, commands: &[&str]) -> Result<()> {
        let mut state = self.state();
        state.sessions += 1;
        for command in commands {
            if state.failing.contains(*command) {
                return Err(SyncError::Console(format!("{:?} rejected", command)));
            }
            state.commands.push(command.to_string());
        }
        Ok(())
    }
}
