//! Test helpers: a scripted host for exercising reconciliation and dispatch

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::host::Host;

#[derive(Default)]
struct FakeState {
    /// Scripted stdout per command line; a missing entry means "failed to start"
    responses: HashMap<String, String>,
    live_pids: HashSet<u32>,
    regular_files: HashSet<PathBuf>,
    next_spawn_pid: Option<u32>,
    root: bool,
    commands: Vec<String>,
    /// Timeout passed with each entry of `commands`
    timeouts: Vec<Duration>,
    spawned: Vec<String>,
    terminated: Vec<u32>,
}

/// Scripted [`Host`] that records every command it is asked to run.
#[derive(Default)]
pub(crate) struct FakeHost {
    state: Mutex<FakeState>,
}

fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `command` (program and args joined by spaces) print `stdout`
    pub fn respond(&self, command: &str, stdout: &str) -> &Self {
        self.lock().responses.insert(command.to_string(), stdout.to_string());
        self
    }

    /// Make `command` fail to start again
    pub fn forget(&self, command: &str) -> &Self {
        self.lock().responses.remove(command);
        self
    }

    pub fn set_alive(&self, pid: u32, alive: bool) -> &Self {
        let mut state = self.lock();
        if alive {
            state.live_pids.insert(pid);
        } else {
            state.live_pids.remove(&pid);
        }
        drop(state);
        self
    }

    pub fn add_regular_file(&self, path: &str) -> &Self {
        self.lock().regular_files.insert(PathBuf::from(path));
        self
    }

    pub fn set_spawn_pid(&self, pid: Option<u32>) -> &Self {
        self.lock().next_spawn_pid = pid;
        self
    }

    pub fn set_root(&self, root: bool) -> &Self {
        self.lock().root = root;
        self
    }

    /// Every command passed to `run`, in order
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Timeouts `command` was run with, in order
    pub fn timeouts_for(&self, command: &str) -> Vec<Duration> {
        let state = self.lock();
        state
            .commands
            .iter()
            .zip(&state.timeouts)
            .filter(|(line, _)| line.as_str() == command)
            .map(|(_, timeout)| *timeout)
            .collect()
    }

    pub fn spawned(&self) -> Vec<String> {
        self.lock().spawned.clone()
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.lock().terminated.clone()
    }

    /// Commands whose line contains `needle`
    pub fn commands_matching(&self, needle: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.contains(needle))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake host mutex poisoned")
    }
}

impl Host for FakeHost {
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Option<String> {
        let line = command_line(program, args);
        let mut state = self.lock();
        state.commands.push(line.clone());
        state.timeouts.push(timeout);
        state.responses.get(&line).cloned()
    }

    fn spawn_detached(&self, program: &str, args: &[&str]) -> Option<u32> {
        let mut state = self.lock();
        state.spawned.push(command_line(program, args));
        let pid = state.next_spawn_pid?;
        state.live_pids.insert(pid);
        Some(pid)
    }

    fn terminate(&self, pid: u32) -> bool {
        let mut state = self.lock();
        state.terminated.push(pid);
        state.live_pids.remove(&pid)
    }

    fn process_exists(&self, pid: u32) -> bool {
        self.lock().live_pids.contains(&pid)
    }

    fn is_regular_file(&self, path: &Path) -> bool {
        self.lock().regular_files.contains(path)
    }

    fn is_root(&self) -> bool {
        self.lock().root
    }
}
