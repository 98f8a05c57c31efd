//! Network join state machine.
//!
//! The protocol logic lives in [`transition`], a pure function from the current
//! [`ConnectionState`] and one [`JoinEvent`] to the next state plus the commands
//! to write. [`JoinMachine`] keeps the state and counts attempts;
//! [`JoinSession`] feeds it replies from a [`CommandChannel`] and writes what it
//! asks for.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::command::{Command, Uplink};
use crate::command_channel::{CommandChannel, ModemLink};
use crate::config::JoinConfig;
use crate::error::{Error, Result};
use crate::reader::Reply;
use crate::response::ResponseToken;

/// Connectivity as seen by the join state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    /// Join attempt `attempt` (1-based) is in flight.
    Joining { attempt: u32 },
    Connected,
    /// The transport went away.
    Failed(String),
    /// Every attempt up to the retry ceiling was refused.
    RetriesExhausted,
}

impl ConnectionState {
    /// No automatic transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected
                | ConnectionState::Failed(_)
                | ConnectionState::RetriesExhausted
        )
    }
}

/// Inputs of the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinEvent {
    /// Explicit request to (re)join.
    Start,
    /// A classified line from the device.
    Token(ResponseToken),
    /// The current attempt got no verdict within the attempt timeout.
    AttemptTimeout,
    /// The transport was closed or failed.
    Lost(String),
}

/// Compute the next state and the commands to issue for it.
pub fn transition(
    state: &ConnectionState,
    event: &JoinEvent,
    config: &JoinConfig,
) -> (ConnectionState, Vec<Command>) {
    use ConnectionState::*;

    match (state, event) {
        (_, JoinEvent::Lost(reason)) => (Failed(reason.clone()), Vec::new()),
        // never two attempts in flight
        (Joining { .. }, JoinEvent::Start) => (state.clone(), Vec::new()),
        (_, JoinEvent::Start) => (Joining { attempt: 1 }, config.mode.commands()),
        (Joining { .. }, JoinEvent::Token(ResponseToken::Accepted)) => (Connected, Vec::new()),
        (Joining { attempt }, JoinEvent::Token(token)) if token.is_join_failure() => {
            retry(*attempt, config)
        }
        (Joining { attempt }, JoinEvent::AttemptTimeout) => retry(*attempt, config),
        // busy, ok and anything else leave the state alone
        _ => (state.clone(), Vec::new()),
    }
}

fn retry(attempt: u32, config: &JoinConfig) -> (ConnectionState, Vec<Command>) {
    if attempt < config.max_retries {
        (
            ConnectionState::Joining {
                attempt: attempt + 1,
            },
            config.mode.commands(),
        )
    } else {
        (ConnectionState::RetriesExhausted, Vec::new())
    }
}

/// Holds the connection state of one join session.
#[derive(Debug, Clone)]
pub struct JoinMachine {
    config: JoinConfig,
    state: ConnectionState,
    attempts_issued: u32,
}

impl JoinMachine {
    pub fn new(config: JoinConfig) -> Self {
        JoinMachine {
            config,
            state: ConnectionState::Idle,
            attempts_issued: 0,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn config(&self) -> &JoinConfig {
        &self.config
    }

    /// Number of join command sets handed out so far.
    pub fn attempts_issued(&self) -> u32 {
        self.attempts_issued
    }

    pub fn start_join(&mut self) -> Vec<Command> {
        self.handle(JoinEvent::Start)
    }

    /// Apply one event; returns the commands to write, in order.
    pub fn handle(&mut self, event: JoinEvent) -> Vec<Command> {
        let (next, commands) = transition(&self.state, &event, &self.config);
        if next != self.state {
            match &next {
                ConnectionState::Joining { attempt } if *attempt > 1 => {
                    warn!("join attempt {} failed ({:?}), retrying", attempt - 1, event)
                }
                ConnectionState::RetriesExhausted => {
                    warn!("giving up after {} join attempts", self.attempts_issued)
                }
                _ => info!("connection state {:?} -> {:?}", self.state, next),
            }
        }
        if !commands.is_empty() {
            self.attempts_issued += 1;
        }
        self.state = next;
        commands
    }
}

/// Drives a [`JoinMachine`] over a live command channel.
pub struct JoinSession<'a> {
    channel: &'a mut CommandChannel,
    machine: JoinMachine,
    attempt_started: Instant,
}

impl<'a> JoinSession<'a> {
    pub fn new(channel: &'a mut CommandChannel, config: JoinConfig) -> Result<Self> {
        config.validate()?;
        Ok(JoinSession {
            channel,
            machine: JoinMachine::new(config),
            attempt_started: Instant::now(),
        })
    }

    pub fn state(&self) -> &ConnectionState {
        self.machine.state()
    }

    pub fn attempts_issued(&self) -> u32 {
        self.machine.attempts_issued()
    }

    /// Begin joining. Does nothing while an attempt is in flight.
    pub fn start_join(&mut self) -> Result<()> {
        let commands = self.machine.start_join();
        self.issue(commands)
    }

    fn issue(&mut self, commands: Vec<Command>) -> Result<()> {
        if commands.is_empty() {
            return Ok(());
        }
        for cmd in &commands {
            if let Err(e) = self.channel.send(cmd) {
                return Err(self.lost(e));
            }
        }
        self.attempt_started = Instant::now();
        Ok(())
    }

    fn lost(&mut self, e: Error) -> Error {
        if e.is_transport() {
            self.machine.handle(JoinEvent::Lost(e.to_string()));
        }
        e
    }

    /// Wait up to `timeout` for one line and feed it to the state machine.
    ///
    /// The line is handed back so callers can show it.
    pub fn poll(&mut self, timeout: Duration) -> Result<Option<Reply>> {
        let mut wait = timeout;
        let deadline = self.attempt_started + self.machine.config().attempt_timeout;
        let joining = matches!(self.state(), ConnectionState::Joining { .. });
        if joining {
            wait = wait.min(deadline.saturating_duration_since(Instant::now()));
        }

        let reply = match self.channel.next_reply(wait) {
            Ok(reply) => reply,
            Err(e) => return Err(self.lost(e)),
        };

        let commands = match &reply {
            Some(reply) => self.machine.handle(JoinEvent::Token(reply.token.clone())),
            None if joining && Instant::now() >= deadline => {
                self.machine.handle(JoinEvent::AttemptTimeout)
            }
            None => Vec::new(),
        };
        self.issue(commands)?;
        Ok(reply)
    }

    /// Join and block until connected or out of attempts.
    pub fn run(&mut self) -> Result<()> {
        if !matches!(self.state(), ConnectionState::Joining { .. }) {
            self.start_join()?;
        }
        let step = self.machine.config().attempt_timeout;
        while !self.state().is_terminal() {
            self.poll(step)?;
        }
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::RetriesExhausted => Err(Error::MaxRetriesExceeded {
                attempts: self.attempts_issued(),
            }),
            _ => Err(Error::Closed),
        }
    }

    /// Send an uplink. Only allowed once connected; a failed uplink does not
    /// trigger a new join.
    pub fn transmit(&mut self, uplink: Uplink, port: u8, payload: &[u8]) -> Result<()> {
        if *self.state() != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }
        let cmd = Command::transmit(uplink, port, payload)?;
        if let Err(e) = self.channel.send(&cmd) {
            return Err(self.lost(e));
        }
        Ok(())
    }
}
