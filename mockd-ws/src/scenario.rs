//! The per-connection scenario executor.
//!
//! `handle_message` runs on the connection's read loop and both
//! advances an `expect` step and wakes `run`, which executes in its own
//! spawned task. The two sides rendezvous through a one-slot buffered
//! signal: `handle_message` stashes the matched text and notifies;
//! `run` selects on {signal, timeout} and re-checks the slot after a
//! timeout fires, so a match landing exactly as the timer expires is
//! never lost.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::Notify;
use tracing::{debug, warn};

use mockd_core::config::{parse_duration, ScenarioConfig, ScenarioStep};
use mockd_core::matcher::{CompiledMatcher, MatchInput, MessageType};

use crate::connection::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioStatus {
    Pending,
    Playing,
    Waiting,
    Complete,
    Aborted,
}

pub struct ScenarioState {
    pub index: usize,
    pub started_at: Instant,
    pub step_started_at: Instant,
    pub completed: bool,
    pub status: ScenarioStatus,
    pub context: HashMap<String, serde_json::Value>,
}

impl ScenarioState {
    fn fresh() -> Self {
        let now = Instant::now();
        Self {
            index: 0,
            started_at: now,
            step_started_at: now,
            completed: false,
            status: ScenarioStatus::Pending,
            context: HashMap::new(),
        }
    }
}

struct CompiledStep {
    step: ScenarioStep,
    matcher: Option<CompiledMatcher>,
}

/// One compiled scenario attached to one connection. `reset_on_reconnect`
/// governs whether a fresh connection gets a fresh `ScenarioState` or
/// inherits a shared one — modeled here by whether the caller hands this
/// runtime a brand-new state or a state shared from a prior connection.
pub struct ScenarioRuntime {
    steps: Vec<CompiledStep>,
    loop_enabled: bool,
    state: Mutex<ScenarioState>,
    signal: Notify,
    slot: Mutex<Option<String>>,
}

impl ScenarioRuntime {
    pub fn compile(config: &ScenarioConfig) -> mockd_core::error::Result<Self> {
        let mut steps = Vec::with_capacity(config.steps.len());
        for step in &config.steps {
            let matcher = match step {
                ScenarioStep::Expect { matcher, .. } => Some(CompiledMatcher::compile(matcher)?),
                _ => None,
            };
            steps.push(CompiledStep {
                step: step.clone(),
                matcher,
            });
        }
        Ok(Self {
            steps,
            loop_enabled: config.r#loop,
            state: Mutex::new(ScenarioState::fresh()),
            signal: Notify::new(),
            slot: Mutex::new(None),
        })
    }

    pub fn status(&self) -> ScenarioStatus {
        self.state.lock().unwrap().status
    }

    /// Called from the connection's read loop.
    /// Returns `true` if the frame was consumed by the current `expect`
    /// step (in which case the caller must not also run the matcher
    /// pipeline on it).
    pub fn handle_message(&self, text: &str, message_type: MessageType) -> bool {
        let at_expect = {
            let state = self.state.lock().unwrap();
            matches!(self.steps.get(state.index).map(|s| &s.step), Some(ScenarioStep::Expect { .. }))
        };
        if !at_expect {
            return false;
        }
        let index = self.state.lock().unwrap().index;
        let Some(compiled) = self.steps.get(index) else { return false };
        let Some(matcher) = &compiled.matcher else { return false };
        let input = MatchInput::Payload { text, message_type };
        if matcher.matches(&input) {
            *self.slot.lock().unwrap() = Some(text.to_string());
            self.signal.notify_one();
            true
        } else {
            false
        }
    }

    /// Drive the scenario to completion (or abort), sending through
    /// `conn`. Spawned once per connection that attaches this scenario.
    pub async fn run(self: Arc<Self>, conn: Arc<Connection>) {
        {
            let mut state = self.state.lock().unwrap();
            state.status = ScenarioStatus::Playing;
        }
        loop {
            let index = self.state.lock().unwrap().index;
            let Some(compiled) = self.steps.get(index) else {
                self.finish(false);
                return;
            };
            match &compiled.step {
                ScenarioStep::Send { message, delay } => {
                    if let Some(delay) = delay {
                        if let Ok(d) = parse_duration(delay) {
                            tokio::time::sleep(d).await;
                        }
                    }
                    if conn.send_text(message.clone()).await.is_err() {
                        self.finish(true);
                        return;
                    }
                    self.advance();
                }
                ScenarioStep::Wait { duration } => {
                    if let Ok(d) = parse_duration(duration) {
                        tokio::time::sleep(d).await;
                    }
                    self.advance();
                }
                ScenarioStep::Expect { timeout, optional, .. } => {
                    self.set_waiting();
                    let timeout = parse_duration(timeout).unwrap_or(std::time::Duration::from_secs(5));
                    tokio::select! {
                        _ = self.signal.notified() => {
                            self.slot.lock().unwrap().take();
                            self.advance();
                        }
                        _ = tokio::time::sleep(timeout) => {
                            // Re-check the one-slot buffer: a match may have
                            // landed in the race between the timer firing and
                            // this task being scheduled.
                            let matched = self.slot.lock().unwrap().take().is_some();
                            if matched {
                                self.advance();
                            } else if *optional {
                                debug!("optional expect step timed out, advancing anyway");
                                self.advance();
                            } else {
                                warn!("scenario expect step timed out, aborting");
                                self.finish(true);
                                return;
                            }
                        }
                    }
                }
            }
            if self.state.lock().unwrap().index >= self.steps.len() {
                if self.loop_enabled {
                    let mut state = self.state.lock().unwrap();
                    state.index = 0;
                    state.step_started_at = Instant::now();
                } else {
                    self.finish(false);
                    return;
                }
            }
        }
    }

    fn advance(&self) {
        let mut state = self.state.lock().unwrap();
        state.index += 1;
        state.step_started_at = Instant::now();
        state.status = ScenarioStatus::Playing;
    }

    fn set_waiting(&self) {
        self.state.lock().unwrap().status = ScenarioStatus::Waiting;
    }

    fn finish(&self, aborted: bool) {
        let mut state = self.state.lock().unwrap();
        state.completed = true;
        state.status = if aborted { ScenarioStatus::Aborted } else { ScenarioStatus::Complete };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockd_core::config::ScenarioConfig;
    use mockd_core::matcher::MatcherConfig;
    use mockd_core::matcher::MatcherKind;

    fn send(msg: &str) -> ScenarioStep {
        ScenarioStep::Send {
            message: msg.to_string(),
            delay: None,
        }
    }

    #[test]
    fn compiles_mixed_step_kinds() {
        let cfg = ScenarioConfig {
            steps: vec![
                send("a"),
                ScenarioStep::Wait { duration: "10ms".into() },
                ScenarioStep::Expect {
                    matcher: MatcherConfig {
                        kind: MatcherKind::Exact,
                        pattern: "ack".into(),
                        path: None,
                        message_type: None,
                    },
                    timeout: "1s".into(),
                    optional: false,
                },
            ],
            r#loop: false,
            reset_on_reconnect: true,
        };
        let runtime = ScenarioRuntime::compile(&cfg).unwrap();
        assert_eq!(runtime.steps.len(), 3);
        assert_eq!(runtime.status(), ScenarioStatus::Pending);
    }

    #[test]
    fn handle_message_consumes_matching_expect_frame() {
        let cfg = ScenarioConfig {
            steps: vec![ScenarioStep::Expect {
                matcher: MatcherConfig {
                    kind: MatcherKind::Exact,
                    pattern: "ack".into(),
                    path: None,
                    message_type: None,
                },
                timeout: "1s".into(),
                optional: false,
            }],
            r#loop: false,
            reset_on_reconnect: true,
        };
        let runtime = ScenarioRuntime::compile(&cfg).unwrap();
        assert!(!runtime.handle_message("nope", MessageType::Text));
        assert!(runtime.handle_message("ack", MessageType::Text));
    }
}
