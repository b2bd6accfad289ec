//! Deterministic replay of a sealed recording. Three modes share one `ReplayEngine`:
//! *pure* timing playback, *synchronized* waiting on matching client
//! input, and *triggered* external advance-N commands.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::Notify;
use tracing::warn;

use mockd_core::collaborators::{Direction, RecordedFrame};

use crate::connection::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    Pure,
    Synchronized,
    Triggered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStatus {
    Pending,
    Playing,
    Waiting,
    Complete,
    Aborted,
}

pub struct ReplayProgress {
    pub current_frame: usize,
    pub total_frames: usize,
    pub frames_sent: usize,
    pub elapsed: std::time::Duration,
}

struct ReplayState {
    status: ReplayStatus,
    current_frame: usize,
    frames_sent: usize,
    started_at: Instant,
}

pub struct ReplayEngine {
    frames: Vec<RecordedFrame>,
    mode: ReplayMode,
    timing_scale: f64,
    sync_timeout: std::time::Duration,
    state: Mutex<ReplayState>,
    // Synchronized-mode rendezvous: same one-slot-buffer shape as the
    // scenario executor's `expect` race.
    inbound_slot: Mutex<Option<Vec<u8>>>,
    inbound_signal: Notify,
    // Triggered-mode advance credits.
    advance_credits: AtomicUsize,
    advance_signal: Notify,
}

impl ReplayEngine {
    pub fn new(frames: Vec<RecordedFrame>, mode: ReplayMode, timing_scale: f64, sync_timeout: std::time::Duration) -> Self {
        Self {
            frames,
            mode,
            timing_scale: if timing_scale > 0.0 { timing_scale } else { 1.0 },
            sync_timeout,
            state: Mutex::new(ReplayState {
                status: ReplayStatus::Pending,
                current_frame: 0,
                frames_sent: 0,
                started_at: Instant::now(),
            }),
            inbound_slot: Mutex::new(None),
            inbound_signal: Notify::new(),
            advance_credits: AtomicUsize::new(0),
            advance_signal: Notify::new(),
        }
    }

    pub fn status(&self) -> ReplayStatus {
        self.state.lock().unwrap().status
    }

    pub fn progress(&self) -> ReplayProgress {
        let state = self.state.lock().unwrap();
        ReplayProgress {
            current_frame: state.current_frame,
            total_frames: self.frames.len(),
            frames_sent: state.frames_sent,
            elapsed: state.started_at.elapsed(),
        }
    }

    /// Fed by the connection's read loop while a synchronized replay is
    /// active.
    pub fn handle_inbound(&self, payload: &[u8]) {
        *self.inbound_slot.lock().unwrap() = Some(payload.to_vec());
        self.inbound_signal.notify_one();
    }

    /// External "advance N" command for triggered mode.
    pub fn advance(&self, n: usize) {
        self.advance_credits.fetch_add(n, Ordering::AcqRel);
        self.advance_signal.notify_one();
    }

    pub async fn run(self: std::sync::Arc<Self>, conn: std::sync::Arc<Connection>) {
        {
            let mut state = self.state.lock().unwrap();
            state.status = ReplayStatus::Playing;
            state.started_at = Instant::now();
        }
        match self.mode {
            ReplayMode::Pure => self.run_pure(&conn).await,
            ReplayMode::Synchronized => self.run_synchronized(&conn).await,
            ReplayMode::Triggered => self.run_triggered(&conn).await,
        }
        let mut state = self.state.lock().unwrap();
        if state.status != ReplayStatus::Aborted {
            state.status = ReplayStatus::Complete;
        }
    }

    async fn send_frame(&self, conn: &Connection, frame: &RecordedFrame) -> bool {
        let text = String::from_utf8_lossy(&frame.payload).to_string();
        let ok = conn.send_text(text).await.is_ok();
        if ok {
            self.state.lock().unwrap().frames_sent += 1;
        }
        ok
    }

    async fn run_pure(&self, conn: &Connection) {
        let mut previous_ms = 0u64;
        for (i, frame) in self.frames.iter().enumerate() {
            self.state.lock().unwrap().current_frame = i;
            if frame.direction != Direction::ServerToClient {
                continue;
            }
            let delta_ms = frame.relative_millis.saturating_sub(previous_ms);
            previous_ms = frame.relative_millis;
            let scaled = (delta_ms as f64 * self.timing_scale) as u64;
            if scaled > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(scaled)).await;
            }
            if !self.send_frame(conn, frame).await {
                self.abort();
                return;
            }
        }
    }

    async fn run_synchronized(&self, conn: &Connection) {
        for (i, frame) in self.frames.iter().enumerate() {
            self.state.lock().unwrap().current_frame = i;
            match frame.direction {
                Direction::ServerToClient => {
                    if !self.send_frame(conn, frame).await {
                        self.abort();
                        return;
                    }
                }
                Direction::ClientToServer => {
                    self.state.lock().unwrap().status = ReplayStatus::Waiting;
                    if !self.wait_for_match(&frame.payload).await {
                        warn!("synchronized replay timed out waiting for matching client input");
                        self.abort();
                        return;
                    }
                    self.state.lock().unwrap().status = ReplayStatus::Playing;
                }
            }
        }
    }

    /// Wait (bounded by `sync_timeout`) for an inbound frame equal to
    /// `expected`; mismatches keep waiting rather than failing
    /// immediately.
    async fn wait_for_match(&self, expected: &[u8]) -> bool {
        let deadline = Instant::now() + self.sync_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.inbound_slot.lock().unwrap().as_deref() == Some(expected);
            }
            tokio::select! {
                _ = self.inbound_signal.notified() => {
                    let got = self.inbound_slot.lock().unwrap().take();
                    if got.as_deref() == Some(expected) {
                        return true;
                    }
                    // mismatch: keep waiting for the next inbound frame
                }
                _ = tokio::time::sleep(remaining) => {
                    return self.inbound_slot.lock().unwrap().as_deref() == Some(expected);
                }
            }
        }
    }

    async fn run_triggered(&self, conn: &Connection) {
        let server_frames: Vec<&RecordedFrame> = self
            .frames
            .iter()
            .filter(|f| f.direction == Direction::ServerToClient)
            .collect();
        let mut cursor = 0usize;
        while cursor < server_frames.len() {
            self.state.lock().unwrap().status = ReplayStatus::Waiting;
            while self.advance_credits.load(Ordering::Acquire) == 0 {
                self.advance_signal.notified().await;
            }
            self.state.lock().unwrap().status = ReplayStatus::Playing;
            let mut credits = self.advance_credits.swap(0, Ordering::AcqRel);
            while credits > 0 && cursor < server_frames.len() {
                if !self.send_frame(conn, server_frames[cursor]).await {
                    self.abort();
                    return;
                }
                self.state.lock().unwrap().current_frame = cursor;
                cursor += 1;
                credits -= 1;
            }
        }
    }

    fn abort(&self) {
        self.state.lock().unwrap().status = ReplayStatus::Aborted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ms: u64, dir: Direction, payload: &str) -> RecordedFrame {
        RecordedFrame {
            relative_millis: ms,
            direction: dir,
            message_type: mockd_core::collaborators::FrameMessageType::Text,
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[test]
    fn progress_reports_total_frame_count() {
        let frames = vec![
            frame(0, Direction::ServerToClient, "a"),
            frame(50, Direction::ServerToClient, "b"),
        ];
        let engine = ReplayEngine::new(frames, ReplayMode::Pure, 1.0, std::time::Duration::from_secs(1));
        assert_eq!(engine.progress().total_frames, 2);
        assert_eq!(engine.status(), ReplayStatus::Pending);
    }

    #[test]
    fn advance_credits_accumulate() {
        let engine = ReplayEngine::new(vec![], ReplayMode::Triggered, 1.0, std::time::Duration::from_secs(1));
        engine.advance(2);
        engine.advance(1);
        assert_eq!(engine.advance_credits.load(Ordering::Acquire), 3);
    }
}
