//! In-memory [`AudioSink`] used by the session and registry tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{collections::HashSet, sync::Arc};

use super::sink::{AudioSink, Completion, PlaybackEnd};
use crate::error::SinkError;

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Begin(String),
    Pause,
    Resume,
    Halt,
    Volume(f32),
    Release,
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<SinkCall>,
    completions: Vec<Completion>,
    failing: HashSet<String>,
    disconnected: bool,
    playing: bool,
    paused: bool,
}

/// Records every call and lets the test decide when tracks end.
#[derive(Debug, Clone, Default)]
pub struct FakeSink {
    state: Arc<Mutex<FakeState>>,
}

impl FakeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed(&self) -> Box<dyn AudioSink> {
        Box::new(self.clone())
    }

    /// `begin` fails for this locator with a recoverable error.
    pub fn fail_locator(&self, locator: &str) {
        self.state.lock().failing.insert(locator.to_string());
    }

    /// Every further `begin` reports a lost connection.
    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.state.lock().calls.clone()
    }

    pub fn began(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Begin(locator) => Some(locator),
                _ => None,
            })
            .collect()
    }

    pub fn release_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == SinkCall::Release)
            .count()
    }

    /// Natural end of the most recently started track.
    pub fn finish_current(&self) -> bool {
        self.end_current(PlaybackEnd::Finished)
    }

    pub fn end_current(&self, end: PlaybackEnd) -> bool {
        let completion = {
            let mut state = self.state.lock();
            state.playing = false;
            state.paused = false;
            state.completions.last().cloned()
        };
        completion.map(|c| c.finish(end)).unwrap_or(false)
    }

    /// Fires the completion handed over by the `index`-th `begin`.
    pub fn finish_nth(&self, index: usize) -> bool {
        let completion = self.state.lock().completions.get(index).cloned();
        completion
            .map(|c| c.finish(PlaybackEnd::Finished))
            .unwrap_or(false)
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn begin(&self, locator: &str, on_finished: Completion) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        state.calls.push(SinkCall::Begin(locator.to_string()));
        if state.disconnected {
            return Err(SinkError::Disconnected("sin conexión".into()));
        }
        if state.failing.contains(locator) {
            return Err(SinkError::Track(format!("403 en {}", locator)));
        }
        state.completions.push(on_finished);
        state.playing = true;
        state.paused = false;
        Ok(())
    }

    async fn pause(&self) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        state.calls.push(SinkCall::Pause);
        state.playing = false;
        state.paused = true;
        Ok(())
    }

    async fn resume(&self) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        state.calls.push(SinkCall::Resume);
        state.playing = true;
        state.paused = false;
        Ok(())
    }

    async fn halt_early(&self) -> Result<(), SinkError> {
        // Igual que songbird: detener dispara el evento de fin
        let completion = {
            let mut state = self.state.lock();
            state.calls.push(SinkCall::Halt);
            state.playing = false;
            state.paused = false;
            state.completions.last().cloned()
        };
        if let Some(completion) = completion {
            completion.finish(PlaybackEnd::Finished);
        }
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> Result<(), SinkError> {
        self.state.lock().calls.push(SinkCall::Volume(volume));
        Ok(())
    }

    async fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    async fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    async fn release(&self) {
        let mut state = self.state.lock();
        state.calls.push(SinkCall::Release);
        state.playing = false;
        state.paused = false;
    }
}
