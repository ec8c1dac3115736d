//! A scripted speech service for exercising session plumbing in tests.

use super::{
    AssistantError, AssistantEvent, AssistantSession, SessionInput, SessionSetup,
    SpeechToSpeechService,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Replays `script` once connected and records every input it receives.
#[derive(Clone)]
pub struct ScriptedService {
    script: Vec<AssistantEvent>,
    fail: bool,
    /// Delay before `connect` returns
    connect_delay: Duration,
    /// Delay before inputs start being read
    input_delay: Duration,
    capacity: usize,
    pub inputs: Arc<Mutex<Vec<SessionInput>>>,
    pub setups: Arc<Mutex<Vec<SessionSetup>>>,
}

impl Default for ScriptedService {
    fn default() -> Self {
        Self {
            script: Vec::new(),
            fail: false,
            connect_delay: Duration::ZERO,
            input_delay: Duration::ZERO,
            capacity: 64,
            inputs: Arc::default(),
            setups: Arc::default(),
        }
    }
}

impl ScriptedService {
    pub fn new(script: Vec<AssistantEvent>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// A slow consumer: `capacity` inputs fit before the queue is full.
    pub fn with_stalled_input(mut self, capacity: usize, delay: Duration) -> Self {
        self.capacity = capacity;
        self.input_delay = delay;
        self
    }

    pub fn inputs(&self) -> Vec<SessionInput> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn count_audio(&self) -> usize {
        self.inputs()
            .iter()
            .filter(|input| matches!(input, SessionInput::Audio(_)))
            .count()
    }
}

#[async_trait]
impl SpeechToSpeechService for ScriptedService {
    async fn connect(&self, setup: SessionSetup) -> Result<AssistantSession, AssistantError> {
        if self.fail {
            return Err(AssistantError::Connection("scripted failure".to_string()));
        }
        tokio::time::sleep(self.connect_delay).await;
        self.setups.lock().unwrap().push(setup);

        let (input_tx, mut input_rx) = mpsc::channel(self.capacity);
        let (event_tx, event_rx) = mpsc::channel(64);

        let inputs = self.inputs.clone();
        let script = self.script.clone();
        let input_delay = self.input_delay;
        tokio::spawn(async move {
            for event in script {
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
            tokio::time::sleep(input_delay).await;
            while let Some(input) = input_rx.recv().await {
                let close = input == SessionInput::Close;
                inputs.lock().unwrap().push(input);
                if close {
                    break;
                }
            }
            // event_tx drops here, ending the caller's event stream
        });

        Ok(AssistantSession {
            input: input_tx,
            events: event_rx,
        })
    }
}
