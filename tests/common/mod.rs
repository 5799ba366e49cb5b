//! Shared fakes for the scenario tests: scripted TTS and mixer adapters over
//! the in-memory store.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use narrator::adapters::{AudioMixer, SpeechSynthesizer};
use narrator::core::{RetryPolicy, Worker, WorkerSettings};
use narrator::domain::{Meditation, NewMeditation};
use narrator::store::{MediaStore, MemoryStore};

/// One scripted provider response
#[derive(Debug, Clone)]
pub enum Reply {
    Ok,
    Fail(&'static str),
    /// Sleep this long, then succeed
    Delay(Duration),
}

/// Replays queued replies in order, then succeeds forever
#[derive(Default)]
pub struct Script {
    replies: Mutex<VecDeque<Reply>>,
    calls: AtomicUsize,
}

impl Script {
    pub fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn next(&self, prefix: &str) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Ok);
        match reply {
            Reply::Ok => Ok(format!("{}/{}.mp3", prefix, n)),
            Reply::Fail(message) => anyhow::bail!("{}", message),
            Reply::Delay(wait) => {
                tokio::time::sleep(wait).await;
                Ok(format!("{}/{}.mp3", prefix, n))
            }
        }
    }
}

#[derive(Default)]
pub struct FakeTts {
    pub script: Script,
    /// Text of every synthesize call
    pub texts: Mutex<Vec<String>>,
}

#[async_trait]
impl SpeechSynthesizer for FakeTts {
    fn name(&self) -> &str {
        "fake-tts"
    }

    async fn synthesize(&self, text: &str) -> Result<String> {
        self.texts.lock().unwrap().push(text.to_string());
        self.script.next("https://tts.test/narration").await
    }
}

#[derive(Default)]
pub struct FakeMixer {
    pub script: Script,
}

#[async_trait]
impl AudioMixer for FakeMixer {
    fn name(&self) -> &str {
        "fake-mixer"
    }

    async fn mix(&self, _narration_url: &str, _ambient_url: &str) -> Result<String> {
        self.script.next("https://mix.test/final").await
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub tts: Arc<FakeTts>,
    pub mixer: Arc<FakeMixer>,
    pub worker: Arc<Worker>,
}

/// Short timeouts and no backoff so scenarios finish quickly
pub fn fast_settings() -> WorkerSettings {
    WorkerSettings {
        interval_seconds: 1,
        tts_timeout_seconds: 2,
        mix_timeout_seconds: 2,
        retry: RetryPolicy::default(),
    }
}

pub fn harness() -> Harness {
    harness_with(fast_settings(), true)
}

pub fn harness_with(settings: WorkerSettings, with_mixer: bool) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let tts = Arc::new(FakeTts::default());
    let mixer = Arc::new(FakeMixer::default());

    let mixer_dyn: Option<Arc<dyn AudioMixer>> = if with_mixer {
        Some(mixer.clone())
    } else {
        None
    };

    let worker = Worker::new(store.clone(), store.clone(), tts.clone(), mixer_dyn, settings)
        .expect("valid worker settings");
    let worker = Arc::new(worker);

    Harness {
        store,
        tts,
        mixer,
        worker,
    }
}

pub async fn seed(store: &MemoryStore, new: NewMeditation) -> Meditation {
    let meditation = Meditation::from_new(new);
    store.insert_meditation(&meditation).await.unwrap();
    meditation
}
