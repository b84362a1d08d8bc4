//! Shared test utilities
//!
//! Scripted stand-ins for the microphone, speaker and the external
//! collaborators. Every stand-in writes to a shared [`Log`] stamped with the
//! tokio clock, so paused-time tests can assert on ordering and gaps.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use voice_relay::reasoner::{QueryOutcome, Reasoner};
use voice_relay::voice::{
    AudioFrame, AudioSink, EndpointRecorder, EnergyVad, FrameSource, GateSettings,
    PlaybackGuard, RecordingSettings, Scores, Synthesizer, Transcriber, WakeGate, WakeModel,
    Waveform,
};
use voice_relay::{Error, Result, TurnController, TurnParts, TurnSettings};

/// Amplitude of a speech frame
pub const SPEECH: i16 = 12000;

/// Amplitude of a silent frame
pub const SILENCE: i16 = 0;

/// Samples per wake frame
pub const WAKE_FRAME: usize = 1280;

/// Frames discarded after each open
pub const WARMUP: usize = 2;

/// Settle delay used by the harness
pub const SETTLE: Duration = Duration::from_millis(1500);

/// What happened, in order
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Opened,
    Closed,
    PlayStarted,
    PlayEnded,
    Transcribed,
    Queried { prompt: String, session: String },
    Synthesized(String),
}

#[derive(Debug, Clone)]
pub struct Event {
    pub at: Instant,
    pub kind: EventKind,
}

/// Shared event log
#[derive(Debug, Clone, Default)]
pub struct Log(Arc<Mutex<Vec<Event>>>);

impl Log {
    pub fn push(&self, kind: EventKind) {
        self.0.lock().unwrap().push(Event {
            at: Instant::now(),
            kind,
        });
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&EventKind) -> bool) -> usize {
        self.events().iter().filter(|e| pred(&e.kind)).count()
    }

    pub fn queries(&self) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e.kind {
                EventKind::Queried { prompt, session } => Some((prompt, session)),
                _ => None,
            })
            .collect()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e.kind {
                EventKind::Synthesized(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

/// One step of a scripted microphone
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// A frame filled with this amplitude
    Frame(i16),
    /// A failed read
    Fail,
}

/// Microphone that replays a script in real (tokio) time
///
/// Each frame takes its own duration to arrive. An exhausted script reports
/// a device error.
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    log: Log,
    open: bool,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = Step>, log: Log) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            log,
            open: false,
        }
    }
}

#[async_trait(?Send)]
impl FrameSource for ScriptedSource {
    fn open(&mut self) -> Result<()> {
        self.open = true;
        self.log.push(EventKind::Opened);
        Ok(())
    }

    async fn next_frame(&mut self, size: usize) -> Result<AudioFrame> {
        if !self.open {
            return Err(Error::Device("read from closed source".to_string()));
        }
        let step = self
            .steps
            .pop_front()
            .ok_or_else(|| Error::Device("microphone unplugged".to_string()))?;
        let frame = AudioFrame::new(vec![0; size]);
        tokio::time::sleep(frame.duration()).await;
        match step {
            Step::Frame(level) => Ok(AudioFrame::new(vec![level; size])),
            Step::Fail => Err(Error::Device("buffer overrun".to_string())),
        }
    }

    fn drain(&mut self) {}

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.log.push(EventKind::Closed);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Wake model replaying per-frame scores; frames past the script score nothing
pub struct ScriptedWake {
    scores: VecDeque<Result<Scores>>,
    pub resets: Arc<Mutex<usize>>,
    pub seen: Arc<Mutex<Vec<i16>>>,
}

impl ScriptedWake {
    pub fn new(scores: impl IntoIterator<Item = Result<Scores>>) -> Self {
        Self {
            scores: scores.into_iter().collect(),
            resets: Arc::default(),
            seen: Arc::default(),
        }
    }

    /// One label's scores, frame by frame
    pub fn single(label: &str, scores: &[f32]) -> Self {
        Self::new(scores.iter().map(|&s| Ok(scores_of(&[(label, s)]))))
    }
}

#[async_trait(?Send)]
impl WakeModel for ScriptedWake {
    async fn predict(&mut self, frame: &AudioFrame) -> Result<Scores> {
        self.seen
            .lock()
            .unwrap()
            .push(frame.samples().first().copied().unwrap_or(0));
        self.scores.pop_front().unwrap_or_else(|| Ok(Scores::new()))
    }

    fn reset(&mut self) {
        *self.resets.lock().unwrap() += 1;
    }
}

/// Stateful model: confidence is the running mean energy since the last reset
#[derive(Default)]
pub struct AccumulatingWake {
    total: f32,
    frames: f32,
}

#[async_trait(?Send)]
impl WakeModel for AccumulatingWake {
    async fn predict(&mut self, frame: &AudioFrame) -> Result<Scores> {
        self.total += frame.rms();
        self.frames += 1.0;
        Ok(scores_of(&[("assistant", self.total / self.frames)]))
    }

    fn reset(&mut self) {
        self.total = 0.0;
        self.frames = 0.0;
    }
}

pub fn scores_of(pairs: &[(&str, f32)]) -> Scores {
    pairs
        .iter()
        .map(|(label, score)| ((*label).to_string(), *score))
        .collect::<HashMap<_, _>>()
}

/// Transcriber replaying a script; each call takes one second
pub struct ScriptedTranscriber {
    replies: Mutex<VecDeque<Result<String>>>,
    log: Log,
}

impl ScriptedTranscriber {
    pub fn new(replies: impl IntoIterator<Item = Result<String>>, log: Log) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            log,
        }
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        assert!(wav.starts_with(b"RIFF"), "transcriber expects WAV bytes");
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.log.push(EventKind::Transcribed);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Reasoner replaying a script of outcomes
pub struct ScriptedReasoner {
    outcomes: Mutex<VecDeque<QueryOutcome>>,
    log: Log,
}

impl ScriptedReasoner {
    pub fn new(outcomes: impl IntoIterator<Item = QueryOutcome>, log: Log) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            log,
        }
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn query(&self, prompt: &str, session_id: &str) -> QueryOutcome {
        self.log.push(EventKind::Queried {
            prompt: prompt.to_string(),
            session: session_id.to_string(),
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| QueryOutcome::Reply("okay".to_string()))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Synthesizer producing one second of silence, failing for texts it is told to
pub struct ScriptedSynth {
    fail_on: Vec<String>,
    log: Log,
}

impl ScriptedSynth {
    pub fn new(log: Log) -> Self {
        Self {
            fail_on: Vec::new(),
            log,
        }
    }

    pub fn failing_on(mut self, fragment: &str) -> Self {
        self.fail_on.push(fragment.to_string());
        self
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynth {
    async fn synthesize(&self, text: &str) -> Result<Waveform> {
        self.log.push(EventKind::Synthesized(text.to_string()));
        if self.fail_on.iter().any(|f| text.contains(f.as_str())) {
            return Err(Error::Synthesis("voice unavailable".to_string()));
        }
        Ok(Waveform::new(vec![0.0; 16000], 16000))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Speaker that takes the waveform's length to play it
pub struct LoggingSink {
    log: Log,
}

impl LoggingSink {
    pub const fn new(log: Log) -> Self {
        Self { log }
    }
}

#[async_trait(?Send)]
impl AudioSink for LoggingSink {
    async fn play(&mut self, waveform: &Waveform) -> Result<()> {
        self.log.push(EventKind::PlayStarted);
        tokio::time::sleep(waveform.duration()).await;
        self.log.push(EventKind::PlayEnded);
        Ok(())
    }
}

/// Recording limits: 30 ms frames, 3 silent frames end, 10 frames max
pub fn recording_settings() -> RecordingSettings {
    RecordingSettings {
        max_duration: Duration::from_millis(300),
        silence_duration: Duration::from_millis(90),
        frame_duration: Duration::from_millis(30),
        max_read_retries: 2,
    }
}

/// Microphone steps for one turn: warm-up, wake frames, then the command
pub fn turn_steps(wake_frames: usize, command: &[Step]) -> Vec<Step> {
    std::iter::repeat_n(Step::Frame(SILENCE), WARMUP + wake_frames)
        .chain(command.iter().copied())
        .collect()
}

/// A spoken command: speech followed by enough silence to end it
pub fn spoken_command() -> Vec<Step> {
    let mut steps = vec![Step::Frame(SPEECH); 2];
    steps.extend([Step::Frame(SILENCE); 3]);
    steps
}

pub fn gate(model: impl WakeModel + 'static, labels: &[&str]) -> WakeGate {
    WakeGate::new(
        Box::new(model),
        GateSettings {
            labels: labels.iter().map(ToString::to_string).collect(),
            frame_samples: WAKE_FRAME,
            warmup_frames: WARMUP,
        },
    )
}

/// Scripted collaborators for a controller
pub struct Script {
    pub steps: Vec<Step>,
    pub wake: ScriptedWake,
    pub transcripts: Vec<Result<String>>,
    pub outcomes: Vec<QueryOutcome>,
    pub synth_fails_on: Option<&'static str>,
    pub conversation_timeout: Duration,
}

impl Script {
    /// `turns` clean turns: detection on the first scored frame, a spoken command
    pub fn turns(turns: usize) -> Self {
        let mut steps = Vec::new();
        let mut scores = Vec::new();
        for _ in 0..turns {
            steps.extend(turn_steps(1, &spoken_command()));
            scores.push(Ok(scores_of(&[("assistant", 0.9)])));
        }
        Self {
            steps,
            wake: ScriptedWake::new(scores),
            transcripts: (0..turns)
                .map(|i| Ok(format!("command number {i}")))
                .collect(),
            outcomes: Vec::new(),
            synth_fails_on: None,
            conversation_timeout: Duration::from_secs(900),
        }
    }

    pub fn build(self, log: &Log) -> TurnController {
        let mut synth = ScriptedSynth::new(log.clone());
        if let Some(fragment) = self.synth_fails_on {
            synth = synth.failing_on(fragment);
        }

        let guard = PlaybackGuard::new(
            Box::new(LoggingSink::new(log.clone())),
            Arc::new(synth),
            SETTLE,
            Duration::from_secs(3),
        );

        let parts = TurnParts {
            source: Box::new(ScriptedSource::new(self.steps, log.clone())),
            gate: gate(self.wake, &["assistant"]),
            recorder: EndpointRecorder::new(Box::new(EnergyVad::default())),
            transcriber: Arc::new(ScriptedTranscriber::new(self.transcripts, log.clone())),
            reasoner: Arc::new(ScriptedReasoner::new(self.outcomes, log.clone())),
            guard,
            notification: Waveform::new(vec![0.0; 1600], 16000),
        };

        TurnController::new(
            parts,
            TurnSettings {
                threshold: 0.5,
                recording: recording_settings(),
                conversation_timeout: self.conversation_timeout,
            },
        )
    }
}
