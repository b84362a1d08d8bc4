//! Voice pipeline integration tests
//!
//! Tests the wake gate and recorder without requiring audio hardware

use std::time::Duration;

use voice_relay::Error;
use std::sync::Arc;

use voice_relay::voice::{
    AudioFrame, EndpointRecorder, EnergyVad, FrameSource, StopReason, TranscriptSpotter,
    samples_to_wav,
};

mod common;

use common::{
    AccumulatingWake, Log, SILENCE, SPEECH, ScriptedSource, ScriptedTranscriber, ScriptedWake,
    Step, WARMUP, gate, recording_settings, scores_of, turn_steps,
};

fn frame(level: i16) -> AudioFrame {
    AudioFrame::new(vec![level; common::WAKE_FRAME])
}

#[tokio::test(start_paused = true)]
async fn test_detection_fires_on_third_frame() {
    let log = Log::default();
    let mut source = ScriptedSource::new(turn_steps(3, &[]), log.clone());
    let mut gate = gate(ScriptedWake::single("assistant", &[0.1, 0.3, 0.6]), &["assistant"]);

    let detection = gate.listen_until_detected(&mut source, 0.5).await.unwrap();

    assert_eq!(detection.label, "assistant");
    assert!((detection.confidence - 0.6).abs() < f32::EPSILON);
    assert_eq!(detection.frames_scored, 3);
    assert!(!source.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_threshold_is_inclusive() {
    let mut source = ScriptedSource::new(turn_steps(2, &[]), Log::default());
    let mut gate = gate(ScriptedWake::single("assistant", &[0.49, 0.5]), &["assistant"]);

    let detection = gate.listen_until_detected(&mut source, 0.5).await.unwrap();
    assert_eq!(detection.frames_scored, 2);
}

#[tokio::test(start_paused = true)]
async fn test_tie_goes_to_first_configured_label() {
    let mut source = ScriptedSource::new(turn_steps(1, &[]), Log::default());
    let model = ScriptedWake::new([Ok(scores_of(&[("suto", 0.9), ("sudo", 0.7)]))]);
    let mut gate = gate(model, &["sudo", "suto"]);

    let detection = gate.listen_until_detected(&mut source, 0.5).await.unwrap();
    assert_eq!(detection.label, "sudo");
    assert!((detection.confidence - 0.7).abs() < f32::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn test_scoring_error_counts_as_zero() {
    let mut source = ScriptedSource::new(turn_steps(3, &[]), Log::default());
    let model = ScriptedWake::new([
        Err(Error::Scoring("onnx session lost".to_string())),
        Ok(scores_of(&[("assistant", 0.2)])),
        Ok(scores_of(&[("assistant", 0.8)])),
    ]);
    let mut gate = gate(model, &["assistant"]);

    let detection = gate.listen_until_detected(&mut source, 0.5).await.unwrap();
    assert_eq!(detection.frames_scored, 3);
}

#[tokio::test]
async fn test_scores_are_clamped_and_ordered() {
    let model = ScriptedWake::new([Ok(scores_of(&[("b", 1.7), ("a", -0.2)]))]);
    let mut gate = gate(model, &["a", "b", "c"]);

    let scores = gate.score(&frame(SILENCE)).await;
    assert_eq!(
        scores,
        vec![
            ("a".to_string(), 0.0),
            ("b".to_string(), 1.0),
            ("c".to_string(), 0.0)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_warmup_frames_never_reach_the_model() {
    let steps = [
        Step::Frame(111),
        Step::Frame(222),
        Step::Frame(333),
        Step::Frame(444),
    ];
    assert_eq!(WARMUP, 2);
    let mut source = ScriptedSource::new(steps, Log::default());
    let model = ScriptedWake::single("assistant", &[0.0, 0.9]);
    let seen = model.seen.clone();
    let resets = model.resets.clone();
    let mut gate = gate(model, &["assistant"]);

    gate.listen_until_detected(&mut source, 0.5).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![333, 444]);
    assert_eq!(*resets.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_every_listen_resets_the_model() {
    let mut source = ScriptedSource::new(
        turn_steps(1, &[]).into_iter().chain(turn_steps(1, &[])),
        Log::default(),
    );
    let model = ScriptedWake::single("assistant", &[0.9, 0.9]);
    let resets = model.resets.clone();
    let mut gate = gate(model, &["assistant"]);

    gate.listen_until_detected(&mut source, 0.5).await.unwrap();
    gate.listen_until_detected(&mut source, 0.5).await.unwrap();
    assert_eq!(*resets.lock().unwrap(), 2);
}

#[tokio::test]
async fn test_reset_is_idempotent() {
    let probe = [frame(SILENCE), frame(2000), frame(SILENCE)];

    let mut fresh = gate(AccumulatingWake::default(), &["assistant"]);
    let mut expected = Vec::new();
    for f in &probe {
        expected.push(fresh.score(f).await);
    }

    let mut used = gate(AccumulatingWake::default(), &["assistant"]);
    for _ in 0..5 {
        used.score(&frame(SPEECH)).await;
    }
    for _ in 0..4 {
        used.reset();
    }
    let mut actual = Vec::new();
    for f in &probe {
        actual.push(used.score(f).await);
    }

    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_prefilter_zeroes_non_speech() {
    let model = ScriptedWake::single("assistant", &[0.9, 0.9]);
    let mut gate = gate(model, &["assistant"]).with_prefilter(Box::new(EnergyVad::default()));

    assert_eq!(gate.score(&frame(SILENCE)).await[0].1, 0.0);
    assert!((gate.score(&frame(SPEECH)).await[0].1 - 0.9).abs() < f32::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn test_spotter_detects_with_prefilter_configured() {
    let log = Log::default();
    let steps: Vec<Step> = std::iter::repeat_n(Step::Frame(SILENCE), WARMUP)
        .chain(std::iter::repeat_n(Step::Frame(SPEECH), 5))
        .chain(std::iter::repeat_n(Step::Frame(SILENCE), 20))
        .collect();
    let mut source = ScriptedSource::new(steps, log.clone());

    let labels = vec!["sudo".to_string()];
    let transcriber = ScriptedTranscriber::new([Ok("sudo".to_string())], log.clone());
    let spotter = TranscriptSpotter::new(&labels, Arc::new(transcriber)).unwrap();
    let mut gate = gate(spotter, &["sudo"]).with_prefilter(Box::new(EnergyVad::default()));
    assert!(!gate.has_prefilter());

    let detection = gate.listen_until_detected(&mut source, 0.5).await.unwrap();

    assert_eq!(detection.label, "sudo");
    assert!((detection.confidence - 1.0).abs() < f32::EPSILON);
    // five speech frames, then the silence that closes the segment
    assert_eq!(detection.frames_scored, 12);
}

#[tokio::test(start_paused = true)]
async fn test_device_error_while_listening_propagates() {
    let mut source = ScriptedSource::new([Step::Frame(SILENCE)], Log::default());
    let mut gate = gate(ScriptedWake::single("assistant", &[]), &["assistant"]);

    let err = gate.listen_until_detected(&mut source, 0.5).await.unwrap_err();
    assert!(matches!(err, Error::Device(_)));
    assert!(!source.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_recorder_endpoint_on_scripted_source() {
    let silence_frames = recording_settings().silence_frames();
    let steps: Vec<Step> = std::iter::repeat_n(Step::Frame(SPEECH), 4)
        .chain(std::iter::repeat_n(Step::Frame(SILENCE), silence_frames))
        .chain([Step::Frame(SPEECH)])
        .collect();
    let log = Log::default();
    let mut source = ScriptedSource::new(steps, log.clone());
    let mut recorder = EndpointRecorder::new(Box::new(EnergyVad::default()));

    let recording = recorder
        .record(&mut source, &recording_settings())
        .await
        .unwrap();

    assert_eq!(recording.stop_reason, StopReason::Silence);
    assert_eq!(recording.frame_count, 4 + silence_frames);
    assert_eq!(recording.duration(), Duration::from_millis(30 * (4 + 3)));
    assert!(!source.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_recorder_read_failures() {
    let mut source = ScriptedSource::new(
        [Step::Frame(SPEECH), Step::Fail, Step::Fail, Step::Fail],
        Log::default(),
    );
    let mut recorder = EndpointRecorder::new(Box::new(EnergyVad::default()));

    let err = recorder
        .record(&mut source, &recording_settings())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Recording(_)));
}

#[test]
fn test_wav_encoding_for_stt() {
    let samples: Vec<i16> = (0..1600).map(|i| i16::try_from(i % 100).unwrap()).collect();
    let wav = samples_to_wav(&samples, voice_relay::voice::SAMPLE_RATE).unwrap();
    assert_eq!(&wav[0..4], b"RIFF");
    assert!(wav.len() > samples.len() * 2);
}
