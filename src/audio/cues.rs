//! Fire-and-forget audio cues: click, cheer, celebration chord, birthday tune.
//!
//! `RodioOutput` keeps the output stream on a dedicated `cue-output` thread
//! fed by an unbounded channel, so `trigger` never blocks and never fails.
//! All sounds are synthesised; there are no sample assets.

use std::f32::consts::PI;
use std::str::FromStr;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel as cb;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const SAMPLE_RATE: u32 = 44_100;

/// Birthday tune arrangement picked by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SongStyle {
    Classic,
    Pop,
    Jazz,
}

impl std::fmt::Display for SongStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SongStyle::Classic => write!(f, "classic"),
            SongStyle::Pop => write!(f, "pop"),
            SongStyle::Jazz => write!(f, "jazz"),
        }
    }
}

impl FromStr for SongStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classic" => Ok(SongStyle::Classic),
            "pop" => Ok(SongStyle::Pop),
            "jazz" => Ok(SongStyle::Jazz),
            other => Err(format!("unknown song style: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Triangle,
    Noise,
}

/// Timbre and tempo a song style maps to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SongVariant {
    pub waveform: Waveform,
    pub tempo_scale: f32,
    pub gain: f32,
}

impl SongStyle {
    pub fn variant(self) -> SongVariant {
        match self {
            SongStyle::Classic => SongVariant {
                waveform: Waveform::Sine,
                tempo_scale: 1.0,
                gain: 0.1,
            },
            SongStyle::Pop => SongVariant {
                waveform: Waveform::Square,
                tempo_scale: 0.7,
                gain: 0.1,
            },
            SongStyle::Jazz => SongVariant {
                waveform: Waveform::Triangle,
                tempo_scale: 1.3,
                gain: 0.05,
            },
        }
    }
}

/// Sound kinds the celebration asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Click,
    Cheer,
    Celebration,
    Song(SongStyle),
}

impl std::fmt::Display for Cue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cue::Click => write!(f, "click"),
            Cue::Cheer => write!(f, "cheer"),
            Cue::Celebration => write!(f, "celebration"),
            Cue::Song(style) => write!(f, "song:{style}"),
        }
    }
}

/// Playback destination. Implementations must not block or panic.
pub trait AudioOutput: Send + Sync {
    fn trigger(&self, cue: Cue);
}

/// Silent output for `--mute` and headless runs.
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn trigger(&self, cue: Cue) {
        debug!(cue = %cue, "cue muted");
    }
}

/// rodio playback on the default output device.
pub struct RodioOutput {
    tx: cb::Sender<Cue>,
    _thread: Option<JoinHandle<()>>,
}

impl RodioOutput {
    /// Start the playback thread. A missing output device is logged and
    /// every later cue is dropped.
    pub fn start() -> Self {
        let (tx, rx) = cb::unbounded::<Cue>();
        let thread = std::thread::Builder::new()
            .name("cue-output".into())
            .spawn(move || run_output_loop(rx));

        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "failed to spawn cue-output thread, cues disabled");
                None
            }
        };

        Self {
            tx,
            _thread: thread,
        }
    }
}

impl AudioOutput for RodioOutput {
    fn trigger(&self, cue: Cue) {
        if self.tx.send(cue).is_err() {
            debug!(cue = %cue, "cue-output thread gone, cue dropped");
        }
    }
}

fn run_output_loop(rx: cb::Receiver<Cue>) {
    let (_stream, handle) = match rodio::OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "no audio output device, cues disabled");
            while let Ok(cue) = rx.recv() {
                debug!(cue = %cue, "cue dropped (no output)");
            }
            return;
        }
    };
    info!("cue output ready");

    while let Ok(cue) = rx.recv() {
        if let Err(e) = handle.play_raw(synthesize(cue)) {
            warn!(cue = %cue, error = %e, "cue playback failed");
        }
    }
    debug!("cue channel closed, output loop exiting");
}

// --- Synthesis ---

#[derive(Debug, Clone, Copy)]
enum Envelope {
    /// Exponential ramp from `from` to `to` over the voice length.
    ExpRamp { from: f32, to: f32 },
    /// Linear rise to `peak` over `attack`, then exponential fall to 0.01 at `decay_end`.
    AttackDecay { peak: f32, attack: f32, decay_end: f32 },
    /// Linear rise over `edge`, hold, linear fall to silence `edge` before the end.
    Trapezoid { peak: f32, edge: f32 },
}

#[derive(Debug, Clone, Copy)]
struct Voice {
    waveform: Waveform,
    start: f32,
    len: f32,
    freq_from: f32,
    /// Exponential sweep target; equal to `freq_from` for a steady tone.
    freq_to: f32,
    envelope: Envelope,
    /// One-pole low-pass cutoff sweep for noise voices (from, to) in Hz.
    lowpass: Option<(f32, f32)>,
}

impl Voice {
    fn tone(waveform: Waveform, start: f32, len: f32, freq: f32, envelope: Envelope) -> Self {
        Self {
            waveform,
            start,
            len,
            freq_from: freq,
            freq_to: freq,
            envelope,
            lowpass: None,
        }
    }

    fn gain_at(&self, t: f32) -> f32 {
        match self.envelope {
            Envelope::ExpRamp { from, to } => from * (to / from).powf(t / self.len),
            Envelope::AttackDecay {
                peak,
                attack,
                decay_end,
            } => {
                if t < attack {
                    peak * t / attack
                } else {
                    let span = (decay_end - attack).max(f32::EPSILON);
                    peak * (0.01 / peak).powf(((t - attack) / span).min(1.0))
                }
            }
            Envelope::Trapezoid { peak, edge } => {
                let release_start = (self.len - 2.0 * edge).max(edge);
                if t < edge {
                    peak * t / edge
                } else if t < release_start {
                    peak
                } else {
                    (peak * (1.0 - (t - release_start) / edge)).max(0.0)
                }
            }
        }
    }

    fn freq_at(&self, t: f32) -> f32 {
        if self.freq_from == self.freq_to {
            self.freq_from
        } else {
            self.freq_from * (self.freq_to / self.freq_from).powf((t / self.len).min(1.0))
        }
    }
}

/// Additive synthesiser rendering a fixed set of voices as a rodio source.
pub struct Synth {
    voices: Vec<Voice>,
    phases: Vec<f32>,
    filters: Vec<f32>,
    index: u64,
    total_samples: u64,
    rng: u32,
}

impl Synth {
    fn new(voices: Vec<Voice>) -> Self {
        let end = voices
            .iter()
            .map(|v| v.start + v.len)
            .fold(0.0f32, f32::max);
        let count = voices.len();
        Self {
            voices,
            phases: vec![0.0; count],
            filters: vec![0.0; count],
            index: 0,
            total_samples: (end * SAMPLE_RATE as f32).ceil() as u64,
            rng: 0x9E37_79B9,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.total_samples as f64 / SAMPLE_RATE as f64)
    }

    fn next_noise(&mut self) -> f32 {
        self.rng ^= self.rng << 13;
        self.rng ^= self.rng >> 17;
        self.rng ^= self.rng << 5;
        self.rng as f32 / u32::MAX as f32 * 2.0 - 1.0
    }
}

impl Iterator for Synth {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.index >= self.total_samples {
            return None;
        }
        let t = self.index as f32 / SAMPLE_RATE as f32;
        self.index += 1;

        let mut mix = 0.0;
        for i in 0..self.voices.len() {
            let voice = self.voices[i];
            let local = t - voice.start;
            if local < 0.0 || local >= voice.len {
                continue;
            }
            let raw = match voice.waveform {
                Waveform::Noise => {
                    let white = self.next_noise();
                    match voice.lowpass {
                        Some((from, to)) => {
                            let cutoff = from * (to / from).powf(local / voice.len);
                            let alpha = 1.0 - (-2.0 * PI * cutoff / SAMPLE_RATE as f32).exp();
                            self.filters[i] += alpha * (white - self.filters[i]);
                            self.filters[i]
                        }
                        None => white,
                    }
                }
                wave => {
                    let phase = self.phases[i];
                    self.phases[i] = (phase + voice.freq_at(local) / SAMPLE_RATE as f32).fract();
                    oscillator(wave, phase)
                }
            };
            mix += raw * voice.gain_at(local);
        }
        Some(mix.clamp(-1.0, 1.0))
    }
}

impl rodio::Source for Synth {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(self.duration())
    }
}

fn oscillator(waveform: Waveform, phase: f32) -> f32 {
    match waveform {
        Waveform::Sine => (2.0 * PI * phase).sin(),
        Waveform::Square => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        Waveform::Noise => 0.0,
    }
}

/// Happy-birthday phrase: (frequency Hz, duration s) at classic tempo.
pub const BIRTHDAY_MELODY: [(f32, f32); 12] = [
    (261.63, 0.4),
    (261.63, 0.2),
    (293.66, 0.6),
    (261.63, 0.6),
    (349.23, 0.6),
    (329.63, 1.0),
    (261.63, 0.4),
    (261.63, 0.2),
    (293.66, 0.6),
    (261.63, 0.6),
    (392.00, 0.6),
    (349.23, 1.0),
];

const CELEBRATION_NOTES: [f32; 5] = [523.25, 659.25, 783.99, 1046.50, 1318.51];

/// Render the voice list for a cue.
pub fn synthesize(cue: Cue) -> Synth {
    let voices = match cue {
        Cue::Click => vec![Voice {
            freq_to: 400.0,
            ..Voice::tone(
                Waveform::Sine,
                0.0,
                0.1,
                800.0,
                Envelope::ExpRamp { from: 0.1, to: 0.01 },
            )
        }],
        Cue::Cheer => vec![Voice {
            lowpass: Some((1000.0, 400.0)),
            ..Voice::tone(
                Waveform::Noise,
                0.0,
                1.5,
                0.0,
                Envelope::AttackDecay {
                    peak: 0.2,
                    attack: 0.1,
                    decay_end: 1.5,
                },
            )
        }],
        Cue::Celebration => CELEBRATION_NOTES
            .iter()
            .enumerate()
            .map(|(i, &freq)| {
                Voice::tone(
                    Waveform::Triangle,
                    i as f32 * 0.08,
                    0.6,
                    freq,
                    Envelope::AttackDecay {
                        peak: 0.15,
                        attack: 0.05,
                        decay_end: 0.5,
                    },
                )
            })
            .collect(),
        Cue::Song(style) => {
            let variant = style.variant();
            let mut at = 0.0;
            BIRTHDAY_MELODY
                .iter()
                .map(|&(freq, dur)| {
                    let len = dur * variant.tempo_scale;
                    let voice = Voice::tone(
                        variant.waveform,
                        at,
                        len,
                        freq,
                        Envelope::Trapezoid {
                            peak: variant.gain,
                            edge: 0.05,
                        },
                    );
                    at += len;
                    voice
                })
                .collect()
        }
    };
    Synth::new(voices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn song_styles_map_to_distinct_variants() {
        let classic = SongStyle::Classic.variant();
        let pop = SongStyle::Pop.variant();
        let jazz = SongStyle::Jazz.variant();
        assert_ne!(classic, pop);
        assert_ne!(pop, jazz);
        assert_ne!(classic, jazz);
        assert_eq!(SongStyle::Pop.variant(), pop);
    }

    #[test]
    fn song_length_follows_tempo() {
        let classic = synthesize(Cue::Song(SongStyle::Classic)).duration().as_secs_f32();
        let pop = synthesize(Cue::Song(SongStyle::Pop)).duration().as_secs_f32();
        let jazz = synthesize(Cue::Song(SongStyle::Jazz)).duration().as_secs_f32();
        assert!((classic - 6.8).abs() < 0.01);
        assert!(pop < classic && classic < jazz);
    }

    #[test]
    fn cues_render_bounded_samples() {
        for cue in [
            Cue::Click,
            Cue::Cheer,
            Cue::Celebration,
            Cue::Song(SongStyle::Jazz),
        ] {
            let synth = synthesize(cue);
            let expected = synth.total_samples as usize;
            let samples: Vec<f32> = synth.collect();
            assert_eq!(samples.len(), expected, "{cue}");
            assert!(samples.iter().all(|s| s.abs() <= 1.0));
            assert!(samples.iter().any(|s| s.abs() > 0.0), "{cue} is silent");
        }
    }

    #[test]
    fn celebration_is_staggered_arpeggio() {
        let synth = synthesize(Cue::Celebration);
        assert_eq!(synth.voices.len(), 5);
        assert!((synth.voices[4].start - 0.32).abs() < 1e-6);
        assert!((synth.duration().as_secs_f32() - 0.92).abs() < 0.01);
    }

    #[test]
    fn parses_song_styles() {
        assert_eq!("Jazz".parse::<SongStyle>(), Ok(SongStyle::Jazz));
        assert!("metal".parse::<SongStyle>().is_err());
    }
}
