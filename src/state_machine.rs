//! Celebration sequence: CandlesLit → CandlesOut → ChoosingSong → CakeCut →
//! GiftClosed (opening) → GiftOpen → done.
//!
//! Blow detection and the manual skip are two producers of the same
//! transition; whichever arrives first wins and the other finds the phase
//! already moved on. Execution is single-threaded, so a phase check is the
//! only guard needed.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::audio::capture::CaptureSession;
use crate::audio::cues::{AudioOutput, Cue, SongStyle};
use crate::config::CelebrationConfig;
use crate::error::{CaptureError, TransitionError};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::sampler::{AmplitudeSampler, SampleOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CelebrationPhase {
    CandlesLit,
    CandlesOut,
    ChoosingSong,
    CakeCut,
    /// Gift tapped, opening cue playing; contents not yet revealed.
    GiftClosed,
    GiftOpen,
}

impl std::fmt::Display for CelebrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CelebrationPhase::CandlesLit => write!(f, "CandlesLit"),
            CelebrationPhase::CandlesOut => write!(f, "CandlesOut"),
            CelebrationPhase::ChoosingSong => write!(f, "ChoosingSong"),
            CelebrationPhase::CakeCut => write!(f, "CakeCut"),
            CelebrationPhase::GiftClosed => write!(f, "GiftClosed"),
            CelebrationPhase::GiftOpen => write!(f, "GiftOpen"),
        }
    }
}

impl CelebrationPhase {
    /// Phases only ever move forward, one step at a time.
    pub fn can_transition_to(self, next: CelebrationPhase) -> bool {
        matches!(
            (self, next),
            (CelebrationPhase::CandlesLit, CelebrationPhase::CandlesOut)
                | (CelebrationPhase::CandlesOut, CelebrationPhase::ChoosingSong)
                | (CelebrationPhase::ChoosingSong, CelebrationPhase::CakeCut)
                | (CelebrationPhase::CakeCut, CelebrationPhase::GiftClosed)
                | (CelebrationPhase::GiftClosed, CelebrationPhase::GiftOpen)
        )
    }
}

/// User input forwarded by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    SkipToParty,
    PickSong(SongStyle),
    CutCake,
    OpenGift,
    Close,
}

impl Gesture {
    pub fn name(&self) -> &'static str {
        match self {
            Gesture::SkipToParty => "skip",
            Gesture::PickSong(_) => "pick_song",
            Gesture::CutCake => "cut",
            Gesture::OpenGift => "open",
            Gesture::Close => "close",
        }
    }
}

impl FromStr for Gesture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" | "party" => Ok(Gesture::SkipToParty),
            "cut" => Ok(Gesture::CutCake),
            "open" | "gift" => Ok(Gesture::OpenGift),
            "close" | "continue" | "done" => Ok(Gesture::Close),
            other => other
                .parse::<SongStyle>()
                .map(Gesture::PickSong)
                .map_err(|_| format!("unknown gesture: {other}")),
        }
    }
}

/// What moved the candles out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlowTrigger {
    Detection,
    ManualSkip,
}

/// Snapshot published to the presentation layer after every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CelebrationState {
    pub phase: CelebrationPhase,
    pub current_amplitude: f32,
    pub mic_session_active: bool,
    pub song: Option<SongStyle>,
    pub finished: bool,
}

impl Default for CelebrationState {
    fn default() -> Self {
        Self {
            phase: CelebrationPhase::CandlesLit,
            current_amplitude: 0.0,
            mic_session_active: false,
            song: None,
            finished: false,
        }
    }
}

/// Timed step the driver must run after a delay. Not cancellable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferred {
    /// Celebration chord after the cake is cut.
    CutCelebration,
    /// End of the gift opening; reveal contents.
    RevealGift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowUp {
    pub after: Duration,
    pub action: Deferred,
}

/// Sole writer of `CelebrationState`. Owns the microphone session while
/// candles are lit and guarantees it is released on every exit path.
pub struct CelebrationController {
    config: CelebrationConfig,
    output: Arc<dyn AudioOutput>,
    metrics: Arc<MetricsRegistry>,
    state: CelebrationState,
    session: Option<Box<dyn CaptureSession>>,
    session_attached_at: Option<Instant>,
    sampler: AmplitudeSampler,
    state_tx: watch::Sender<CelebrationState>,
}

impl CelebrationController {
    pub fn new(
        config: CelebrationConfig,
        output: Arc<dyn AudioOutput>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let (state_tx, _) = watch::channel(CelebrationState::default());
        let sampler = AmplitudeSampler::new(config.blow_threshold);
        Self {
            config,
            output,
            metrics,
            state: CelebrationState::default(),
            session: None,
            session_attached_at: None,
            sampler,
            state_tx,
        }
    }

    /// Subscribe to state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<CelebrationState> {
        self.state_tx.subscribe()
    }

    #[cfg(test)]
    pub fn state(&self) -> &CelebrationState {
        &self.state
    }

    pub fn phase(&self) -> CelebrationPhase {
        self.state.phase
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn skip_available(&self) -> bool {
        self.config.allow_manual_skip && self.state.phase == CelebrationPhase::CandlesLit
    }

    /// True while the sampler should be fed ticks.
    pub fn is_sampling(&self) -> bool {
        !self.state.finished
            && self.state.phase == CelebrationPhase::CandlesLit
            && self.session.is_some()
            && self.sampler.is_running()
    }

    /// Hand over a freshly opened session. Refused (and closed immediately)
    /// when the candles already went out or a session is already held.
    pub fn attach_session(&mut self, mut session: Box<dyn CaptureSession>) -> bool {
        if self.state.finished || self.state.phase != CelebrationPhase::CandlesLit {
            info!(phase = %self.state.phase, "microphone granted after candles went out, releasing");
            session.close();
            return false;
        }
        if self.session.is_some() {
            warn!("celebration already owns a microphone session, releasing the new one");
            session.close();
            return false;
        }
        self.session = Some(session);
        self.session_attached_at = Some(Instant::now());
        self.state.mic_session_active = true;
        info!(threshold = self.sampler.threshold(), "blow detection armed");
        self.publish();
        true
    }

    /// The permission gate resolved without a microphone: manual-only flow.
    pub fn session_unavailable(&mut self, error: &CaptureError) {
        warn!(error = %error, "microphone unavailable, continuing without blow detection");
    }

    /// One frame: sample, publish the amplitude, and blow the candles out
    /// when the threshold is crossed. Returns the new phase on transition.
    pub fn on_tick(&mut self) -> Option<CelebrationPhase> {
        if !self.is_sampling() {
            return None;
        }
        let outcome = match self.session.as_deref_mut() {
            Some(session) => self.sampler.tick(session),
            None => SampleOutcome::Idle,
        };
        match outcome {
            SampleOutcome::Idle => None,
            SampleOutcome::Below(amplitude) => {
                self.state.current_amplitude = amplitude;
                self.publish();
                None
            }
            SampleOutcome::Blown(amplitude) => {
                info!(amplitude, ticks = self.sampler.ticks(), "candles blown out");
                if let Some(at) = self.session_attached_at {
                    self.metrics.record(
                        metric_names::BLOW_DETECTED,
                        at.elapsed().as_secs_f64() * 1000.0,
                    );
                }
                self.blow_out(BlowTrigger::Detection);
                Some(self.state.phase)
            }
        }
    }

    /// Apply a user gesture. On success, returns any timed follow-up the
    /// driver must schedule.
    pub fn handle(&mut self, gesture: Gesture) -> Result<Option<FollowUp>, TransitionError> {
        if self.state.finished {
            return Err(TransitionError::Finished);
        }
        let phase = self.state.phase;
        match (gesture, phase) {
            (Gesture::SkipToParty, CelebrationPhase::CandlesLit) => {
                if !self.config.allow_manual_skip {
                    return Err(TransitionError::SkipDisabled);
                }
                self.blow_out(BlowTrigger::ManualSkip);
                Ok(None)
            }
            (Gesture::PickSong(style), CelebrationPhase::ChoosingSong) => {
                if self.state.song == Some(style) {
                    debug!(style = %style, "song replayed");
                } else {
                    info!(style = %style, "song chosen");
                }
                self.state.song = Some(style);
                self.output.trigger(Cue::Song(style));
                self.publish();
                Ok(None)
            }
            (Gesture::CutCake, CelebrationPhase::ChoosingSong) => {
                if self.state.song.is_none() {
                    return Err(TransitionError::NoSongChosen);
                }
                self.output.trigger(Cue::Click);
                self.output.trigger(Cue::Cheer);
                self.advance(CelebrationPhase::CakeCut);
                Ok(Some(FollowUp {
                    after: self.config.cut_celebration_delay(),
                    action: Deferred::CutCelebration,
                }))
            }
            (Gesture::OpenGift, CelebrationPhase::CakeCut) => {
                self.output.trigger(Cue::Click);
                self.advance(CelebrationPhase::GiftClosed);
                Ok(Some(FollowUp {
                    after: self.config.gift_opening(),
                    action: Deferred::RevealGift,
                }))
            }
            (Gesture::Close, CelebrationPhase::GiftOpen) => {
                self.finish();
                info!("celebration complete");
                Ok(None)
            }
            (gesture, phase) => Err(TransitionError::InvalidGesture {
                gesture: gesture.name(),
                phase,
            }),
        }
    }

    /// Run a timed follow-up once its delay elapsed.
    pub fn complete(&mut self, action: Deferred) {
        if self.state.finished {
            return;
        }
        match action {
            Deferred::CutCelebration => self.output.trigger(Cue::Celebration),
            Deferred::RevealGift => {
                if self.state.phase == CelebrationPhase::GiftClosed {
                    self.output.trigger(Cue::Celebration);
                    self.advance(CelebrationPhase::GiftOpen);
                }
            }
        }
    }

    /// The owning view went away. Releases the microphone whatever the phase.
    pub fn teardown(&mut self) {
        if self.state.finished {
            return;
        }
        info!(phase = %self.state.phase, "celebration torn down");
        self.finish();
    }

    fn finish(&mut self) {
        self.sampler.stop();
        self.release_session();
        self.state.current_amplitude = 0.0;
        self.state.finished = true;
        self.publish();
    }

    /// Shared exit from CandlesLit for detection and manual skip.
    fn blow_out(&mut self, trigger: BlowTrigger) {
        if self.state.phase != CelebrationPhase::CandlesLit {
            debug!(?trigger, phase = %self.state.phase, "candles already out");
            return;
        }
        self.sampler.stop();
        self.release_session();
        self.state.current_amplitude = 0.0;
        info!(?trigger, "candles out");
        self.advance(CelebrationPhase::CandlesOut);
        self.output.trigger(Cue::Cheer);
        self.advance(CelebrationPhase::ChoosingSong);
    }

    /// Close and drop the session, if any. Idempotent.
    fn release_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
            debug!("microphone released");
        }
        self.session_attached_at = None;
        self.state.mic_session_active = false;
    }

    fn advance(&mut self, next: CelebrationPhase) {
        let current = self.state.phase;
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "invalid phase transition ignored");
            return;
        }
        self.state.phase = next;
        info!(from = %current, to = %next, "phase_transition");
        self.publish();
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }
}

impl Drop for CelebrationController {
    fn drop(&mut self) {
        self.release_session();
    }
}
