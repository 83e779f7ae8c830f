//! Async driver for one celebration sequence.
//!
//! A single task owns the `CelebrationController` and multiplexes the
//! permission gate, frame ticks, user gestures, and timed follow-ups. Only
//! one branch runs at a time, so the controller never needs a lock.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::capture::AudioCapture;
use crate::error::CaptureError;
use crate::metrics::metric_names;
use crate::sampler::TickSource;
use crate::state_machine::{CelebrationController, Deferred, Gesture};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CelebrationOutcome {
    /// The user closed the gift; control returns to the caller.
    Completed,
    /// The view went away (cancel or gesture source closed).
    TornDown,
}

/// Drive `controller` until the sequence completes or is torn down.
///
/// The microphone is requested once, on a blocking thread. Sampling stays
/// off until that gate resolves; a session granted after the candles went
/// out is released immediately.
pub async fn run_celebration<T: TickSource>(
    mut controller: CelebrationController,
    capture: Arc<dyn AudioCapture>,
    mut ticks: T,
    mut gestures: mpsc::Receiver<Gesture>,
    cancel: CancellationToken,
) -> CelebrationOutcome {
    let gate_capture = Arc::clone(&capture);
    let mut gate = tokio::task::spawn_blocking(move || gate_capture.open());
    let mut gate_pending = true;
    let mut pending: Vec<(Instant, Deferred)> = Vec::new();
    let metrics = Arc::clone(controller.metrics());

    info!(phase = %controller.phase(), "celebration started");

    let outcome = loop {
        let next_deadline = pending.iter().map(|(at, _)| *at).min();

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                controller.teardown();
                break CelebrationOutcome::TornDown;
            }

            gesture = gestures.recv() => {
                let Some(gesture) = gesture else {
                    debug!("gesture source closed");
                    controller.teardown();
                    break CelebrationOutcome::TornDown;
                };
                match controller.handle(gesture) {
                    Ok(Some(follow_up)) => {
                        pending.push((Instant::now() + follow_up.after, follow_up.action));
                    }
                    Ok(None) => {}
                    Err(e) => warn!(gesture = gesture.name(), error = %e, "gesture ignored"),
                }
                if controller.is_finished() {
                    break CelebrationOutcome::Completed;
                }
            }

            joined = &mut gate, if gate_pending => {
                gate_pending = false;
                match joined {
                    Ok(Ok(session)) => {
                        controller.attach_session(session);
                    }
                    Ok(Err(e)) => controller.session_unavailable(&e),
                    Err(e) => controller.session_unavailable(&CaptureError::Stream(e.to_string())),
                }
            }

            _ = ticks.next_tick(), if controller.is_sampling() => {
                let span = metrics.span(metric_names::TICK);
                controller.on_tick();
                span.finish();
            }

            _ = sleep_until(next_deadline.unwrap_or_else(Instant::now)), if next_deadline.is_some() => {
                let now = Instant::now();
                let (due, later): (Vec<_>, Vec<_>) =
                    pending.drain(..).partition(|(at, _)| *at <= now);
                pending = later;
                for (_, action) in due {
                    controller.complete(action);
                }
            }
        }
    };

    if gate_pending {
        // The host may still grant access after we left; release whatever arrives.
        tokio::spawn(async move {
            if let Ok(Ok(mut session)) = gate.await {
                debug!("releasing microphone granted after teardown");
                session.close();
            }
        });
    }

    info!(?outcome, "celebration ended");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::CaptureSession;
    use crate::audio::cues::{AudioOutput, Cue, SongStyle};
    use crate::config::CelebrationConfig;
    use crate::metrics::MetricsRegistry;
    use crate::sampler::tests::ScriptedSession;
    use crate::sampler::FrameClock;
    use crate::state_machine::tests::RecordingOutput;
    use crate::state_machine::CelebrationPhase;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeCapture {
        readings: Vec<f32>,
        closes: Arc<AtomicUsize>,
        deny: bool,
        release: Mutex<Option<crossbeam_channel::Receiver<()>>>,
    }

    impl FakeCapture {
        fn granting(readings: &[f32], closes: &Arc<AtomicUsize>) -> Self {
            Self {
                readings: readings.to_vec(),
                closes: Arc::clone(closes),
                deny: false,
                release: Mutex::new(None),
            }
        }

        fn denying() -> Self {
            Self {
                readings: Vec::new(),
                closes: Arc::new(AtomicUsize::new(0)),
                deny: true,
                release: Mutex::new(None),
            }
        }
    }

    impl AudioCapture for FakeCapture {
        fn open(&self) -> Result<Box<dyn CaptureSession>, CaptureError> {
            let release = self.release.lock().take();
            if let Some(rx) = release {
                let _ = rx.recv();
            }
            if self.deny {
                return Err(CaptureError::Denied("user said no".into()));
            }
            Ok(Box::new(ScriptedSession::new(
                &self.readings,
                Arc::clone(&self.closes),
            )))
        }
    }

    /// Frame clock that counts completed ticks.
    struct CountingTicks {
        clock: FrameClock,
        count: Arc<AtomicUsize>,
    }

    impl TickSource for CountingTicks {
        async fn next_tick(&mut self) {
            self.clock.next_tick().await;
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn controller() -> (CelebrationController, Arc<RecordingOutput>) {
        let output = Arc::new(RecordingOutput::default());
        let controller = CelebrationController::new(
            CelebrationConfig::default(),
            Arc::clone(&output) as Arc<dyn AudioOutput>,
            Arc::new(MetricsRegistry::new()),
        );
        (controller, output)
    }

    fn frames() -> FrameClock {
        FrameClock::new(Duration::from_millis(16))
    }

    #[tokio::test(start_paused = true)]
    async fn detection_then_full_sequence() {
        let closes = Arc::new(AtomicUsize::new(0));
        let capture = Arc::new(FakeCapture::granting(&[10.0, 20.0, 30.0, 72.0], &closes));
        let (controller, output) = controller();
        let metrics = Arc::clone(controller.metrics());
        let mut rx = controller.subscribe();
        let (tx, gestures) = mpsc::channel(8);

        let handle = tokio::spawn(run_celebration(
            controller,
            capture,
            frames(),
            gestures,
            CancellationToken::new(),
        ));

        rx.wait_for(|s| s.phase == CelebrationPhase::ChoosingSong)
            .await
            .unwrap();
        assert_eq!(rx.borrow().current_amplitude, 0.0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.count(metric_names::TICK), 4);
        assert_eq!(metrics.count(metric_names::BLOW_DETECTED), 1);

        tx.send(Gesture::PickSong(SongStyle::Jazz)).await.unwrap();
        tx.send(Gesture::CutCake).await.unwrap();
        tx.send(Gesture::OpenGift).await.unwrap();
        rx.wait_for(|s| s.phase == CelebrationPhase::GiftOpen)
            .await
            .unwrap();
        tx.send(Gesture::Close).await.unwrap();

        assert_eq!(handle.await.unwrap(), CelebrationOutcome::Completed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(
            output.cues(),
            vec![
                Cue::Cheer,
                Cue::Song(SongStyle::Jazz),
                Cue::Click,
                Cue::Cheer,
                Cue::Celebration,
                Cue::Click,
                Cue::Celebration,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn denied_microphone_never_ticks() {
        let (controller, output) = controller();
        let mut rx = controller.subscribe();
        let (tx, gestures) = mpsc::channel(8);
        let count = Arc::new(AtomicUsize::new(0));
        let ticks = CountingTicks {
            clock: frames(),
            count: Arc::clone(&count),
        };

        let handle = tokio::spawn(run_celebration(
            controller,
            Arc::new(FakeCapture::denying()),
            ticks,
            gestures,
            CancellationToken::new(),
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(rx.borrow().phase, CelebrationPhase::CandlesLit);
        assert!(!rx.borrow().mic_session_active);

        tx.send(Gesture::SkipToParty).await.unwrap();
        rx.wait_for(|s| s.phase == CelebrationPhase::ChoosingSong)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(handle.await.unwrap(), CelebrationOutcome::TornDown);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(output.cues(), vec![Cue::Cheer]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_releases_session_while_candles_lit() {
        let closes = Arc::new(AtomicUsize::new(0));
        let capture = Arc::new(FakeCapture::granting(&[5.0], &closes));
        let (controller, output) = controller();
        let mut rx = controller.subscribe();
        let (_tx, gestures) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_celebration(
            controller,
            capture,
            frames(),
            gestures,
            cancel.clone(),
        ));

        rx.wait_for(|s| s.mic_session_active).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        assert_eq!(handle.await.unwrap(), CelebrationOutcome::TornDown);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(output.cues().is_empty());
    }

    #[tokio::test]
    async fn session_granted_after_skip_is_released() {
        let closes = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        let capture = FakeCapture::granting(&[100.0], &closes);
        *capture.release.lock() = Some(release_rx);
        let (controller, output) = controller();
        let mut rx = controller.subscribe();
        let (tx, gestures) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_celebration(
            controller,
            Arc::new(capture),
            frames(),
            gestures,
            cancel.clone(),
        ));

        tx.send(Gesture::SkipToParty).await.unwrap();
        rx.wait_for(|s| s.phase == CelebrationPhase::ChoosingSong)
            .await
            .unwrap();
        release_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while closes.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), CelebrationOutcome::TornDown);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(!rx.borrow().mic_session_active);
        assert_eq!(output.cues(), vec![Cue::Cheer]);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_gestures_are_ignored() {
        let (controller, output) = controller();
        let mut rx = controller.subscribe();
        let (tx, gestures) = mpsc::channel(8);

        let handle = tokio::spawn(run_celebration(
            controller,
            Arc::new(FakeCapture::denying()),
            frames(),
            gestures,
            CancellationToken::new(),
        ));

        tx.send(Gesture::CutCake).await.unwrap();
        tx.send(Gesture::Close).await.unwrap();
        tx.send(Gesture::SkipToParty).await.unwrap();
        tx.send(Gesture::CutCake).await.unwrap();
        rx.wait_for(|s| s.phase == CelebrationPhase::ChoosingSong)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(handle.await.unwrap(), CelebrationOutcome::TornDown);
        assert_eq!(output.cues(), vec![Cue::Cheer]);
    }
}
