//! Top-level application flow: Idle → Generating → Displaying ⇄ CakeTime.
//!
//! Generation runs detached from the flow through a `GenerationTicket`, so
//! the caller can keep handling input while it is in flight. Results carry a
//! generation guard; anything produced before a `reset` is discarded.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::audio::cues::{AudioOutput, Cue};
use crate::cancellation::{GenerationGuard, TaskGeneration};
use crate::error::{FlowError, WishError};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::wish::{BirthdayWish, WishBackend, WishRequest};

/// Shown when the wish could not be generated. The user can retry from Idle.
pub const WISH_FAILED_MESSAGE: &str =
    "Dost, wish generate karne mein takleef hui. Ek baar phir try karein?";

/// A generated wish and its header image (empty when there is none).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub wish: BirthdayWish,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppPhase {
    Idle,
    Generating,
    Displaying(Greeting),
    CakeTime(Greeting),
}

impl AppPhase {
    pub fn name(&self) -> &'static str {
        match self {
            AppPhase::Idle => "Idle",
            AppPhase::Generating => "Generating",
            AppPhase::Displaying(_) => "Displaying",
            AppPhase::CakeTime(_) => "CakeTime",
        }
    }
}

/// Outcome of a finished generation, tagged with the generation it belongs to.
pub struct GenerationResult {
    guard: GenerationGuard,
    outcome: Result<Greeting, WishError>,
}

/// One in-flight wish + image request.
pub struct GenerationTicket<B> {
    backend: Arc<B>,
    request: WishRequest,
    guard: GenerationGuard,
    image_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl<B: WishBackend + 'static> GenerationTicket<B> {
    /// Run wish and image concurrently. The image never delays a failure and
    /// is given at most `image_timeout` once the wish is ready. A `reset`
    /// during either wait ends the run at once.
    pub async fn run(self) -> GenerationResult {
        let Self {
            backend,
            request,
            guard,
            image_timeout,
            metrics,
        } = self;

        let image_backend = Arc::clone(&backend);
        let image_metrics = Arc::clone(&metrics);
        let name = request.name.clone();
        let mut image_task = tokio::spawn(async move {
            let span = image_metrics.span(metric_names::IMAGE_GENERATED);
            let result = image_backend.generate_image(&name).await;
            span.finish();
            result
        });

        let span = metrics.span(metric_names::WISH_GENERATED);
        let wish = tokio::select! {
            result = backend.generate_wish(&request) => result,
            _ = guard.token().cancelled() => Err(WishError::Cancelled),
        };

        let outcome = match wish {
            Ok(_) if !guard.should_continue() => Err(WishError::Cancelled),
            Ok(wish) => {
                let elapsed_ms = span.finish();
                info!(elapsed_ms, "wish ready, waiting for image");
                let image = tokio::select! {
                    waited = tokio::time::timeout(image_timeout, &mut image_task) => Some(match waited {
                        Ok(Ok(Ok(uri))) => uri,
                        Ok(Ok(Err(e))) => {
                            warn!(error = %e, "image generation failed, using text header");
                            String::new()
                        }
                        Ok(Err(e)) => {
                            warn!(error = %e, "image task failed, using text header");
                            String::new()
                        }
                        Err(_) => {
                            warn!(timeout_ms = image_timeout.as_millis() as u64, "image generation timed out");
                            String::new()
                        }
                    }),
                    _ = guard.token().cancelled() => None,
                };
                match image {
                    Some(image) => Ok(Greeting { wish, image }),
                    None => {
                        debug!(generation = guard.my_generation(), "generation superseded while waiting for image");
                        Err(WishError::Cancelled)
                    }
                }
            }
            Err(e) => Err(e),
        };
        // No-op once the task has finished.
        image_task.abort();

        GenerationResult { guard, outcome }
    }
}

/// Application flow state. Single writer; the front end reads `phase()`.
pub struct AppFlow<B> {
    backend: Arc<B>,
    output: Arc<dyn AudioOutput>,
    metrics: Arc<MetricsRegistry>,
    image_timeout: Duration,
    generations: TaskGeneration,
    phase: AppPhase,
    last_error: Option<String>,
}

impl<B: WishBackend + 'static> AppFlow<B> {
    pub fn new(
        backend: Arc<B>,
        output: Arc<dyn AudioOutput>,
        metrics: Arc<MetricsRegistry>,
        image_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            output,
            metrics,
            image_timeout,
            generations: TaskGeneration::new(),
            phase: AppPhase::Idle,
            last_error: None,
        }
    }

    pub fn phase(&self) -> &AppPhase {
        &self.phase
    }

    /// User-facing message from the last failed generation.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn greeting(&self) -> Option<&Greeting> {
        match &self.phase {
            AppPhase::Displaying(g) | AppPhase::CakeTime(g) => Some(g),
            _ => None,
        }
    }

    /// Validate the form and enter Generating. An empty name leaves the flow
    /// untouched and sends nothing.
    pub fn submit(&mut self, request: WishRequest) -> Result<GenerationTicket<B>, FlowError> {
        if request.name.trim().is_empty() {
            return Err(FlowError::MissingName);
        }
        if matches!(self.phase, AppPhase::Generating) {
            return Err(FlowError::Busy);
        }
        self.output.trigger(Cue::Click);
        self.last_error = None;
        let guard = self.generations.cancel_and_advance();
        self.set_phase(AppPhase::Generating);
        Ok(GenerationTicket {
            backend: Arc::clone(&self.backend),
            request,
            guard,
            image_timeout: self.image_timeout,
            metrics: Arc::clone(&self.metrics),
        })
    }

    /// Apply a finished generation. Stale results are dropped silently.
    pub fn complete(&mut self, result: GenerationResult) -> Result<(), FlowError> {
        if !result.guard.is_current() || !matches!(self.phase, AppPhase::Generating) {
            debug!(
                generation = result.guard.my_generation(),
                "discarding stale generation result"
            );
            return Ok(());
        }
        match result.outcome {
            Ok(greeting) => {
                self.set_phase(AppPhase::Displaying(greeting));
                self.output.trigger(Cue::Celebration);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "wish generation failed");
                self.last_error = Some(WISH_FAILED_MESSAGE.to_string());
                self.set_phase(AppPhase::Idle);
                Err(FlowError::Generation(WISH_FAILED_MESSAGE.to_string()))
            }
        }
    }

    /// Submit, run and apply in one call.
    pub async fn generate(&mut self, request: WishRequest) -> Result<(), FlowError> {
        let ticket = self.submit(request)?;
        let result = ticket.run().await;
        self.complete(result)
    }

    /// Displaying → CakeTime.
    pub fn start_cake_time(&mut self) -> bool {
        match std::mem::replace(&mut self.phase, AppPhase::Idle) {
            AppPhase::Displaying(greeting) => {
                self.output.trigger(Cue::Click);
                self.set_phase(AppPhase::CakeTime(greeting));
                true
            }
            other => {
                self.phase = other;
                false
            }
        }
    }

    /// CakeTime → Displaying, once the celebration returns control.
    pub fn finish_cake_time(&mut self) -> bool {
        match std::mem::replace(&mut self.phase, AppPhase::Idle) {
            AppPhase::CakeTime(greeting) => {
                self.set_phase(AppPhase::Displaying(greeting));
                true
            }
            other => {
                self.phase = other;
                false
            }
        }
    }

    /// Back to the form. Any in-flight generation becomes stale.
    pub fn reset(&mut self) {
        self.output.trigger(Cue::Click);
        self.generations.cancel_and_advance();
        self.last_error = None;
        self.set_phase(AppPhase::Idle);
    }

    fn set_phase(&mut self, next: AppPhase) {
        let from = self.phase.name();
        let to = next.name();
        self.phase = next;
        if from != to {
            info!(from, to, "app_transition");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::tests::RecordingOutput;

    fn sample_wish() -> BirthdayWish {
        BirthdayWish {
            title: "Happy Birthday".into(),
            message: "Many happy returns".into(),
            poem: "one\ntwo\nthree\nfour".into(),
            short_quote: "Shine".into(),
            fun_fact: "Legend says cake was invented for you".into(),
        }
    }

    struct FakeBackend {
        wish: Result<BirthdayWish, String>,
        image: Result<String, String>,
        image_delay: Duration,
    }

    impl FakeBackend {
        fn ok(image: &str) -> Self {
            Self {
                wish: Ok(sample_wish()),
                image: Ok(image.into()),
                image_delay: Duration::ZERO,
            }
        }
    }

    impl WishBackend for FakeBackend {
        async fn generate_wish(&self, _request: &WishRequest) -> Result<BirthdayWish, WishError> {
            self.wish.clone().map_err(WishError::Api)
        }

        async fn generate_image(&self, _name: &str) -> Result<String, WishError> {
            tokio::time::sleep(self.image_delay).await;
            self.image.clone().map_err(WishError::Api)
        }
    }

    fn flow(backend: FakeBackend) -> (AppFlow<FakeBackend>, Arc<RecordingOutput>, Arc<MetricsRegistry>) {
        let output = Arc::new(RecordingOutput::default());
        let metrics = Arc::new(MetricsRegistry::new());
        let flow = AppFlow::new(
            Arc::new(backend),
            Arc::clone(&output) as Arc<dyn AudioOutput>,
            Arc::clone(&metrics),
            Duration::from_secs(20),
        );
        (flow, output, metrics)
    }

    #[tokio::test]
    async fn successful_generation_displays_wish_and_image() {
        let (mut flow, output, metrics) = flow(FakeBackend::ok("data:image/png;base64,AAAA"));
        flow.generate(WishRequest::new("Riya")).await.unwrap();

        let greeting = flow.greeting().unwrap();
        assert_eq!(greeting.wish, sample_wish());
        assert_eq!(greeting.image, "data:image/png;base64,AAAA");
        assert_eq!(output.cues(), vec![Cue::Click, Cue::Celebration]);
        assert_eq!(metrics.count(metric_names::WISH_GENERATED), 1);
    }

    #[tokio::test]
    async fn wish_failure_returns_to_idle_with_message() {
        let (mut flow, output, _) = flow(FakeBackend {
            wish: Err("boom".into()),
            image: Ok("data:image/png;base64,AAAA".into()),
            image_delay: Duration::from_secs(3600),
        });
        let err = flow.generate(WishRequest::new("Riya")).await.unwrap_err();
        assert_eq!(err, FlowError::Generation(WISH_FAILED_MESSAGE.into()));
        assert_eq!(flow.phase(), &AppPhase::Idle);
        assert!(!flow.last_error().unwrap_or_default().is_empty());
        assert_eq!(output.cues(), vec![Cue::Click]);
    }

    #[tokio::test]
    async fn image_failure_is_swallowed() {
        let (mut flow, _, _) = flow(FakeBackend {
            wish: Ok(sample_wish()),
            image: Err("quota".into()),
            image_delay: Duration::ZERO,
        });
        flow.generate(WishRequest::new("Riya")).await.unwrap();
        assert_eq!(flow.greeting().map(|g| g.image.as_str()), Some(""));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_image_times_out_to_empty() {
        let (mut flow, _, _) = flow(FakeBackend {
            wish: Ok(sample_wish()),
            image: Ok("data:image/png;base64,AAAA".into()),
            image_delay: Duration::from_secs(60),
        });
        flow.generate(WishRequest::new("Riya")).await.unwrap();
        assert_eq!(flow.greeting().map(|g| g.image.as_str()), Some(""));
    }

    #[tokio::test]
    async fn empty_name_sends_nothing() {
        let (mut flow, output, _) = flow(FakeBackend::ok(""));
        assert_eq!(
            flow.generate(WishRequest::new("   ")).await,
            Err(FlowError::MissingName)
        );
        assert_eq!(flow.phase(), &AppPhase::Idle);
        assert!(output.cues().is_empty());
    }

    #[tokio::test]
    async fn reset_discards_in_flight_result() {
        let (mut flow, _, _) = flow(FakeBackend::ok(""));
        let ticket = flow.submit(WishRequest::new("Riya")).unwrap();
        assert_eq!(flow.submit(WishRequest::new("Riya")).err(), Some(FlowError::Busy));
        flow.reset();
        let result = ticket.run().await;
        assert_eq!(flow.complete(result), Ok(()));
        assert_eq!(flow.phase(), &AppPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_while_waiting_for_image_stops_at_once() {
        let output = Arc::new(RecordingOutput::default());
        let mut flow = AppFlow::new(
            Arc::new(FakeBackend {
                wish: Ok(sample_wish()),
                image: Ok("data:image/png;base64,AAAA".into()),
                image_delay: Duration::from_secs(3600),
            }),
            Arc::clone(&output) as Arc<dyn AudioOutput>,
            Arc::new(MetricsRegistry::new()),
            Duration::from_secs(600),
        );
        let ticket = flow.submit(WishRequest::new("Riya")).unwrap();
        let started = tokio::time::Instant::now();
        let running = tokio::spawn(ticket.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        flow.reset();
        let result = running.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(600));
        assert!(matches!(result.outcome, Err(WishError::Cancelled)));
        assert_eq!(flow.complete(result), Ok(()));
        assert_eq!(flow.phase(), &AppPhase::Idle);
    }

    #[tokio::test]
    async fn cake_time_round_trip() {
        let (mut flow, output, _) = flow(FakeBackend::ok(""));
        assert!(!flow.start_cake_time());
        flow.generate(WishRequest::new("Riya")).await.unwrap();

        assert!(flow.start_cake_time());
        assert_eq!(flow.phase().name(), "CakeTime");
        assert!(!flow.start_cake_time());
        assert!(flow.finish_cake_time());
        assert_eq!(flow.phase().name(), "Displaying");

        flow.reset();
        assert_eq!(flow.phase(), &AppPhase::Idle);
        assert_eq!(
            output.cues(),
            vec![Cue::Click, Cue::Celebration, Cue::Click, Cue::Click]
        );
    }
}
