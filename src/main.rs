//! Terminal front end: generate a wish, show the card, run the cake
//! celebration with gestures typed on stdin.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use wishcake::audio::capture::{AudioCapture, CpalCapture, DisabledCapture};
use wishcake::audio::cues::{AudioOutput, NullOutput, RodioOutput};
use wishcake::card::{export_card, Card, CardTheme, ExportOutcome};
use wishcake::celebration::{run_celebration, CelebrationOutcome};
use wishcake::config::Config;
use wishcake::error::FlowError;
use wishcake::flow::AppFlow;
use wishcake::metrics::MetricsRegistry;
use wishcake::sampler::FrameClock;
use wishcake::state_machine::{CelebrationController, CelebrationPhase, CelebrationState, Gesture};
use wishcake::wish::{GeminiClient, Language, Tone, WishRequest};

#[derive(Parser, Debug)]
#[command(name = "wishcake", version, about = "AI birthday wishes and a cake you can blow out")]
struct Cli {
    /// Who the birthday is for.
    #[arg(long)]
    name: String,
    #[arg(long)]
    age: Option<u32>,
    #[arg(long, default_value = "Friend")]
    relation: String,
    #[arg(long, default_value_t = Tone::Heartfelt)]
    tone: Tone,
    #[arg(long, default_value_t = Language::Hinglish)]
    language: Language,
    #[arg(long, default_value_t = CardTheme::Classic)]
    theme: CardTheme,
    /// JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Skip the microphone; candles can only be skipped by hand.
    #[arg(long)]
    no_mic: bool,
    /// No sound cues.
    #[arg(long)]
    mute: bool,
    /// Export the card here once generated.
    #[arg(long)]
    export: Option<PathBuf>,
    #[arg(long)]
    log_json: bool,
    /// Print latency percentiles on exit.
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    wishcake::init_tracing(cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "wishcake failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Everything one celebration needs besides its input.
struct Stage {
    config: Config,
    output: Arc<dyn AudioOutput>,
    metrics: Arc<MetricsRegistry>,
    capture: Arc<dyn AudioCapture>,
}

async fn run(cli: Cli) -> wishcake::Result<()> {
    let config = Config::load_or_default(cli.config.as_deref());
    let metrics = Arc::new(MetricsRegistry::new());

    let output: Arc<dyn AudioOutput> = if cli.mute || !config.audio.play_sounds {
        Arc::new(NullOutput)
    } else {
        Arc::new(RodioOutput::start())
    };
    let capture: Arc<dyn AudioCapture> = if cli.no_mic {
        Arc::new(DisabledCapture)
    } else {
        Arc::new(CpalCapture::new(config.audio.clone()))
    };

    let backend = Arc::new(GeminiClient::new(&config.generation)?);
    let mut flow = AppFlow::new(
        backend,
        Arc::clone(&output),
        Arc::clone(&metrics),
        config.generation.image_timeout(),
    );

    let request = WishRequest {
        name: cli.name.clone(),
        age: cli.age,
        relation: cli.relation.clone(),
        tone: cli.tone,
        language: cli.language,
    };
    let stage = Stage {
        config,
        output,
        metrics: Arc::clone(&metrics),
        capture,
    };
    let mut input = spawn_input();
    let mut theme = cli.theme;

    info!(name = %request.name, tone = %request.tone, language = %request.language, "wishcake starting");

    'app: loop {
        println!("AI is crafting a special surprise for {}...", request.name.trim());
        match flow.generate(request.clone()).await {
            Ok(()) => {}
            Err(FlowError::Generation(message)) => {
                println!("{message}");
                println!("Type `retry` to try again or `quit` to leave.");
                loop {
                    match input.recv().await.as_deref().map(str::trim) {
                        Some("retry") => continue 'app,
                        Some("quit") | None => break 'app,
                        Some(_) => println!("Type `retry` or `quit`."),
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }

        let Some(greeting) = flow.greeting().cloned() else {
            break;
        };
        let mut card = Card::new(&greeting.wish, &greeting.image).with_theme(theme);
        if let Some(path) = &cli.export {
            report_export(export_card(&card, path));
        }
        show_card(&card);

        loop {
            let Some(line) = input.recv().await else {
                break 'app;
            };
            let line = line.trim();
            let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
            match command {
                "" => {}
                "cake" => {
                    if !flow.start_cake_time() {
                        continue;
                    }
                    match celebrate(&stage, &mut input, &request.name).await {
                        CelebrationOutcome::Completed => {
                            flow.finish_cake_time();
                            show_card(&card);
                        }
                        CelebrationOutcome::TornDown => break 'app,
                    }
                }
                "theme" => match arg.parse::<CardTheme>() {
                    Ok(next) => {
                        theme = next;
                        card = card.with_theme(next);
                        println!("Theme: {next}");
                    }
                    Err(e) => println!("{e}"),
                },
                "save" | "download" => {
                    let path = PathBuf::from(card.file_stem());
                    report_export(export_card(&card, &path));
                }
                "new" => {
                    flow.reset();
                    continue 'app;
                }
                "quit" => break 'app,
                other => println!("Unknown command `{other}`. Try: cake | theme <name> | save | new | quit"),
            }
        }
    }

    if cli.metrics {
        match serde_json::to_string_pretty(&metrics.summary()) {
            Ok(summary) => eprintln!("{summary}"),
            Err(e) => warn!(error = %e, "failed to serialize metrics"),
        }
    }
    info!("wishcake exiting");
    Ok(())
}

/// Run the cake sequence, forwarding stdin lines as gestures. `quit` or
/// end of input tears the view down.
async fn celebrate(
    stage: &Stage,
    input: &mut mpsc::Receiver<String>,
    name: &str,
) -> CelebrationOutcome {
    let controller = CelebrationController::new(
        stage.config.celebration.clone(),
        Arc::clone(&stage.output),
        Arc::clone(&stage.metrics),
    );
    let presenter = tokio::spawn(present(
        controller.subscribe(),
        stage.config.celebration.blow_threshold,
        controller.skip_available(),
        name.trim().to_string(),
    ));

    let (gesture_tx, gesture_rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let mut driver = tokio::spawn(run_celebration(
        controller,
        Arc::clone(&stage.capture),
        FrameClock::new(stage.config.celebration.frame_interval()),
        gesture_rx,
        cancel.clone(),
    ));
    let mut input_open = true;

    let outcome = loop {
        tokio::select! {
            joined = &mut driver => {
                break joined.unwrap_or_else(|e| {
                    warn!(error = %e, "celebration task failed");
                    CelebrationOutcome::TornDown
                });
            }
            line = input.recv(), if input_open => {
                let Some(line) = line else {
                    input_open = false;
                    cancel.cancel();
                    continue;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "quit" {
                    cancel.cancel();
                    continue;
                }
                match line.parse::<Gesture>() {
                    Ok(gesture) => {
                        if gesture_tx.send(gesture).await.is_err() {
                            cancel.cancel();
                        }
                    }
                    Err(e) => println!("{e}"),
                }
            }
        }
    };

    presenter.abort();
    outcome
}

/// Print a prompt on each phase change and an amplitude meter while the
/// candles are lit.
async fn present(
    mut rx: watch::Receiver<CelebrationState>,
    threshold: f32,
    skip_available: bool,
    name: String,
) {
    println!("\nHappy Birthday, {name}!");
    let mut last_phase = None;
    let mut metering = false;
    loop {
        let state = rx.borrow_and_update().clone();
        if last_phase != Some(state.phase) {
            if metering {
                eprintln!();
                metering = false;
            }
            println!("{}", phase_prompt(state.phase, skip_available));
            last_phase = Some(state.phase);
        } else if state.phase == CelebrationPhase::CandlesLit && state.mic_session_active {
            eprint!("\r{}", meter(state.current_amplitude, threshold));
            metering = true;
        }
        if state.finished || rx.changed().await.is_err() {
            break;
        }
    }
}

fn phase_prompt(phase: CelebrationPhase, skip_available: bool) -> &'static str {
    match phase {
        CelebrationPhase::CandlesLit if skip_available => {
            "Hawa mein wish mangiye aur blow kijiye! (or type `skip`)"
        }
        CelebrationPhase::CandlesLit => "Hawa mein wish mangiye aur blow kijiye!",
        CelebrationPhase::CandlesOut => "Maza aa gaya! Cake taiyaar hai.",
        CelebrationPhase::ChoosingSong => {
            "Gana bajayein? Type `classic`, `pop` or `jazz`, then `cut`."
        }
        CelebrationPhase::CakeCut => "Cake kaat diya! Eak surprise box! Type `open`.",
        CelebrationPhase::GiftClosed => "Opening...",
        CelebrationPhase::GiftOpen => {
            "Janamdin Mubarak! \"Khushi se bhara rahe aapka har din.\" Type `close` to see your card."
        }
    }
}

/// `[#########|.....]  42.0` with `|` marking the threshold.
fn meter(amplitude: f32, threshold: f32) -> String {
    const WIDTH: usize = 30;
    let scale = |v: f32| ((v.clamp(0.0, 255.0) / 255.0) * WIDTH as f32).round() as usize;
    let filled = scale(amplitude);
    let mark = scale(threshold).min(WIDTH - 1);
    let bar: String = (0..WIDTH)
        .map(|i| match i {
            i if i == mark => '|',
            i if i < filled => '#',
            _ => '.',
        })
        .collect();
    format!("[{bar}] {amplitude:>5.1}")
}

fn show_card(card: &Card) {
    println!("\n{}", card.render_text());
    println!("Commands: cake | theme <classic|royal|pop|vintage|neon> | save | new | quit");
}

fn report_export(outcome: ExportOutcome) {
    match outcome {
        ExportOutcome::Svg(path) | ExportOutcome::Fallback(path) => {
            println!("Card saved to {}", path.display());
        }
        ExportOutcome::ManualCapture(message) => println!("{message}"),
    }
}

/// Stdin lines on a dedicated thread; a blocking read there cannot hold up
/// runtime shutdown.
fn spawn_input() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(32);
    let spawned = std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "failed to spawn stdin reader");
    }
    rx
}
