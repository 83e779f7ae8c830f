//! Microphone session: exclusive access to the default input device and a
//! non-blocking spectral energy reading.
//!
//! The cpal stream is not `Send` on every platform, so it lives on its own
//! `mic-capture` thread. The callback only writes into the shared ring; the
//! session analyses the ring on demand. Closing signals the thread to drop
//! the stream and does not wait for it to exit.

use std::sync::Arc;

use crossbeam_channel as cb;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::ring_buffer::RingBuffer;
use super::spectrum::SpectrumAnalyser;
use crate::config::AudioConfig;
use crate::error::CaptureError;

/// A live microphone handle, exclusively owned by one celebration.
pub trait CaptureSession: Send {
    /// Average spectral energy of the capture buffer, `0.0..=255.0`.
    /// Returns 0 once closed.
    fn sample(&mut self) -> f32;

    /// Release the hardware stream. Safe to call any number of times.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Host capability that opens capture sessions.
pub trait AudioCapture: Send + Sync {
    /// Request the default input device. Blocks until the host grants or
    /// refuses access; callers run it off the event loop.
    fn open(&self) -> Result<Box<dyn CaptureSession>, CaptureError>;
}

/// Capture used when the microphone is disabled on the command line.
pub struct DisabledCapture;

impl AudioCapture for DisabledCapture {
    fn open(&self) -> Result<Box<dyn CaptureSession>, CaptureError> {
        Err(CaptureError::Unsupported("microphone disabled".into()))
    }
}

/// cpal-backed capture of the default input device.
pub struct CpalCapture {
    config: AudioConfig,
}

impl CpalCapture {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }
}

impl AudioCapture for CpalCapture {
    fn open(&self) -> Result<Box<dyn CaptureSession>, CaptureError> {
        let (ready_tx, ready_rx) = cb::bounded(1);
        let (stop_tx, stop_rx) = cb::bounded::<()>(1);
        let config = self.config.clone();

        let thread = std::thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || run_capture_thread(config, ready_tx, stop_rx))
            .map_err(|e| CaptureError::Unsupported(format!("failed to spawn capture thread: {e}")))?;

        let ring = match ready_rx.recv() {
            Ok(Ok(ring)) => ring,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(CaptureError::Stream("capture thread exited before start".into()));
            }
        };

        // Detached: the thread drops the stream and exits once stopped.
        drop(thread);
        let analyser = SpectrumAnalyser::new(&self.config);
        let window = vec![0.0; analyser.fft_size()];
        Ok(Box::new(CpalSession {
            ring,
            analyser,
            window,
            stop_tx: Some(stop_tx),
        }))
    }
}

pub struct CpalSession {
    ring: Arc<Mutex<RingBuffer>>,
    analyser: SpectrumAnalyser,
    window: Vec<f32>,
    stop_tx: Option<cb::Sender<()>>,
}

impl CaptureSession for CpalSession {
    fn sample(&mut self) -> f32 {
        if self.stop_tx.is_none() {
            return 0.0;
        }
        self.ring.lock().copy_latest(&mut self.window);
        self.analyser.average_energy(&self.window)
    }

    fn close(&mut self) {
        let Some(stop) = self.stop_tx.take() else {
            return;
        };
        let _ = stop.send(());
        self.ring.lock().clear();
        info!("microphone session closed");
    }

    fn is_open(&self) -> bool {
        self.stop_tx.is_some()
    }
}

impl Drop for CpalSession {
    fn drop(&mut self) {
        self.close();
    }
}

type Ready = Result<Arc<Mutex<RingBuffer>>, CaptureError>;

/// Owns the cpal stream for its whole life; returns once asked to stop.
fn run_capture_thread(config: AudioConfig, ready_tx: cb::Sender<Ready>, stop_rx: cb::Receiver<()>) {
    let (stream, ring) = match build_stream(&config) {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if ready_tx.send(Ok(Arc::clone(&ring))).is_err() {
        return;
    }

    // Either an explicit stop or the session being dropped ends the stream.
    let _ = stop_rx.recv();
    drop(stream);
    debug!("capture stream dropped");
}

fn build_stream(config: &AudioConfig) -> Result<(cpal::Stream, Arc<Mutex<RingBuffer>>), CaptureError> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;
    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::Unsupported(e.to_string()))?;

    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();
    let ring = Arc::new(Mutex::new(RingBuffer::new(
        stream_config.sample_rate.0,
        config.ring_buffer_secs,
        config.fft_size,
    )));

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_input::<f32>(&device, &stream_config, Arc::clone(&ring)),
        cpal::SampleFormat::I16 => build_input::<i16>(&device, &stream_config, Arc::clone(&ring)),
        cpal::SampleFormat::U16 => build_input::<u16>(&device, &stream_config, Arc::clone(&ring)),
        other => {
            return Err(CaptureError::Unsupported(format!(
                "sample format {other:?}"
            )))
        }
    }?;

    stream
        .play()
        .map_err(|e| CaptureError::Stream(format!("failed to start input stream: {e}")))?;

    info!(
        device = %device.name().unwrap_or_default(),
        sample_rate = stream_config.sample_rate.0,
        channels = stream_config.channels,
        "microphone session opened"
    );
    Ok((stream, ring))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: Arc<Mutex<RingBuffer>>,
) -> Result<cpal::Stream, CaptureError>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    use cpal::traits::DeviceTrait;
    use cpal::Sample;

    let channels = config.channels.max(1) as usize;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mut rb = ring.lock();
                for frame in data.chunks(channels) {
                    rb.write(&[frame[0].to_sample::<f32>()]);
                }
            },
            |err| {
                warn!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(map_build_error)
}

fn map_build_error(err: cpal::BuildStreamError) -> CaptureError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => CaptureError::NoDevice,
        cpal::BuildStreamError::StreamConfigNotSupported
        | cpal::BuildStreamError::InvalidArgument => CaptureError::Unsupported(err.to_string()),
        cpal::BuildStreamError::BackendSpecific { err } => CaptureError::Denied(err.description),
        other => CaptureError::Stream(other.to_string()),
    }
}
