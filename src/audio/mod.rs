//! Audio plumbing: microphone capture → ring buffer → spectral energy, and
//! synthesized cue playback on the output device.
//! Capture runs on cpal's callback thread; playback on its own thread.

pub mod capture;
pub mod cues;
pub mod ring_buffer;
pub mod spectrum;
