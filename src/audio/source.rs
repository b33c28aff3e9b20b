use crate::error::{Result, VoxprepError};
use std::collections::VecDeque;

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (real microphone, WAV file,
/// mock). The service owns exactly one source per recording session.
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    ///
    /// Must release the underlying device so another session can open it.
    fn stop(&mut self) -> Result<()>;

    /// Drain the samples captured since the last read.
    ///
    /// # Returns
    /// 16-bit PCM mono samples, empty when nothing new arrived.
    fn read_samples(&mut self) -> Result<Vec<i16>>;

    /// Whether the source ends on its own (file playback) rather than
    /// running until stopped (live microphone). Finite sources signal the
    /// end by returning an empty read.
    fn is_finite(&self) -> bool {
        false
    }
}

/// Mock audio source for testing
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    is_started: bool,
    repeating: Option<Vec<i16>>,
    chunks: VecDeque<Vec<i16>>,
    finite: bool,
    should_fail_start: bool,
    should_fail_stop: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockAudioSource {
    /// Create a new mock audio source with default settings
    pub fn new() -> Self {
        Self {
            is_started: false,
            repeating: Some(vec![0i16; 160]),
            chunks: VecDeque::new(),
            finite: false,
            should_fail_start: false,
            should_fail_stop: false,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Configure the mock to return the same samples on every read
    pub fn with_samples(mut self, samples: Vec<i16>) -> Self {
        self.repeating = Some(samples);
        self.chunks.clear();
        self
    }

    /// Configure the mock to return each chunk once, in order, then
    /// empty reads
    pub fn with_chunks(mut self, chunks: Vec<Vec<i16>>) -> Self {
        self.repeating = None;
        self.chunks = chunks.into();
        self
    }

    /// Mark the mock as a finite source
    pub fn with_finite(mut self) -> Self {
        self.finite = true;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on stop
    pub fn with_stop_failure(mut self) -> Self {
        self.should_fail_stop = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(VoxprepError::AudioCapture {
                message: self.error_message.clone(),
            })
        } else {
            self.is_started = true;
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        if self.should_fail_stop {
            Err(VoxprepError::AudioCapture {
                message: self.error_message.clone(),
            })
        } else {
            self.is_started = false;
            Ok(())
        }
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.should_fail_read {
            return Err(VoxprepError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        if let Some(samples) = &self.repeating {
            return Ok(samples.clone());
        }
        Ok(self.chunks.pop_front().unwrap_or_default())
    }

    fn is_finite(&self) -> bool {
        self.finite
    }
}
