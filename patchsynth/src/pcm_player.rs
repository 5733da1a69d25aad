//! Block-wise PCM output: a producer thread pulls audio from a shared
//! [`Renderer`] and pushes it into a blocking [`PcmSink`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::SynthError;

/// Anything that can produce interleaved 16-bit frames on demand.
pub trait Renderer {
    /// Fills `out` completely with interleaved frames.
    fn render(&mut self, out: &mut [i16]);

    /// Number of interleaved output channels.
    fn channel_count(&self) -> usize;

    /// Whether there is nothing left to play.
    fn is_finished(&self) -> bool {
        false
    }
}

/// Destination for rendered blocks. `write` may block until the device accepts the data.
pub trait PcmSink {
    fn write(&mut self, block: &[i16]) -> Result<(), SynthError>;

    /// Called once after the last block.
    fn finish(&mut self) -> Result<(), SynthError> {
        Ok(())
    }
}

/// Appends the little-endian byte form of `samples` to `out`.
pub fn write_le_bytes(samples: &[i16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
}

/// Runs the pull loop until `stop` is set, the renderer finishes or the sink fails.
///
/// The renderer is locked only while a block is rendered, never while the sink writes.
/// Returns the number of frames written.
pub fn pull_loop<R, S>(
    renderer: &Mutex<R>,
    sink: &mut S,
    block_frames: usize,
    stop: &AtomicBool,
) -> Result<u64, SynthError>
where
    R: Renderer + ?Sized,
    S: PcmSink + ?Sized,
{
    let channels = renderer.lock().channel_count();
    let mut block = vec![0i16; block_frames.max(1) * channels];
    let mut frames = 0u64;

    while !stop.load(Ordering::Acquire) {
        {
            let mut renderer = renderer.lock();
            if renderer.is_finished() {
                break;
            }
            renderer.render(&mut block);
        }
        if let Err(error) = sink.write(&block) {
            warn!(%error, frames, "audio sink failed, stopping playback");
            return Err(error);
        }
        frames += block_frames as u64;
    }

    sink.finish()?;
    Ok(frames)
}

/// Handle to a producer thread running [`pull_loop`].
#[derive(Debug)]
pub struct PcmPlayer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<u64, SynthError>>>,
}

impl PcmPlayer {
    pub fn spawn<R, S>(renderer: Arc<Mutex<R>>, mut sink: S, block_frames: usize) -> Result<Self, SynthError>
    where
        R: Renderer + Send + 'static,
        S: PcmSink + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("pcm-player".to_string())
            .spawn(move || pull_loop(&renderer, &mut sink, block_frames, &flag))?;
        info!(block_frames, "pcm player started");

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Asks the loop to stop at the next block boundary and waits for it.
    pub fn stop(mut self) -> Result<u64, SynthError> {
        self.stop.store(true, Ordering::Release);
        self.wait()
    }

    /// Waits for the loop to end on its own.
    pub fn join(mut self) -> Result<u64, SynthError> {
        self.wait()
    }

    fn wait(&mut self) -> Result<u64, SynthError> {
        let Some(handle) = self.handle.take() else {
            return Ok(0);
        };
        let frames = handle
            .join()
            .map_err(|_| SynthError::Output("pcm player thread panicked".to_string()))??;
        info!(frames, "pcm player stopped");
        Ok(frames)
    }
}

impl Drop for PcmPlayer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        next: i16,
        blocks_left: usize,
    }

    impl Renderer for Counter {
        fn render(&mut self, out: &mut [i16]) {
            for sample in out.iter_mut() {
                *sample = self.next;
                self.next = self.next.wrapping_add(1);
            }
            self.blocks_left = self.blocks_left.saturating_sub(1);
        }

        fn channel_count(&self) -> usize {
            2
        }

        fn is_finished(&self) -> bool {
            self.blocks_left == 0
        }
    }

    #[derive(Default)]
    struct VecSink {
        samples: Arc<Mutex<Vec<i16>>>,
        fail_after: Option<usize>,
    }

    impl PcmSink for VecSink {
        fn write(&mut self, block: &[i16]) -> Result<(), SynthError> {
            let mut samples = self.samples.lock();
            if self.fail_after.is_some_and(|limit| samples.len() >= limit) {
                return Err(SynthError::Output("device gone".to_string()));
            }
            samples.extend_from_slice(block);
            Ok(())
        }
    }

    #[test]
    fn loop_runs_until_the_renderer_finishes() {
        let renderer = Arc::new(Mutex::new(Counter {
            next: 0,
            blocks_left: 3,
        }));
        let sink = VecSink::default();
        let samples = Arc::clone(&sink.samples);

        let player = PcmPlayer::spawn(renderer, sink, 4).unwrap();
        assert_eq!(player.join().unwrap(), 12);

        let samples = samples.lock();
        assert_eq!(samples.len(), 24);
        assert!(samples.iter().enumerate().all(|(i, &s)| s == i as i16));
    }

    #[test]
    fn stop_ends_an_endless_renderer() {
        let renderer = Arc::new(Mutex::new(Counter {
            next: 0,
            blocks_left: usize::MAX,
        }));
        let player = PcmPlayer::spawn(renderer, VecSink::default(), 16).unwrap();
        assert!(player.stop().is_ok());
    }

    #[test]
    fn sink_errors_surface_from_join() {
        let renderer = Arc::new(Mutex::new(Counter {
            next: 0,
            blocks_left: usize::MAX,
        }));
        let sink = VecSink {
            fail_after: Some(8),
            ..Default::default()
        };
        let player = PcmPlayer::spawn(renderer, sink, 4).unwrap();
        assert!(matches!(player.join(), Err(SynthError::Output(_))));
    }

    #[test]
    fn le_bytes() {
        let mut bytes = Vec::new();
        write_le_bytes(&[1, -2], &mut bytes);
        assert_eq!(bytes, vec![1, 0, 0xFE, 0xFF]);
    }
}
