//! Stand-in generation engine.
//!
//! Plays the role of the on-device diffusion pipeline: one worker thread per
//! generation attempt that starts a run, emits a progress event per step,
//! synthesises a deterministic image from the seed, and hands the result
//! back over a channel. It never touches the presentation thread. A real
//! model integration replaces [`synthesise`] and keeps the rest of the
//! shape.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Result};
use compositor::PixelImage;
use crossbeam_channel::{bounded, Receiver};
use progress::ProgressEmitter;

/// Parameters for one generation attempt.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub seed: u64,
    pub steps: u32,
    pub width: u32,
    pub height: u32,
    /// Simulated per-step work; zero in tests.
    pub step_delay: Duration,
}

/// Handle to a generation attempt running on its worker thread.
pub struct GenerationJob {
    receiver: Receiver<PixelImage>,
    join_handle: Option<JoinHandle<()>>,
}

/// Spawns the worker for one attempt.
pub fn spawn(emitter: ProgressEmitter, request: GenerationRequest) -> Result<GenerationJob> {
    let (result_tx, result_rx) = bounded(1);
    let join_handle = thread::Builder::new()
        .name("forgeview-engine".into())
        .spawn(move || {
            let run = emitter.start_run();
            for step in 1..=request.steps {
                if !request.step_delay.is_zero() {
                    thread::sleep(request.step_delay);
                }
                if let Err(error) = emitter.emit(run, step, request.steps) {
                    tracing::warn!(error = %error, step, "engine produced invalid progress");
                    break;
                }
            }
            let image = synthesise(request.seed, request.width, request.height);
            emitter.finish_run(run);
            // The host may have abandoned the job; that is not the worker's
            // problem.
            let _ = result_tx.send(image);
        })
        .map_err(|err| anyhow!("failed to spawn engine thread: {err}"))?;

    Ok(GenerationJob {
        receiver: result_rx,
        join_handle: Some(join_handle),
    })
}

impl GenerationJob {
    /// Non-blocking check for the finished image.
    pub fn poll(&mut self) -> Option<PixelImage> {
        self.receiver.try_recv().ok()
    }

    /// Joins the worker thread after the result has been received.
    pub fn finish(mut self) -> Result<()> {
        if let Some(handle) = self.join_handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("engine thread panicked"))?;
        }
        Ok(())
    }
}

/// Derives a deterministic RGBA image from the seed.
///
/// Per-pixel splitmix-style hashing: good-looking noise, stable across runs,
/// and cheap enough that the step delay dominates the runtime.
fn synthesise(seed: u64, width: u32, height: u32) -> PixelImage {
    let width = width.max(1);
    let height = height.max(1);
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let mut state = seed
                .wrapping_add(((y as u64) << 32) | x as u64)
                .wrapping_mul(0x9e37_79b9_7f4a_7c15);
            state ^= state >> 30;
            state = state.wrapping_mul(0xbf58_476d_1ce4_e5b9);
            state ^= state >> 27;
            pixels.extend([
                (state >> 16) as u8,
                (state >> 32) as u8,
                (state >> 48) as u8,
                255,
            ]);
        }
    }
    PixelImage::from_rgba8(width, height, pixels).expect("synthesised buffer matches dimensions")
}
