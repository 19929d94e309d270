use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use compositor::{DisplaySink, Frame, PixelImage, RenderSurface, TintCompositor};
use progress::ProgressEvent;

use crate::cli::{Cli, ProgressFormat};
use crate::config::{self, SessionConfig, Settings};
use crate::engine::{self, GenerationRequest};

/// Simulated per-step work for the stand-in engine.
const STEP_DELAY: Duration = Duration::from_millis(25);

/// How often the presentation loop polls for progress and results.
const PUMP_INTERVAL: Duration = Duration::from_millis(10);

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn run(cli: Cli) -> Result<()> {
    let session = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    let settings = config::resolve(&cli, &session);

    let source = match &cli.image {
        Some(path) => load_image(path)?,
        None => generate_image(&settings, cli.progress)?,
    };

    let sink = PngSink {
        path: cli.output.clone(),
    };
    let mut surface = RenderSurface::new(sink);
    surface.on_error(|error| tracing::warn!(error = %error, "composite failed; fallback frame shown"));
    surface.set_tint_color(settings.tint);
    surface.set_tint_intensity(settings.intensity);
    surface.set_image(Arc::new(source));
    surface.attach();

    match TintCompositor::acquire() {
        Ok(mut compositor) => surface.drive(&mut compositor),
        Err(error) => {
            // No GPU on this machine: present the untinted source rather
            // than producing nothing.
            if surface.begin_composite().is_some() {
                surface.finish_composite(Err(error));
            }
        }
    }

    Ok(())
}

fn generate_image(settings: &Settings, format: ProgressFormat) -> Result<PixelImage> {
    tracing::info!(
        steps = settings.steps,
        seed = settings.seed,
        width = settings.size.0,
        height = settings.size.1,
        "starting generation"
    );
    let (mut channel, emitter) = progress::channel();
    channel.register_listener(move |event| report_progress(format, event));

    let mut job = engine::spawn(
        emitter,
        GenerationRequest {
            seed: settings.seed,
            steps: settings.steps,
            width: settings.size.0,
            height: settings.size.1,
            step_delay: STEP_DELAY,
        },
    )?;

    // Presentation loop: pump queued progress onto the listener until the
    // worker delivers the finished image.
    let image = loop {
        channel.pump();
        if let Some(image) = job.poll() {
            break image;
        }
        thread::sleep(PUMP_INTERVAL);
    };
    job.finish()?;
    // Steps emitted just before completion may still be queued.
    channel.pump();
    tracing::info!("generation finished");
    Ok(image)
}

fn report_progress(format: ProgressFormat, event: ProgressEvent) {
    match format {
        ProgressFormat::Human => {
            tracing::info!(step = event.step, total = event.total, "generation progress");
        }
        ProgressFormat::Json => {
            let payload = serde_json::json!({ "step": event.step, "total": event.total });
            println!("{payload}");
        }
    }
}

fn load_image(path: &Path) -> Result<PixelImage> {
    let decoded = image::open(path)
        .with_context(|| format!("failed to open image at {}", path.display()))?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    PixelImage::from_rgba8(width, height, rgba.into_raw())
        .context("decoded image is not displayable")
}

/// Display sink that lands every presented frame on disk as a PNG.
struct PngSink {
    path: std::path::PathBuf,
}

impl DisplaySink for PngSink {
    fn present(&mut self, frame: &Frame) {
        match save_frame(frame, &self.path) {
            Ok(()) => tracing::info!(
                path = %self.path.display(),
                width = frame.width,
                height = frame.height,
                "presented frame"
            ),
            Err(error) => tracing::warn!(
                error = %error,
                path = %self.path.display(),
                "failed to write presented frame"
            ),
        }
    }
}

fn save_frame(frame: &Frame, path: &Path) -> Result<()> {
    let buffer: image::RgbaImage =
        image::ImageBuffer::from_raw(frame.width, frame.height, frame.pixels.clone())
            .context("frame buffer does not match its dimensions")?;
    buffer
        .save(path)
        .with_context(|| format!("failed to write frame to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn saved_frames_round_trip_through_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let frame = Frame {
            width: 2,
            height: 2,
            pixels: vec![
                255, 0, 0, 255, 0, 255, 0, 255, 0, 0, 255, 255, 128, 128, 128, 255,
            ],
        };
        save_frame(&frame, &path).unwrap();

        let reloaded = load_image(&path).unwrap();
        assert_eq!(reloaded.width(), 2);
        assert_eq!(reloaded.height(), 2);
        assert_eq!(reloaded.pixels(), frame.pixels.as_slice());
    }

    #[test]
    fn end_to_end_run_writes_an_output_frame() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.png");
        let cli = Cli::try_parse_from([
            "forgeview",
            "--steps",
            "3",
            "--size",
            "8x8",
            "--tint",
            "#cd7f32",
            "--intensity",
            "0.5",
            "--output",
            output.to_str().unwrap(),
        ])
        .unwrap();

        run(cli).unwrap();
        // With a GPU the frame is tinted; without one the untinted source is
        // presented instead. Either way a displayable frame must land.
        let presented = load_image(&output).unwrap();
        assert_eq!(presented.width(), 8);
        assert_eq!(presented.height(), 8);
    }
}
