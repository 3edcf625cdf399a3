use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use signify_tracker::config::Config;
use signify_tracker::hand::{FrameRef, LandmarkSmoother};
use signify_tracker::projection::{OrbitClock, OrbitParams};
use signify_tracker::render::{draw_holographic, draw_overlay, draw_world_view, Canvas, Key, ViewerWindow};
use signify_tracker::replay::{load_image, Recording};

const CONFIG_PATH: &str = "config.toml";
const FRAME_INTERVAL: Duration = Duration::from_millis(16);
const BACKGROUND: u32 = 0x000000;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(path) = args.get(1) else {
        bail!("usage: hand_viewer <recording.jsonl> [config.toml]");
    };
    let config = Config::load_or_default(args.get(2).map(String::as_str).unwrap_or(CONFIG_PATH));
    let recording = Recording::load(path)?;
    if recording.is_empty() {
        bail!("recording {} has no frames", path);
    }

    // overlay canvas takes the size of the first readable still
    let first_still = recording.frames().iter().find_map(|f| match &f.detection.image {
        Some(FrameRef::Path(p)) => load_image(p).ok(),
        _ => None,
    });
    let (video_w, video_h) = first_still
        .as_ref()
        .map(|f| (f.width as usize, f.height as usize))
        .unwrap_or((config.camera.width as usize, config.camera.height as usize));

    let world_size = config.projection.world_view_size as usize;
    let orbit_size = config.projection.orbit_view_size as usize;
    let side_w = world_size.max(orbit_size);
    let window_h = video_h.max(world_size + orbit_size);

    let mut window = ViewerWindow::new("Hand Viewer", video_w + side_w, window_h)?;
    let mut video = Canvas::new(video_w, video_h);
    let mut world = Canvas::new(world_size, world_size);
    let mut orbit = Canvas::new(orbit_size, orbit_size);

    let mirror = config.projection.mirror_overlay;
    let orbit_params = OrbitParams::for_canvas(orbit_size as u32, orbit_size as u32, &config.projection);
    let mut clock = OrbitClock::from_config(&config.projection);
    let mut smoother = LandmarkSmoother::from_config(&config.smooth);

    println!("Hand Viewer: {} frames over {:.1}s", recording.len(), recording.duration().as_secs_f32());
    println!("SPACE = pause, R = restart, ESC = quit");

    let mut start = Instant::now();
    let mut paused_at: Option<Instant> = None;
    let mut cursor = 0usize;
    let mut still_path: Option<PathBuf> = None;

    while window.is_open() {
        let frame_start = Instant::now();

        if window.is_key_pressed(Key::Space) {
            match paused_at.take() {
                Some(at) => start += at.elapsed(),
                None => paused_at = Some(Instant::now()),
            }
        }
        if window.is_key_pressed(Key::R) {
            start = Instant::now();
            paused_at = None;
            cursor = 0;
            smoother.reset();
        }

        // advance to the newest recorded frame that is due
        let now = paused_at.unwrap_or_else(Instant::now);
        let played = now.duration_since(start);
        while cursor + 1 < recording.len() && recording.frames()[cursor + 1].offset() <= played {
            cursor += 1;
        }
        let detection = &recording.frames()[cursor].detection;

        if let Some(FrameRef::Path(p)) = &detection.image {
            if still_path.as_ref() != Some(p) {
                match load_image(p) {
                    Ok(still) => video.draw_rgb(still.width as usize, still.height as usize, &still.rgb, mirror),
                    Err(e) => {
                        warn!("{:#}", e);
                        video.clear(BACKGROUND);
                    }
                }
                still_path = Some(p.clone());
            }
        } else if still_path.take().is_some() {
            video.clear(BACKGROUND);
        }

        let mut frame_canvas = video.clone();
        let hands = smoother.apply(&detection.multi_hand_landmarks);
        for hand in &hands {
            draw_overlay(&mut frame_canvas, hand, mirror);
        }

        draw_world_view(&mut world, &detection.multi_hand_world_landmarks, config.projection.padding);

        let angle = clock.tick();
        orbit.clear(BACKGROUND);
        if let Some(hand) = detection.multi_hand_world_landmarks.first() {
            draw_holographic(&mut orbit, hand, angle, &orbit_params);
        }

        window.blit(&frame_canvas, 0, 0);
        window.blit(&world, video_w, 0);
        window.blit(&orbit, video_w, world_size);
        window.update()?;

        let elapsed = frame_start.elapsed();
        if elapsed < FRAME_INTERVAL {
            std::thread::sleep(FRAME_INTERVAL - elapsed);
        }
    }

    println!("Shutting down...");
    Ok(())
}
