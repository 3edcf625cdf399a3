use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use signify_tracker::config::Config;
use signify_tracker::lesson::{alphabet_lessons, phrase_lessons, LessonQueue};
use signify_tracker::media::LatestFrame;
#[cfg(feature = "desktop")]
use signify_tracker::media::{MediaSession, OpenCvBackend, SessionKind};
use signify_tracker::oracle::GeminiOracle;
use signify_tracker::progress::{JsonProgressStore, Profile};
use signify_tracker::quota::DailyQuota;
use signify_tracker::replay::Recording;
use signify_tracker::session::{Collaborators, RunnerSettings, SessionEvent, SessionHandle, SessionRunner, Status};

const CONFIG_PATH: &str = "config.toml";
const LOCAL_UID: &str = "local";

fn usage() -> &'static str {
    if cfg!(feature = "desktop") {
        "usage: signify-tracker [--camera] <recording.jsonl> [lesson-id] [config.toml]"
    } else {
        "usage: signify-tracker <recording.jsonl> [lesson-id] [config.toml]"
    }
}

/// Lessons from `start_id` to the end of its catalog
fn lesson_queue(start_id: Option<&str>) -> Result<LessonQueue> {
    let Some(id) = start_id else {
        return Ok(LessonQueue::new(alphabet_lessons()));
    };
    for catalog in [alphabet_lessons(), phrase_lessons()] {
        if let Some(pos) = catalog.iter().position(|l| l.id == id) {
            return Ok(LessonQueue::new(catalog.into_iter().skip(pos)));
        }
    }
    bail!("unknown lesson '{}'", id);
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::StatusChanged { lesson_id, status } => match status {
            Status::Analyzing => println!("[{}] analyzing...", lesson_id),
            other => println!("[{}] {:?}", lesson_id, other),
        },
        SessionEvent::Countdown { seconds, percent } => println!("  hold... {}s ({:.0}%)", seconds, percent),
        SessionEvent::Feedback(j) => {
            let mark = if j.is_correct { "correct" } else { "incorrect" };
            println!("  {} ({}): {}", mark, j.score, j.feedback);
        }
        SessionEvent::LessonComplete { lesson_id, profile } => {
            println!("[{}] complete, streak {}", lesson_id, profile.streak)
        }
        SessionEvent::QueueFinished => println!("all lessons complete"),
    }
}

/// Console commands: `t` scans now, `q` quits
fn spawn_console(handle: SessionHandle) {
    let rt = tokio::runtime::Handle::current();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            let result = match line.trim() {
                "t" => rt.block_on(handle.trigger()),
                "q" => rt.block_on(handle.close()),
                _ => continue,
            };
            if result.is_err() {
                return;
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args: Vec<String> = std::env::args().collect();
    let camera = args.get(1).is_some_and(|a| a == "--camera");
    if camera {
        args.remove(1);
    }
    let Some(recording_path) = args.get(1) else {
        bail!(usage());
    };
    let config = Config::load_or_default(args.get(3).map(String::as_str).unwrap_or(CONFIG_PATH));
    let queue = lesson_queue(args.get(2).map(String::as_str))?;
    let recording = Recording::load(recording_path)?;

    let store = Arc::new(JsonProgressStore::new(&config.progress.dir));
    let profile = store.load(LOCAL_UID, "Local user").await?;
    let quota = DailyQuota::from_config(&config.quota).await;
    // live mode reads pixels from the webcam and landmarks from the recording
    #[cfg(feature = "desktop")]
    let mut media = camera.then(|| {
        MediaSession::new(Arc::new(OpenCvBackend), config.camera.clone(), config.audio.clone())
    });
    #[cfg(not(feature = "desktop"))]
    if camera {
        bail!("--camera needs the desktop feature");
    }
    #[cfg(feature = "desktop")]
    let snapshots = media.as_ref().map(MediaSession::snapshots).unwrap_or_else(LatestFrame::new);
    #[cfg(not(feature = "desktop"))]
    let snapshots = LatestFrame::new();

    let collab = Collaborators {
        snapshots: Arc::new(snapshots.clone()),
        oracle: Arc::new(GeminiOracle::from_config(&config.oracle)?),
        progress: store,
        quota: quota.clone(),
    };

    if let Some(lesson) = queue.current() {
        let mode = if camera { "camera" } else { "replay" };
        println!("=== Signify {} ({}): {} ({}) ===", mode, env!("SIGNIFY_BUILD"), lesson.title, lesson.description);
    }
    println!("commands: t = scan now, q = quit");

    let (runner, handle) = SessionRunner::new(RunnerSettings::from_config(&config), queue, profile, collab)?;

    let mut events = handle.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("{} events skipped", n),
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
    spawn_console(handle.clone());

    #[cfg(feature = "desktop")]
    if let Some(media) = media.as_mut() {
        let frames_rx = match media.acquire(SessionKind::Practice, Box::new(recording.into_detector())).await {
            Ok(rx) => rx,
            Err(e) => bail!("hand tracking unavailable: {}", e),
        };
        let profile = runner.run(frames_rx).await;
        media.release();
        print_summary(&profile, &quota);
        return Ok(());
    }

    // let the last attempt settle after the recording ends, then close
    let (frames_tx, frames_rx) = mpsc::channel(8);
    let linger = config.oracle.timeout() + config.session.incorrect_delay() + Duration::from_secs(1);
    let replay = tokio::spawn(recording.play(frames_tx, snapshots));
    let closer = handle.clone();
    tokio::spawn(async move {
        let _ = replay.await;
        info!("recording finished, closing in {:?}", linger);
        tokio::time::sleep(linger).await;
        let _ = closer.close().await;
    });

    let profile = runner.run(frames_rx).await;
    print_summary(&profile, &quota);
    Ok(())
}

fn print_summary(profile: &Profile, quota: &DailyQuota) {
    println!(
        "streak {} / lessons {} / oracle calls today {} of {}",
        profile.streak,
        profile.total_lessons,
        quota.usage(),
        quota.limit()
    );
}
