//! Drives a [`VerificationSession`] from live detections, a tick clock and
//! user controls, and performs the side effects it asks for.

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::machine::{Command, SessionToken, Status, Timings, VerificationSession};
use crate::config::Config;
use crate::gate::DetectionGate;
use crate::hand::DetectionFrame;
use crate::lesson::{Lesson, LessonQueue};
use crate::media::{Snapshot, SnapshotSource};
use crate::oracle::{EvaluationOracle, EvaluationRequest, Judgment, OracleError, VerdictPolicy};
use crate::progress::{Profile, ProgressTracker};
use crate::quota::DailyQuota;

const EVENT_CAPACITY: usize = 256;
const CONTROL_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub enum Control {
    /// Manual scan
    Trigger,
    SwitchLesson(Lesson),
    Close,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StatusChanged { lesson_id: String, status: Status },
    /// Whole seconds left and ring progress (0–100)
    Countdown { seconds: u64, percent: f32 },
    Feedback(Judgment),
    LessonComplete { lesson_id: String, profile: Profile },
    QueueFinished,
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub timings: Timings,
    pub tick: Duration,
    pub oracle_timeout: Duration,
    pub verdict: VerdictPolicy,
    pub mirror_snapshot: bool,
    pub jpeg_quality: u8,
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timings: Timings::from_config(&config.session),
            tick: config.session.tick_interval(),
            oracle_timeout: config.oracle.timeout(),
            verdict: config.oracle.verdict,
            mirror_snapshot: config.session.mirror_snapshot,
            jpeg_quality: config.session.jpeg_quality,
        }
    }
}

/// External services the runner talks to
pub struct Collaborators {
    pub snapshots: Arc<dyn SnapshotSource>,
    pub oracle: Arc<dyn EvaluationOracle>,
    pub progress: Arc<dyn ProgressTracker>,
    pub quota: DailyQuota,
}

/// Caller side of a running session
#[derive(Clone)]
pub struct SessionHandle {
    control: mpsc::Sender<Control>,
    events: broadcast::Sender<SessionEvent>,
    presence: watch::Receiver<bool>,
}

impl SessionHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn hand_presence(&self) -> watch::Receiver<bool> {
        self.presence.clone()
    }

    pub async fn trigger(&self) -> Result<()> {
        self.send(Control::Trigger).await
    }

    pub async fn switch_lesson(&self, lesson: Lesson) -> Result<()> {
        self.send(Control::SwitchLesson(lesson)).await
    }

    pub async fn close(&self) -> Result<()> {
        self.send(Control::Close).await
    }

    async fn send(&self, control: Control) -> Result<()> {
        if self.control.send(control).await.is_err() {
            bail!("session is no longer running");
        }
        Ok(())
    }
}

struct InFlight {
    token: SessionToken,
    handle: JoinHandle<Result<Judgment, OracleError>>,
}

/// What subscribers have last been told
#[derive(PartialEq)]
struct Observed {
    lesson_id: String,
    status: Status,
    seconds: u64,
}

pub struct SessionRunner {
    machine: VerificationSession,
    lesson: Lesson,
    queue: LessonQueue,
    profile: Profile,
    gate: DetectionGate,
    collab: Collaborators,
    settings: RunnerSettings,
    control: mpsc::Receiver<Control>,
    events: broadcast::Sender<SessionEvent>,
    in_flight: Option<InFlight>,
}

impl SessionRunner {
    pub fn new(
        settings: RunnerSettings,
        queue: LessonQueue,
        profile: Profile,
        collab: Collaborators,
    ) -> Result<(Self, SessionHandle)> {
        let Some(lesson) = queue.current().cloned() else {
            bail!("lesson queue is empty");
        };
        let (control_tx, control) = mpsc::channel(CONTROL_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let gate = DetectionGate::new();

        let handle = SessionHandle {
            control: control_tx,
            events: events.clone(),
            presence: gate.subscribe(),
        };
        let runner = Self {
            machine: VerificationSession::new(&lesson.id, settings.timings),
            lesson,
            queue,
            profile,
            gate,
            collab,
            settings,
            control,
            events,
            in_flight: None,
        };
        Ok((runner, handle))
    }

    /// Run until closed or the lesson queue is exhausted; returns the final profile
    pub async fn run(mut self, mut frames: mpsc::Receiver<DetectionFrame>) -> Profile {
        let mut ticker = time::interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut frames_open = true;
        info!(lesson = %self.lesson.id, remaining = self.queue.len(), "session started");

        loop {
            let before = self.observe();
            let flow = tokio::select! {
                frame = frames.recv(), if frames_open => {
                    match frame {
                        Some(frame) => {
                            let present = self.gate.observe(&frame);
                            self.machine.on_hands(present, now());
                        }
                        None => {
                            debug!("detection stream closed");
                            frames_open = false;
                        }
                    }
                    ControlFlow::Continue(())
                }
                _ = ticker.tick() => {
                    let commands = self.machine.tick(now());
                    self.execute(commands).await
                }
                control = self.control.recv() => match control {
                    Some(Control::Trigger) => {
                        let commands = self.machine.trigger(now());
                        self.execute(commands).await
                    }
                    Some(Control::SwitchLesson(lesson)) => {
                        self.switch_lesson(lesson);
                        ControlFlow::Continue(())
                    }
                    Some(Control::Close) | None => ControlFlow::Break(()),
                },
                (token, result) = settle(&mut self.in_flight) => {
                    let commands = self.machine.on_judgment(token, result, now());
                    self.execute(commands).await
                }
            };
            if flow.is_break() {
                break;
            }
            self.publish_changes(before);
        }

        self.abort_in_flight();
        info!(lesson = %self.lesson.id, "session closed");
        self.profile
    }

    async fn execute(&mut self, commands: Vec<Command>) -> ControlFlow<()> {
        let mut pending: VecDeque<Command> = commands.into();
        while let Some(command) = pending.pop_front() {
            match command {
                Command::Capture(token) => pending.extend(self.dispatch(token)),
                Command::RecordProgress(_) => self.record_progress().await,
                Command::Complete(_) => {
                    if self.complete_lesson().is_break() {
                        return ControlFlow::Break(());
                    }
                }
            }
        }
        ControlFlow::Continue(())
    }

    /// Snapshot the latest frame and start exactly one oracle call for `token`
    fn dispatch(&mut self, token: SessionToken) -> Vec<Command> {
        self.abort_in_flight();

        let Some(frame) = self.collab.snapshots.latest_frame() else {
            warn!(lesson = %self.lesson.id, "no frame available for snapshot");
            return self.machine.on_snapshot_missing(token, now());
        };
        let snapshot = match Snapshot::capture(&frame, self.settings.mirror_snapshot, self.settings.jpeg_quality) {
            Ok(s) => s,
            Err(e) => {
                warn!("snapshot failed: {:#}", e);
                return self.machine.on_snapshot_missing(token, now());
            }
        };

        let request = EvaluationRequest {
            image: snapshot.to_base64(),
            target_sign_id: self.lesson.title.clone(),
            target_description: self.lesson.description.clone(),
            sign_kind: self.lesson.kind,
        };
        let oracle = self.collab.oracle.clone();
        let quota = self.collab.quota.clone();
        let timeout = self.settings.oracle_timeout;
        let policy = self.settings.verdict;

        let handle = tokio::spawn(async move {
            if quota.blocks() {
                return Err(OracleError::QuotaExhausted(quota.limit()));
            }
            let used = quota.record_call().await;
            debug!(used, limit = quota.limit(), "oracle call counted");

            match time::timeout(timeout, oracle.evaluate(&request)).await {
                Ok(raw) => raw.and_then(|raw| Judgment::validate(raw, policy)),
                Err(_) => {
                    warn!(?timeout, "evaluation timed out");
                    Err(OracleError::Timeout(timeout))
                }
            }
        });
        self.in_flight = Some(InFlight { token, handle });
        Vec::new()
    }

    async fn record_progress(&mut self) {
        match self.collab.progress.record_success(&self.profile).await {
            Ok(profile) => self.profile = profile,
            Err(e) => warn!("failed to record progress: {:#}", e),
        }
    }

    fn complete_lesson(&mut self) -> ControlFlow<()> {
        self.emit(SessionEvent::LessonComplete {
            lesson_id: self.lesson.id.clone(),
            profile: self.profile.clone(),
        });

        match self.queue.advance().cloned() {
            Some(next) => {
                info!(from = %self.lesson.id, to = %next.id, "advancing to next lesson");
                self.machine.reset(&next.id);
                self.lesson = next;
                ControlFlow::Continue(())
            }
            None => {
                info!("lesson queue finished");
                self.emit(SessionEvent::QueueFinished);
                ControlFlow::Break(())
            }
        }
    }

    fn switch_lesson(&mut self, lesson: Lesson) {
        self.abort_in_flight();
        info!(from = %self.lesson.id, to = %lesson.id, "switching lesson");
        self.machine.reset(&lesson.id);
        self.queue.replace_current(lesson.clone());
        self.lesson = lesson;
    }

    fn abort_in_flight(&mut self) {
        if let Some(task) = self.in_flight.take() {
            debug!(token = task.token.0, "aborting in-flight evaluation");
            task.handle.abort();
        }
    }

    fn observe(&self) -> Observed {
        Observed {
            lesson_id: self.machine.lesson_id().to_string(),
            status: self.machine.status(),
            seconds: self.machine.countdown_secs(),
        }
    }

    fn publish_changes(&self, before: Observed) {
        let after = self.observe();
        if after == before {
            return;
        }

        let status_changed = after.status != before.status || after.lesson_id != before.lesson_id;
        if status_changed {
            self.emit(SessionEvent::StatusChanged {
                lesson_id: after.lesson_id.clone(),
                status: after.status,
            });
            if matches!(after.status, Status::Correct | Status::Incorrect) {
                if let Some(judgment) = self.machine.last_feedback() {
                    self.emit(SessionEvent::Feedback(judgment.clone()));
                }
            }
        }
        if after.status == Status::Counting && (status_changed || after.seconds != before.seconds) {
            self.emit(SessionEvent::Countdown {
                seconds: after.seconds,
                percent: self.machine.progress_percent(),
            });
        }
    }

    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Resolves when the in-flight evaluation finishes; pending forever when idle
async fn settle(in_flight: &mut Option<InFlight>) -> (SessionToken, Result<Judgment, OracleError>) {
    let Some(task) = in_flight else {
        return std::future::pending().await;
    };
    let result = match (&mut task.handle).await {
        Ok(result) => result,
        Err(e) => Err(OracleError::Transport(format!("evaluation task failed: {}", e))),
    };
    let token = task.token;
    *in_flight = None;
    (token, result)
}

/// Session clock; follows tokio's clock so paused-time tests advance it
fn now() -> std::time::Instant {
    time::Instant::now().into_std()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hand::{Frame, Hand};
    use crate::lesson::{alphabet_lessons, phrase_lessons};
    use crate::media::LatestFrame;
    use crate::oracle::{RawVerdict, GENERIC_FAILURE};
    use crate::progress::update_streak;
    use crate::session::NO_CAMERA_FEED;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::broadcast::error::RecvError;

    enum Reply {
        Verdict(RawVerdict),
        Fail,
        Hang,
    }

    struct ScriptedOracle {
        calls: AtomicUsize,
        delay: Duration,
        replies: Mutex<VecDeque<Reply>>,
    }

    impl ScriptedOracle {
        fn new(delay: Duration, replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                replies: Mutex::new(replies.into()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EvaluationOracle for ScriptedOracle {
        async fn evaluate(&self, request: &EvaluationRequest) -> Result<RawVerdict, OracleError> {
            assert!(!request.image.is_empty());
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies.lock().unwrap().pop_front();
            time::sleep(self.delay).await;
            match reply {
                Some(Reply::Verdict(v)) => Ok(v),
                Some(Reply::Fail) => Err(OracleError::Transport("connection refused".into())),
                Some(Reply::Hang) => std::future::pending().await,
                None => panic!("unexpected oracle call"),
            }
        }
    }

    #[derive(Default)]
    struct CountingTracker {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProgressTracker for CountingTracker {
        async fn record_success(&self, profile: &Profile) -> Result<Profile> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(update_streak(profile, Utc::now()))
        }
    }

    fn verdict(score: f64, is_correct: bool, feedback: &str) -> Reply {
        Reply::Verdict(RawVerdict {
            score: Some(score),
            is_correct: Some(is_correct),
            feedback: Some(feedback.into()),
        })
    }

    fn hand_frame() -> DetectionFrame {
        DetectionFrame::new(vec![Hand::default()], vec![Hand::default()], None)
    }

    struct Harness {
        handle: SessionHandle,
        events: broadcast::Receiver<SessionEvent>,
        frames: mpsc::Sender<DetectionFrame>,
        task: JoinHandle<Profile>,
        tracker: Arc<CountingTracker>,
        quota: DailyQuota,
    }

    fn start(lessons: Vec<Lesson>, oracle: Arc<ScriptedOracle>, with_frame: bool) -> Harness {
        let snapshots = LatestFrame::new();
        if with_frame {
            snapshots.publish(Arc::new(Frame::filled(32, 24, [200, 180, 160])));
        }
        let tracker = Arc::new(CountingTracker::default());
        let quota = DailyQuota::new(100);
        let collab = Collaborators {
            snapshots: Arc::new(snapshots),
            oracle,
            progress: tracker.clone(),
            quota: quota.clone(),
        };
        let settings = RunnerSettings::from_config(&Config::default());
        let (runner, handle) =
            SessionRunner::new(settings, LessonQueue::new(lessons), Profile::new("u1", "Ada"), collab).unwrap();
        let events = handle.subscribe();
        let (frames, frames_rx) = mpsc::channel(8);
        let task = tokio::spawn(runner.run(frames_rx));
        Harness {
            handle,
            events,
            frames,
            task,
            tracker,
            quota,
        }
    }

    async fn next_feedback(events: &mut broadcast::Receiver<SessionEvent>) -> Judgment {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Feedback(j)) => return j,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event stream closed"),
            }
        }
    }

    fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        loop {
            match events.try_recv() {
                Ok(e) => out.push(e),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return out,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_hand_verifies_once_and_completes() {
        let oracle = ScriptedOracle::new(Duration::from_millis(800), vec![verdict(92.0, true, "Great!")]);
        let mut h = start(vec![alphabet_lessons().remove(0)], oracle.clone(), true);
        h.frames.send(hand_frame()).await.unwrap();

        let judgment = next_feedback(&mut h.events).await;
        assert!(judgment.is_correct);
        assert_eq!(judgment.feedback, "Great!");

        let profile = h.task.await.unwrap();
        assert_eq!(oracle.calls(), 1);
        assert_eq!(h.quota.usage(), 1);
        assert_eq!(h.tracker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(profile.streak, 1);

        let events = drain(&mut h.events);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::LessonComplete { lesson_id, .. } if lesson_id == "alpha-A")));
        assert!(matches!(events.last(), Some(SessionEvent::QueueFinished)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_verification_before_threshold() {
        let oracle = ScriptedOracle::new(Duration::ZERO, vec![]);
        let h = start(alphabet_lessons(), oracle.clone(), true);
        h.frames.send(hand_frame()).await.unwrap();
        time::sleep(Duration::from_millis(4900)).await;
        h.handle.close().await.unwrap();
        h.task.await.unwrap();
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oracle_failure_shows_generic_message() {
        let oracle = ScriptedOracle::new(Duration::from_millis(100), vec![Reply::Fail]);
        let mut h = start(alphabet_lessons(), oracle.clone(), true);
        h.frames.send(hand_frame()).await.unwrap();
        time::sleep(Duration::from_millis(10)).await;
        h.handle.trigger().await.unwrap();

        let judgment = next_feedback(&mut h.events).await;
        assert!(!judgment.is_correct);
        assert_eq!(judgment.feedback, GENERIC_FAILURE);

        h.handle.close().await.unwrap();
        let profile = h.task.await.unwrap();
        assert_eq!(profile.streak, 0);
        assert_eq!(h.tracker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_incorrect() {
        let oracle = ScriptedOracle::new(Duration::ZERO, vec![Reply::Hang]);
        let mut h = start(alphabet_lessons(), oracle.clone(), true);
        h.frames.send(hand_frame()).await.unwrap();
        time::sleep(Duration::from_millis(10)).await;
        h.handle.trigger().await.unwrap();

        let judgment = next_feedback(&mut h.events).await;
        assert_eq!(judgment.feedback, GENERIC_FAILURE);
        h.handle.close().await.unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_frame_skips_oracle() {
        let oracle = ScriptedOracle::new(Duration::ZERO, vec![]);
        let mut h = start(alphabet_lessons(), oracle.clone(), false);
        h.frames.send(hand_frame()).await.unwrap();
        time::sleep(Duration::from_millis(10)).await;
        h.handle.trigger().await.unwrap();

        let judgment = next_feedback(&mut h.events).await;
        assert_eq!(judgment.feedback, NO_CAMERA_FEED);
        assert_eq!(oracle.calls(), 0);
        assert_eq!(h.quota.usage(), 0);
        h.handle.close().await.unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_discards_pending_response() {
        let oracle = ScriptedOracle::new(Duration::from_secs(2), vec![verdict(95.0, true, "stale")]);
        let mut h = start(alphabet_lessons(), oracle.clone(), true);
        h.frames.send(hand_frame()).await.unwrap();
        time::sleep(Duration::from_millis(10)).await;
        h.handle.trigger().await.unwrap();
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(oracle.calls(), 1);

        h.handle.switch_lesson(phrase_lessons().remove(0)).await.unwrap();
        time::sleep(Duration::from_secs(3)).await;
        h.handle.close().await.unwrap();
        let profile = h.task.await.unwrap();

        let events = drain(&mut h.events);
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::Feedback(_))));
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::StatusChanged { lesson_id, .. } if lesson_id == "p1"
        )));
        assert_eq!(profile.streak, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_advances_queue() {
        let oracle = ScriptedOracle::new(
            Duration::ZERO,
            vec![verdict(90.0, true, "A ok"), verdict(88.0, true, "B ok")],
        );
        let mut h = start(alphabet_lessons().into_iter().take(2).collect(), oracle.clone(), true);
        h.frames.send(hand_frame()).await.unwrap();
        time::sleep(Duration::from_millis(10)).await;
        h.handle.trigger().await.unwrap();
        assert_eq!(next_feedback(&mut h.events).await.feedback, "A ok");

        // the next lesson starts fresh and needs a detection to arm
        time::sleep(Duration::from_secs(6)).await;
        h.frames.send(hand_frame()).await.unwrap();
        time::sleep(Duration::from_millis(10)).await;
        h.handle.trigger().await.unwrap();
        assert_eq!(next_feedback(&mut h.events).await.feedback, "B ok");

        let profile = h.task.await.unwrap();
        assert_eq!(oracle.calls(), 2);
        // same day, counted once
        assert_eq!(profile.streak, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescan_during_success_still_completes() {
        let oracle = ScriptedOracle::new(
            Duration::ZERO,
            vec![verdict(90.0, true, "A ok"), verdict(20.0, false, "unused")],
        );
        let lessons: Vec<Lesson> = alphabet_lessons().into_iter().take(2).collect();
        let first_id = lessons[0].id.clone();
        let mut h = start(lessons, oracle.clone(), true);
        h.frames.send(hand_frame()).await.unwrap();
        time::sleep(Duration::from_millis(10)).await;
        h.handle.trigger().await.unwrap();
        assert_eq!(next_feedback(&mut h.events).await.feedback, "A ok");

        time::sleep(Duration::from_secs(1)).await;
        h.handle.trigger().await.unwrap();
        time::sleep(Duration::from_secs(6)).await;
        h.handle.close().await.unwrap();
        h.task.await.unwrap();

        assert_eq!(oracle.calls(), 1);
        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::LessonComplete { lesson_id, .. } if *lesson_id == first_id
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_rejected() {
        let collab = Collaborators {
            snapshots: Arc::new(LatestFrame::new()),
            oracle: ScriptedOracle::new(Duration::ZERO, vec![]),
            progress: Arc::new(CountingTracker::default()),
            quota: DailyQuota::new(1),
        };
        let settings = RunnerSettings::from_config(&Config::default());
        assert!(SessionRunner::new(settings, LessonQueue::default(), Profile::new("u", "n"), collab).is_err());
    }
}
