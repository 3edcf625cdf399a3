use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::oracle::{Judgment, OracleError, GENERIC_FAILURE};

/// Shown when there is no frame to snapshot
pub const NO_CAMERA_FEED: &str = "No camera feed detected";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Counting,
    Analyzing,
    Correct,
    Incorrect,
}

/// Identifies one analysis attempt. Bumped on every dispatch and every reset,
/// so a response carrying an old token is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionToken(pub u64);

/// Side effects requested by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Snapshot the current frame and call the oracle once
    Capture(SessionToken),
    /// Persist a success with the progress collaborator
    RecordProgress(SessionToken),
    /// Fire the lesson-complete callback
    Complete(SessionToken),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub verify: Duration,
    pub correct_delay: Duration,
    pub incorrect_delay: Duration,
    /// How long an incorrect verdict's feedback stays visible
    pub feedback_display: Duration,
    /// 0 = any hand loss resets the countdown immediately
    pub hand_loss_grace: Duration,
}

impl Timings {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            verify: config.verify_duration(),
            correct_delay: config.correct_delay(),
            incorrect_delay: config.incorrect_delay(),
            feedback_display: config.feedback_display(),
            hand_loss_grace: config.hand_loss_grace(),
        }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

/// Attempt lifecycle of one lesson view.
///
/// Pure state: time is passed in, effects come out as [`Command`]s.
#[derive(Debug, Clone)]
pub struct VerificationSession {
    lesson_id: String,
    timings: Timings,
    status: Status,
    hand_present: bool,
    elapsed: Duration,
    verify_duration: Duration,
    last_tick: Option<Instant>,
    hands_lost_at: Option<Instant>,
    result_deadline: Option<Instant>,
    feedback_deadline: Option<Instant>,
    last_feedback: Option<Judgment>,
    token: SessionToken,
}

impl VerificationSession {
    pub fn new(lesson_id: &str, timings: Timings) -> Self {
        Self {
            lesson_id: lesson_id.to_string(),
            timings,
            status: Status::Idle,
            hand_present: false,
            elapsed: Duration::ZERO,
            verify_duration: timings.verify,
            last_tick: None,
            hands_lost_at: None,
            result_deadline: None,
            feedback_deadline: None,
            last_feedback: None,
            token: SessionToken(0),
        }
    }

    pub fn lesson_id(&self) -> &str {
        &self.lesson_id
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn hand_present(&self) -> bool {
        self.hand_present
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn verify_duration(&self) -> Duration {
        self.verify_duration
    }

    /// Override the threshold until the next result
    pub fn set_verify_duration(&mut self, duration: Duration) {
        self.verify_duration = duration.max(Duration::from_millis(1));
    }

    pub fn last_feedback(&self) -> Option<&Judgment> {
        self.last_feedback.as_ref()
    }

    pub fn token(&self) -> SessionToken {
        self.token
    }

    /// Ring progress, 0–100
    pub fn progress_percent(&self) -> f32 {
        let pct = self.elapsed.as_secs_f32() / self.verify_duration.as_secs_f32() * 100.0;
        pct.min(100.0)
    }

    /// Whole seconds left on the countdown, never below 1
    pub fn countdown_secs(&self) -> u64 {
        let remaining = self.verify_duration.saturating_sub(self.elapsed).as_millis() as u64;
        remaining.div_ceil(1000).max(1)
    }

    /// Detection gate update
    pub fn on_hands(&mut self, present: bool, now: Instant) {
        self.hand_present = present;

        if present {
            self.hands_lost_at = None;
            if self.status == Status::Idle {
                self.start_counting(now);
            }
            return;
        }

        if self.status == Status::Counting {
            if self.timings.hand_loss_grace.is_zero() {
                self.stop_counting();
            } else {
                self.hands_lost_at.get_or_insert(now);
            }
        }
    }

    /// Periodic tick: advances the countdown and fires due result deadlines
    pub fn tick(&mut self, now: Instant) -> Vec<Command> {
        match self.status {
            Status::Counting => self.advance_countdown(now),
            Status::Correct | Status::Incorrect => self.settle_result(now),
            Status::Idle | Status::Analyzing => Vec::new(),
        }
    }

    /// Manual scan. Ignored without a hand, while an analysis is in flight,
    /// and while a correct result waits for its completion.
    pub fn trigger(&mut self, now: Instant) -> Vec<Command> {
        if !self.hand_present || matches!(self.status, Status::Analyzing | Status::Correct) {
            debug!(status = ?self.status, hand = self.hand_present, "manual trigger ignored");
            return Vec::new();
        }
        self.begin_analysis(now)
    }

    /// No frame was available for the snapshot; fails without an oracle call
    pub fn on_snapshot_missing(&mut self, token: SessionToken, now: Instant) -> Vec<Command> {
        self.on_judgment(token, Ok(Judgment::failure(NO_CAMERA_FEED)), now)
    }

    /// Oracle outcome. Stale tokens and responses outside `Analyzing` are dropped.
    pub fn on_judgment(
        &mut self,
        token: SessionToken,
        result: Result<Judgment, OracleError>,
        now: Instant,
    ) -> Vec<Command> {
        if token != self.token || self.status != Status::Analyzing {
            debug!(?token, current = ?self.token, status = ?self.status, "dropping stale judgment");
            return Vec::new();
        }

        let judgment = match result {
            Ok(j) => j,
            Err(e) => {
                info!(lesson = %self.lesson_id, "evaluation failed: {}", e);
                Judgment::failure(GENERIC_FAILURE)
            }
        };

        self.elapsed = Duration::ZERO;
        self.last_tick = None;
        self.verify_duration = self.timings.verify;

        let mut commands = Vec::new();
        if judgment.is_correct {
            self.status = Status::Correct;
            self.result_deadline = Some(now + self.timings.correct_delay);
            commands.push(Command::RecordProgress(self.token));
        } else {
            self.status = Status::Incorrect;
            self.result_deadline = Some(now + self.timings.incorrect_delay);
            self.feedback_deadline = Some(now + self.timings.feedback_display);
        }
        info!(lesson = %self.lesson_id, correct = judgment.is_correct, score = judgment.score, "judgment applied");
        self.last_feedback = Some(judgment);
        commands
    }

    /// Lesson switch or navigation away: back to `Idle`, everything pending discarded
    pub fn reset(&mut self, lesson_id: &str) {
        self.lesson_id = lesson_id.to_string();
        self.status = Status::Idle;
        self.elapsed = Duration::ZERO;
        self.verify_duration = self.timings.verify;
        self.last_tick = None;
        self.hands_lost_at = None;
        self.result_deadline = None;
        self.feedback_deadline = None;
        self.last_feedback = None;
        self.token = SessionToken(self.token.0 + 1);
    }

    fn start_counting(&mut self, now: Instant) {
        self.status = Status::Counting;
        self.elapsed = Duration::ZERO;
        self.last_tick = Some(now);
        self.hands_lost_at = None;
    }

    fn stop_counting(&mut self) {
        self.status = Status::Idle;
        self.elapsed = Duration::ZERO;
        self.last_tick = None;
        self.hands_lost_at = None;
    }

    fn advance_countdown(&mut self, now: Instant) -> Vec<Command> {
        if let Some(lost) = self.hands_lost_at {
            if now.saturating_duration_since(lost) >= self.timings.hand_loss_grace {
                self.stop_counting();
            } else {
                self.last_tick = Some(now);
            }
            return Vec::new();
        }

        let last = self.last_tick.unwrap_or(now);
        self.elapsed += now.saturating_duration_since(last);
        self.last_tick = Some(now);

        if self.elapsed >= self.verify_duration {
            return self.begin_analysis(now);
        }
        Vec::new()
    }

    fn settle_result(&mut self, now: Instant) -> Vec<Command> {
        if self.feedback_deadline.is_some_and(|d| now >= d) {
            self.feedback_deadline = None;
            self.last_feedback = None;
        }
        let Some(deadline) = self.result_deadline else {
            return Vec::new();
        };
        if now < deadline {
            return Vec::new();
        }

        let completed = self.status == Status::Correct;
        self.result_deadline = None;
        self.feedback_deadline = None;
        self.last_feedback = None;
        self.status = Status::Idle;

        if completed {
            return vec![Command::Complete(self.token)];
        }
        if self.hand_present {
            self.start_counting(now);
        }
        Vec::new()
    }

    fn begin_analysis(&mut self, _now: Instant) -> Vec<Command> {
        self.token = SessionToken(self.token.0 + 1);
        self.status = Status::Analyzing;
        self.last_tick = None;
        self.hands_lost_at = None;
        self.result_deadline = None;
        self.feedback_deadline = None;
        self.last_feedback = None;
        info!(lesson = %self.lesson_id, token = self.token.0, "analyzing");
        vec![Command::Capture(self.token)]
    }
}
