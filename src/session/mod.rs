pub mod machine;
pub mod runner;

pub use machine::{Command, SessionToken, Status, Timings, VerificationSession, NO_CAMERA_FEED};
pub use runner::{Collaborators, Control, RunnerSettings, SessionEvent, SessionHandle, SessionRunner};
