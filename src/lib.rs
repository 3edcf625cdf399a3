pub mod coach;
pub mod config;
pub mod gate;
pub mod hand;
pub mod lesson;
pub mod media;
pub mod oracle;
pub mod progress;
pub mod projection;
pub mod quota;
pub mod render;
pub mod replay;
pub mod session;
