// Two-wheel robot runtime: command protocol, flag scheduler, motion control
// and obstacle avoidance over a pluggable hardware layer.

pub mod battery;
pub mod config;
pub mod dispatcher;
pub mod filter;
pub mod flags;
pub mod hal;
pub mod messages;
pub mod motor;
pub mod obstacle;
pub mod protocol;
pub mod runtime;
pub mod scheduler;
pub mod serial;
pub mod sim;
pub mod time;
