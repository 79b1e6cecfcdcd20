//! Definições de sistema compartilhadas entre subsistemas.

pub mod types;

pub use types::{Gid, Pid, Uid, INIT_PID};
