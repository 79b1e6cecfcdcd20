//! Núcleo do kernel: entry point lógico, handoff do bootloader, panic e
//! logging.

pub mod debug;
pub mod entry;
pub mod handoff;
pub mod panic;
