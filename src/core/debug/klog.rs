//! Sistema de logging do kernel.
//!
//! Formato de linha: `<timestamp> <level> <facility>: <mensagem>`,
//! com o timestamp em milissegundos desde o boot (zero antes do PIT
//! subir). Saída byte a byte pela serial (COM1).

use core::fmt;

/// Nível de log
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info ",
            LogLevel::Warn => "warn ",
            LogLevel::Error => "error",
        }
    }
}

/// Emite uma linha de log.
pub fn log(level: LogLevel, facility: &str, args: fmt::Arguments) {
    use fmt::Write;

    let ms = crate::drivers::pit::uptime_ms();
    let mut serial = crate::drivers::serial::SERIAL1.lock();

    // Falha de fmt na serial não tem para onde ser reportada.
    let _ = write!(serial, "{:08} {} {}: ", ms, level.as_str(), facility);
    let _ = serial.write_fmt(args);
    let _ = serial.write_str("\n");
}

// Macros de conveniência. Primeiro argumento é a facility, o resto é
// formatação normal.
#[macro_export]
macro_rules! kinfo {
    ($fac:expr, $($arg:tt)*) => {
        $crate::core::debug::klog::log(
            $crate::core::debug::klog::LogLevel::Info,
            $fac,
            format_args!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! kwarn {
    ($fac:expr, $($arg:tt)*) => {
        $crate::core::debug::klog::log(
            $crate::core::debug::klog::LogLevel::Warn,
            $fac,
            format_args!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! kerror {
    ($fac:expr, $($arg:tt)*) => {
        $crate::core::debug::klog::log(
            $crate::core::debug::klog::LogLevel::Error,
            $fac,
            format_args!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! kdebug {
    ($fac:expr, $($arg:tt)*) => {
        if cfg!(debug_assertions) {
            $crate::core::debug::klog::log(
                $crate::core::debug::klog::LogLevel::Debug,
                $fac,
                format_args!($($arg)*),
            )
        }
    };
}

#[macro_export]
macro_rules! ktrace {
    ($fac:expr, $($arg:tt)*) => {
        if cfg!(debug_assertions) {
            $crate::core::debug::klog::log(
                $crate::core::debug::klog::LogLevel::Trace,
                $fac,
                format_args!($($arg)*),
            )
        }
    };
}
