//! Texto para el usuario: resultados de comandos, avisos de sesión y errores.

pub mod messages;

pub use messages::{describe_notice, describe_outcome, format_duration, progress_bar};
