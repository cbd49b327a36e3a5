mod config;
mod error;
mod format;
mod log;

pub use config::LoggerConfig;
pub use error::LoggerError;
pub use format::LoggerFormat;

/// Install the global subscriber for `vmwrapd`. Output goes to stderr; the
/// job slot's stdout belongs to the host runtime.
pub fn logger_init(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    match cfg.format {
        LoggerFormat::Text => log::Logger::text(cfg)?,
        LoggerFormat::Json => log::Logger::json(cfg)?,
        LoggerFormat::Journald => log::Logger::journald(cfg)?,
    }
    tracing::debug!(target: "vmwrap.observe", format = ?cfg.format, level = %cfg.level, "logger installed");
    Ok(())
}
