// Nochistlán Marketplace - community listings for items, jobs and rentals
// Copyright (C) 2025 Marketplace Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Logging for the marketplace core
//!
//! Console output goes to stderr so stdout stays free for the UI host; the file
//! layer writes JSON lines to a daily rolling log in the data directory.

use anyhow::Result;
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Logger configuration
pub struct LoggerConfig {
    /// Log directory path
    pub log_dir: PathBuf,
    /// Log file prefix
    pub file_prefix: String,
    /// Maximum log level
    pub level: Level,
    /// Whether to log to console
    pub console_output: bool,
    /// Whether to log to file
    pub file_output: bool,
    /// Log rotation strategy
    pub rotation: Rotation,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::for_dir(crate::config::default_data_dir().join("logs"))
    }
}

impl LoggerConfig {
    /// Default settings writing into `log_dir`
    pub fn for_dir(log_dir: PathBuf) -> Self {
        Self {
            log_dir,
            file_prefix: "marketplace".to_string(),
            level: Level::INFO,
            console_output: true,
            file_output: true,
            rotation: Rotation::DAILY,
        }
    }

    /// Filter used when `RUST_LOG` is not set
    fn default_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::new(format!("marketplace_core={}", self.level));
        for target in ["api", "ipc", "session"] {
            if let Ok(directive) = format!("{}={}", target, self.level).parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    }
}

/// Main logger struct
pub struct Logger;

impl Logger {
    /// Initialize the logging system with default configuration
    pub fn init() -> Result<()> {
        Self::init_with_config(LoggerConfig::default())
    }

    /// Initialize the logging system with custom configuration
    pub fn init_with_config(config: LoggerConfig) -> Result<()> {
        if config.file_output {
            std::fs::create_dir_all(&config.log_dir)?;
        }

        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| config.default_filter());

        let subscriber = tracing_subscriber::registry().with(env_filter);

        let file_layer = config.file_output.then(|| {
            let file_appender =
                RollingFileAppender::new(config.rotation.clone(), &config.log_dir, &config.file_prefix);
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .json()
        });

        let console_layer = config.console_output.then(|| {
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .with_span_events(FmtSpan::CLOSE)
        });

        subscriber.with(file_layer).with(console_layer).try_init()?;

        Ok(())
    }
}

/// Macro for logging backend calls: `start` before sending, `done` with the
/// HTTP status and elapsed milliseconds once the response headers arrive
#[macro_export]
macro_rules! log_api_call {
    (start, $method:expr, $url:expr) => {
        tracing::debug!(target: "api", method = $method, url = $url, "Backend call started")
    };
    (done, $method:expr, $url:expr, $status:expr, $started:expr) => {
        tracing::info!(
            target: "api",
            method = $method,
            url = $url,
            status = $status,
            duration_ms = $started.elapsed().as_millis() as u64,
            "Backend call completed"
        )
    };
}

/// Macro for logging IPC messages
#[macro_export]
macro_rules! log_ipc {
    (request, $method:expr, $id:expr) => {
        tracing::debug!(
            target: "ipc",
            direction = "request",
            method = $method,
            id = $id,
            "IPC request received"
        )
    };
    (response, $method:expr, $id:expr, $success:expr) => {
        tracing::debug!(
            target: "ipc",
            direction = "response",
            method = $method,
            id = $id,
            success = $success,
            "IPC response sent"
        )
    };
    (event, $event:expr) => {
        tracing::debug!(
            target: "ipc",
            direction = "event",
            event = $event,
            "IPC event sent"
        )
    };
}

/// Macro for logging session transitions
#[macro_export]
macro_rules! log_session {
    (signed_in, $user_id:expr) => {
        tracing::info!(
            target: "session",
            event = "signed_in",
            user_id = $user_id,
            "Session started"
        )
    };
    (signed_out) => {
        tracing::info!(
            target: "session",
            event = "signed_out",
            "Session ended"
        )
    };
    (updated, $user_id:expr) => {
        tracing::debug!(
            target: "session",
            event = "user_updated",
            user_id = $user_id,
            "Session user refreshed"
        )
    };
}
