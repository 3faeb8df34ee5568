use crate::engine::EngineHandle;
use chrono::NaiveDate;
use rollcall_core::{AttendanceLog, CsvAttendanceLog};
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    engine: EngineHandle,
    log: CsvAttendanceLog,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle, log: CsvAttendanceLog) -> Self {
        Self { engine, log }
    }
}

fn failed(e: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(failed)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "engine": status,
        })
        .to_string())
    }

    /// Rescan the enrollment directory; returns the number of identities.
    async fn reload_gallery(&self) -> zbus::fdo::Result<u32> {
        tracing::info!("reload_gallery requested");
        let count = self.engine.reload_gallery().await.map_err(failed)?;
        Ok(count as u32)
    }

    /// Attendance rows for `date` (YYYY-MM-DD, empty for today) as JSON.
    async fn attendance(&self, date: &str) -> zbus::fdo::Result<String> {
        let day = if date.is_empty() {
            chrono::Local::now().date_naive()
        } else {
            NaiveDate::parse_from_str(date, rollcall_core::attendance::DATE_FORMAT)
                .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("{date}: {e}")))?
        };
        let log = self.log.clone();
        let rows = tokio::task::spawn_blocking(move || log.entries_on(day))
            .await
            .map_err(failed)?
            .map_err(failed)?;
        serde_json::to_string(&rows).map_err(failed)
    }
}
