use anyhow::Result;
use rollcall_core::{Config, CsvAttendanceLog};
use tracing_subscriber::EnvFilter;

mod dbus_interface;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load()?;
    tracing::info!(
        enrollment_dir = %config.enrollment_dir.display(),
        log = %config.log_path.display(),
        threshold = config.match_threshold,
        "configuration loaded"
    );

    let engine = engine::spawn_engine(&config)?;
    let service = dbus_interface::AttendanceService::new(engine, CsvAttendanceLog::new(&config.log_path));

    let builder = if config.system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let _conn = builder
        .name(dbus_interface::BUS_NAME)?
        .serve_at(dbus_interface::OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus = dbus_interface::BUS_NAME, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
