use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_core::attendance::DATE_FORMAT;
use rollcall_core::{AttendanceLog, Config, CsvAttendanceLog, GalleryStore, MatchResult, OnnxExtractor};
use std::path::PathBuf;

const BUS_NAME: &str = "org.rollcall.Attendance1";
const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a face image to the enrollment directory
    Enroll {
        /// Person's name (stored lower-case, spaces as underscores)
        #[arg(short, long)]
        name: String,
        /// Image file containing exactly one face
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Print attendance rows
    Log {
        /// Only rows for this day (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Load the gallery and list enrolled identities
    Gallery,
    /// Run one still image through the pipeline
    Process {
        /// Input image
        input: PathBuf,
        /// Where to write the annotated frame
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
    /// Show daemon status
    Status,
    /// Ask the daemon to rescan the enrollment directory
    Reload,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Enroll { name, image } => {
            let bytes = std::fs::read(&image).with_context(|| format!("reading {}", image.display()))?;
            let path = rollcall_core::enroll::enroll_image(&config.enrollment_dir, &name, &bytes)?;
            println!("Enrolled {} -> {}", rollcall_core::enroll::normalize_name(&name), path.display());
            println!("Run `rollcall reload` to pick it up in a running daemon.");
        }
        Commands::Log { date } => {
            let log = CsvAttendanceLog::new(&config.log_path);
            let rows = match date {
                Some(date) => {
                    let day = NaiveDate::parse_from_str(&date, DATE_FORMAT)
                        .with_context(|| format!("invalid date {date:?}, expected YYYY-MM-DD"))?;
                    log.entries_on(day)?
                }
                None => log.entries()?,
            };
            if rows.is_empty() {
                println!("No attendance recorded");
            }
            for row in rows {
                println!("{:<24} {} {}", row.name, row.date, row.time);
            }
        }
        Commands::Gallery => {
            let mut extractor =
                OnnxExtractor::load(&config.detector_model_path(), &config.recognizer_model_path())?;
            let gallery = GalleryStore::new(&config.enrollment_dir).load(&mut extractor)?;
            println!("{} identities in {}", gallery.len(), config.enrollment_dir.display());
            for identity in gallery.identities() {
                println!("  {:<24} {}", identity.name, identity.source.display());
            }
            for skipped in gallery.skipped() {
                println!("  skipped {}: {}", skipped.path.display(), skipped.reason);
            }
        }
        Commands::Process { input, output } => {
            let frame = image::open(&input)
                .with_context(|| format!("opening {}", input.display()))?
                .to_rgb8();
            let mut pipeline = rollcall_core::build_pipeline(&config)?;
            let outcome = pipeline.process_frame(frame);

            println!("{} face(s)", outcome.faces.len());
            for report in &outcome.faces {
                let (top, right, bottom, left) = report.face.trbl();
                match &report.result {
                    MatchResult::Matched { name, distance, .. } => {
                        println!("  {name:<24} distance {distance:.3} at ({top}, {right}, {bottom}, {left})")
                    }
                    MatchResult::Unknown => println!("  {:<24} at ({top}, {right}, {bottom}, {left})", "Unknown"),
                }
            }
            for event in &outcome.events {
                println!("Recorded {} {} {}", event.name, event.date, event.time);
            }
            for error in &outcome.log_errors {
                eprintln!("Attendance not recorded: {error}");
            }
            if let Some(output) = output {
                outcome.frame.save(&output).with_context(|| format!("writing {}", output.display()))?;
                println!("Annotated frame written to {}", output.display());
            }
        }
        Commands::Devices => {
            let devices = rollcall_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for device in devices {
                let marker = if device.path == config.camera_device { "*" } else { " " };
                println!("{marker} {:<14} {} ({}, {})", device.path, device.name, device.driver, device.bus);
            }
        }
        Commands::Status => {
            let proxy = daemon_proxy(config.system_bus).await?;
            let status: String = proxy.call("Status", &()).await.context("rollcalld not reachable")?;
            let value: serde_json::Value = serde_json::from_str(&status)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Reload => {
            let proxy = daemon_proxy(config.system_bus).await?;
            let count: u32 = proxy.call("ReloadGallery", &()).await.context("rollcalld not reachable")?;
            println!("Gallery reloaded: {count} identities");
        }
    }

    Ok(())
}

async fn daemon_proxy(system_bus: bool) -> Result<zbus::Proxy<'static>> {
    let conn = if system_bus {
        zbus::Connection::system().await?
    } else {
        zbus::Connection::session().await?
    };
    Ok(zbus::Proxy::new(&conn, BUS_NAME, OBJECT_PATH, BUS_NAME).await?)
}
