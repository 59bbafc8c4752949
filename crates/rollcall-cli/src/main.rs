use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rollcall_core::CourseId;
use rollcall_hw::{Camera, V4lDevice};
use rollcall_session::{
    spawn_session, Config, RosterClient, SessionNotice, SessionSnapshot, StopReason, WsConnector,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Resolution requested from the camera; frames are downsampled before sending.
const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall real-time attendance capture")]
struct Cli {
    /// API token (default: $ROLLCALL_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an attendance session until Ctrl-C
    Run {
        /// Course to take attendance for
        #[arg(short, long)]
        course: u64,
        /// Stop automatically after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
        /// Print the final summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices,
    /// List your courses
    Courses,
    /// Show the roster of a course
    Roster {
        #[arg(short, long)]
        course: u64,
    },
    /// Download the attendance report for one day
    Export {
        #[arg(short, long)]
        course: u64,
        /// Day to export, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Output file or directory (default: server-provided name in the current directory)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;
    let token = cli
        .token
        .or_else(|| std::env::var("ROLLCALL_TOKEN").ok())
        .filter(|t| !t.is_empty());

    match cli.command {
        Commands::Run {
            course,
            duration,
            json,
        } => {
            let token = require_token(token)?;
            run(config, token, CourseId(course), duration.map(Duration::from_secs), json).await?;
        }
        Commands::Devices => devices(),
        Commands::Courses => {
            let client = client(&config, token)?;
            let courses = client.list_courses().await?;
            if courses.is_empty() {
                println!("No courses");
            }
            for course in courses {
                println!(
                    "{:>5}  {:<10}  {}  ({} students)",
                    course.id.0, course.course_code, course.name, course.student_count
                );
            }
        }
        Commands::Roster { course } => {
            let client = client(&config, token)?;
            let roster = client.roster(CourseId(course)).await?;
            println!("{} enrolled", roster.len());
            for entry in roster {
                println!("{:>6}  {}", entry.student_id.0, entry.display_name);
            }
        }
        Commands::Export { course, date, out } => {
            let client = client(&config, token)?;
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let artifact = client.export_attendance(CourseId(course), date).await?;
            let path = match out {
                Some(dir) if dir.is_dir() => dir.join(&artifact.file_name),
                Some(path) => path,
                None => PathBuf::from(&artifact.file_name),
            };
            std::fs::write(&path, &artifact.bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote {} ({} bytes)", path.display(), artifact.bytes.len());
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn require_token(token: Option<String>) -> Result<String> {
    token.context("no API token: pass --token or set ROLLCALL_TOKEN")
}

fn client(config: &Config, token: Option<String>) -> Result<RosterClient> {
    Ok(RosterClient::new(
        &config.api_url,
        require_token(token)?,
        config.http_timeout(),
    )?)
}

fn devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for d in devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
}

async fn run(
    config: Config,
    token: String,
    course_id: CourseId,
    duration: Option<Duration>,
    json: bool,
) -> Result<()> {
    let roster = match RosterClient::new(&config.api_url, token.clone(), config.http_timeout()) {
        Ok(client) => match client.roster(course_id).await {
            Ok(roster) => Some(roster),
            Err(e) => {
                tracing::warn!(course = %course_id, error = %e, "roster unavailable; absent count disabled");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "could not build API client");
            None
        }
    };

    let device = V4lDevice {
        path: config.camera_device.clone(),
        width: CAPTURE_WIDTH,
        height: CAPTURE_HEIGHT,
    };
    let (handle, mut notices) = spawn_session(config, device, WsConnector::new());

    if let Some(roster) = roster {
        handle.load_roster(roster).await?;
    }
    handle
        .connect(course_id, token)
        .await
        .context("failed to open the attendance channel")?;
    handle
        .start(course_id)
        .await
        .context("failed to start the session")?;
    println!("Taking attendance for course {course_id}. Press Ctrl-C to stop.");

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut lost = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            _ = &mut deadline => break,
            notice = notices.recv() => match notice {
                Some(notice) => {
                    print_notice(&notice);
                    if let SessionNotice::SessionStopped { reason, .. } = notice {
                        lost = reason == StopReason::ConnectionLost;
                        break;
                    }
                }
                None => break,
            },
        }
    }

    handle.stop().await?;
    let snapshot = handle.snapshot().await?;
    handle.shutdown().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_summary(&snapshot);
    }

    if lost {
        bail!("session ended: connection to the recognition server was lost");
    }
    Ok(())
}

fn print_notice(notice: &SessionNotice) {
    match notice {
        SessionNotice::ChannelConnected { course_id } => println!("channel open for course {course_id}"),
        SessionNotice::Reconnecting { attempt, delay } => println!(
            "connection dropped; reconnect attempt {attempt} in {:.1}s",
            delay.as_secs_f32()
        ),
        SessionNotice::ChannelClosed => println!("channel closed"),
        SessionNotice::ServerReady => println!("recognition server ready"),
        SessionNotice::SessionStarted { .. } => {}
        SessionNotice::Recognized(record) => println!(
            "  present: {} (#{}) at {}",
            record.display_name,
            record.student_id,
            record.confirmed_at.with_timezone(&Local).format("%H:%M:%S")
        ),
        SessionNotice::ServerError(message) => eprintln!("server: {message}"),
        SessionNotice::Error(e) => eprintln!("error: {e}"),
        SessionNotice::SessionStopped { reason, present } => {
            println!("session stopped ({reason:?}); {present} present")
        }
    }
}

fn print_summary(snapshot: &SessionSnapshot) {
    println!();
    if let Some(started) = snapshot.started_at {
        println!("Started:  {}", started.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"));
    }
    println!("Frames:   {}", snapshot.frames_sent);
    println!("Present:  {}", snapshot.present.len());
    for record in &snapshot.present {
        println!("  {:>6}  {}", record.student_id.0, record.display_name);
    }
    if let Some(tally) = &snapshot.tally {
        println!("Absent:   {} of {}", tally.absent, tally.roster_size);
        for entry in &tally.absent_students {
            println!("  {:>6}  {}", entry.student_id.0, entry.display_name);
        }
    }
}
