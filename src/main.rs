use std::path::PathBuf;

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adfotg::config::ConfigStore;
use adfotg::msd::{FileEntry, ImageInfo, MountController, MountReport, PackOptions};
use adfotg::otg::{create_mounter, FakeGadgetState};
use adfotg::AppError;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// adfotg command line arguments
#[derive(Parser, Debug)]
#[command(name = "adfotg")]
#[command(version, about = "Expose ADF images to a USB host through the mass storage gadget", long_about = None)]
struct CliArgs {
    /// Configuration file (default: first of ./adfotg.toml, ~/.config/adfotg.toml, /etc/adfotg/adfotg.toml)
    #[arg(short = 'c', long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show what the gadget exposes
    Status,
    /// List mount images
    Images,
    /// Mount an image
    Mount {
        /// Image name
        name: String,
    },
    /// Unmount the mounted image
    Unmount,
    /// List files inside an image
    List {
        /// Image name
        name: String,
    },
    /// Pack files into a new image
    Pack {
        /// Image name
        name: String,
        /// Files to copy into the image root, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Build in a temporary file and rename into place
        #[arg(long)]
        atomic: bool,
        /// Repack an existing image
        #[arg(long)]
        replace: bool,
    },
    /// Copy every file out of an image
    Unpack {
        /// Image name
        name: String,
        /// Destination directory
        destdir: PathBuf,
    },
    /// Copy one file out of an image
    Extract {
        /// Image name
        name: String,
        /// File name inside the image
        entry: String,
        /// Destination file
        dest: PathBuf,
    },
    /// Delete an image
    Delete {
        /// Image name
        name: String,
    },
    /// Pack files into a scratch image and mount it in place of the current one
    Quickmount {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    if let Err(err) = run(args).await {
        eprintln!("error: {:#}", err);
        std::process::exit(exit_code(&err));
    }
    Ok(())
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let config_store = ConfigStore::load(args.config.as_deref())?;
    let mut config = (*config_store.get()).clone();

    // Environment variable overrides the configured work directory
    if let Some(work_dir) = get_data_dir() {
        config.storage.work_dir = work_dir;
    }
    tracing::debug!("Work directory: {}", config.storage.work_dir.display());

    let fake_state = FakeGadgetState::new();
    let mounter = create_mounter(&config.gadget, &fake_state);
    let controller = MountController::from_config(&config, mounter);
    if let Err(e) = controller.init().await {
        tracing::warn!(
            "Failed to create mount images directory {}: {}",
            controller.mount_images_dir().display(),
            e
        );
    }

    let json = args.json;
    match args.command {
        Command::Status => {
            let report = controller.status().await?;
            output(json, &report, print_report)?;
        }
        Command::Images => {
            let images = controller.images().await?;
            output(json, &images, |images| print_images(images))?;
        }
        Command::Mount { name } => {
            controller.mount(&name).await?;
            done(json, format!("mounted {}", name))?;
        }
        Command::Unmount => {
            controller.unmount().await?;
            done(json, "unmounted".to_string())?;
        }
        Command::List { name } => {
            let listing = controller.list_image(&name).await?;
            output(json, &listing, |listing| print_listing(listing))?;
        }
        Command::Pack {
            name,
            files,
            atomic,
            replace,
        } => {
            let count = files.len();
            controller
                .pack(&name, files, PackOptions { replace, atomic })
                .await?;
            done(json, format!("packed {} file(s) into {}", count, name))?;
        }
        Command::Unpack { name, destdir } => {
            controller.unpack(&name, destdir.clone()).await?;
            done(json, format!("unpacked {} into {}", name, destdir.display()))?;
        }
        Command::Extract { name, entry, dest } => {
            controller.unpack_file(&name, &entry, dest.clone()).await?;
            done(json, format!("extracted {} to {}", entry, dest.display()))?;
        }
        Command::Delete { name } => {
            controller.delete(&name).await?;
            done(json, format!("deleted {}", name))?;
        }
        Command::Quickmount { files } => {
            let count = files.len();
            controller.quickmount(files).await?;
            done(json, format!("quick mounted {} file(s)", count))?;
        }
    }
    Ok(())
}

/// Exit code for a failed command: 2 for caller mistakes, 1 otherwise
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<AppError>() {
        Some(app_err) if app_err.is_client_error() => 2,
        _ => 1,
    }
}

fn output<T: Serialize + ?Sized>(json: bool, value: &T, human: impl FnOnce(&T)) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

#[derive(Serialize)]
struct Done {
    message: String,
}

fn done(json: bool, message: String) -> anyhow::Result<()> {
    output(json, &Done { message }, |done| println!("{}", done.message))
}

fn print_report(report: &MountReport) {
    println!("status: {}", report.status);
    if let Some(file) = &report.file {
        println!("file:   {}", file);
    }
    if let Some(error) = &report.error {
        println!("error:  {}", error);
    }
    if !report.listing.is_empty() {
        println!();
        print_listing(&report.listing);
    }
}

fn print_images(images: &[ImageInfo]) {
    for image in images {
        println!(
            "{:<32} {:>10}  {}",
            image.name,
            image.size,
            format_mtime(image.mtime)
        );
    }
}

fn print_listing(listing: &[FileEntry]) {
    for entry in listing {
        println!(
            "{:<32} {:>10}  {}",
            entry.name,
            entry.size,
            format_mtime(entry.mtime)
        );
    }
}

fn format_mtime(mtime: i64) -> String {
    match Local.timestamp_opt(mtime, 0).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M").to_string(),
        None => mtime.to_string(),
    }
}

/// Initialize logging with tracing
///
/// Logs go to stderr so `--json` output stays parseable.
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "adfotg=error",
        LogLevel::Warn => "adfotg=warn",
        LogLevel::Info => "adfotg=info",
        LogLevel::Verbose => "adfotg=debug",
        LogLevel::Debug => "adfotg=debug",
        LogLevel::Trace => "adfotg=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Work directory override from the environment
fn get_data_dir() -> Option<PathBuf> {
    std::env::var_os("ADFOTG_DATA_DIR").map(PathBuf::from)
}
