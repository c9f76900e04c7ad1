// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use clap::{Parser, Subcommand};
use config::Config;
use error::Error;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod error;
mod flasher;
mod image;


#[derive(Parser)]
#[command(version, about = "Boot-time UART update of the internal flash", long_about = None)]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an encrypted update image from a raw firmware binary
    Generate {
        /// Firmware binary, linked for the start of code flash
        firmware: PathBuf,
        /// Defaults to the firmware path with `.enc` appended
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Send an encrypted update image to a device in its boot window
    Flash {
        image: PathBuf,
        #[arg(short, long)]
        port: Option<String>,
        #[arg(short, long)]
        baud_rate: Option<u32>,
        /// Serial link defaults
        #[arg(short, long, default_value = "ota.toml")]
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<(), Error> {
    match command {
        Commands::Generate { firmware, output } => {
            let output = output.unwrap_or_else(|| image::default_output(&firmware));
            let encrypted = image::generate(&fs::read(&firmware)?)?;
            fs::write(&output, &encrypted)?;
            tracing::info!(
                "generated {} (crc32c {:#010x})",
                output.display(),
                image::fingerprint(&encrypted)
            );
        }
        Commands::Flash {
            image,
            port,
            baud_rate,
            config,
        } => {
            let settings = Config::load_or_default(&config)?.settings(port, baud_rate);
            let encrypted = fs::read(&image)?;
            tracing::info!(
                "flashing {} (crc32c {:#010x}) over {} at {} baud",
                image.display(),
                image::fingerprint(&encrypted),
                settings.port,
                settings.baud_rate
            );

            let mut link = serialport::new(&settings.port, settings.baud_rate)
                .timeout(settings.status_timeout)
                .open()?;
            link.clear(serialport::ClearBuffer::Input)?;

            let written = flasher::flash(&mut link, &encrypted)?;
            tracing::info!("done, {written} records written");
        }
    }
    Ok(())
}
