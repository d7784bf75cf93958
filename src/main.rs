use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use simplelog::{ColorChoice, TermLogger, TerminalMode};

use meidc::{outline, tui, Conf, Direction, Driver, ExtensionKind, MockDriver, Session};

#[derive(Parser)]
#[command(
    name = "meidc",
    version,
    about = "ME-iDS Intelligent Device Configuration"
)]
struct Cli {
    /// Settings file (TOML); defaults and environment apply otherwise.
    #[arg(long)]
    conf: Option<PathBuf>,

    /// Use the simulated driver backend.
    #[arg(long)]
    simulate: bool,

    /// Override the driver configuration file location.
    #[arg(long)]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Browse the configuration tree interactively (default).
    Browse,
    /// Reconcile the configuration with the current hardware and save it.
    Scan,
    /// Print the configuration tree.
    Show,
    /// Device entry operations.
    Device {
        #[command(subcommand)]
        op: DeviceOp,
    },
    /// ME-MUX32-M operations on an analog input subdevice.
    Mux {
        #[command(subcommand)]
        op: MuxOp,
    },
    /// ME-DEMUX32 operations on an analog output subdevice.
    Demux {
        #[command(subcommand)]
        op: DemuxOp,
    },
    /// Register devices of a remote host.
    Remote {
        host: String,
        /// Remote device number; all devices of the host when omitted.
        #[arg(long)]
        device: Option<u32>,
    },
    /// ME-1001 piggyback operations on a ME-1000.
    Me1001 {
        #[command(subcommand)]
        op: Me1001Op,
    },
}

#[derive(Subcommand)]
enum DeviceOp {
    /// Delete an unplugged or remote device entry.
    Delete { device: u32 },
    /// Move a device entry up.
    Up { device: u32 },
    /// Move a device entry down.
    Down { device: u32 },
}

#[derive(Subcommand)]
enum MuxOp {
    /// Register a ME-MUX32-M on an AI subdevice.
    Register {
        device: u32,
        subdevice: u32,
        /// AI channel the multiplexer feeds.
        #[arg(long, default_value_t = 0)]
        channel: u32,
        /// Borrowed digital I/O resource: device and subdevice number.
        #[arg(long, num_args = 2, value_names = ["DEVICE", "SUBDEVICE"])]
        dio: Vec<u32>,
        /// Operation mode "Streaming Input".
        #[arg(long)]
        timed: bool,
    },
    /// Change channel, DIO resource or timed mode.
    Edit {
        device: u32,
        subdevice: u32,
        #[arg(long, default_value_t = 0)]
        channel: u32,
        #[arg(long, num_args = 2, value_names = ["DEVICE", "SUBDEVICE"])]
        dio: Vec<u32>,
        #[arg(long)]
        timed: bool,
    },
    /// Delete the ME-MUX32-M.
    Remove { device: u32, subdevice: u32 },
    /// Append a ME-MUX32-S slave stage.
    AddSlave { device: u32, subdevice: u32 },
    /// Remove a ME-MUX32-S slave stage.
    RemoveSlave {
        device: u32,
        subdevice: u32,
        index: u32,
    },
}

#[derive(Subcommand)]
enum DemuxOp {
    /// Register a ME-DEMUX32 on an AO subdevice.
    Register {
        device: u32,
        subdevice: u32,
        #[arg(long, default_value_t = 0)]
        channel: u32,
        #[arg(long, num_args = 2, value_names = ["DEVICE", "SUBDEVICE"])]
        dio: Vec<u32>,
        #[arg(long)]
        timed: bool,
    },
    /// Change channel, DIO resource or timed mode.
    Edit {
        device: u32,
        subdevice: u32,
        #[arg(long, default_value_t = 0)]
        channel: u32,
        #[arg(long, num_args = 2, value_names = ["DEVICE", "SUBDEVICE"])]
        dio: Vec<u32>,
        #[arg(long)]
        timed: bool,
    },
    /// Delete the ME-DEMUX32.
    Remove { device: u32, subdevice: u32 },
}

#[derive(Subcommand)]
enum Me1001Op {
    /// Register a ME-1001 (clones the subdevice pair).
    Add { device: u32 },
    /// Delete the ME-1001 subdevice entries.
    Remove { device: u32 },
}

fn build_driver(simulate: bool) -> Result<Box<dyn Driver>> {
    if simulate {
        return Ok(Box::new(MockDriver::sample()));
    }
    #[cfg(feature = "medriver")]
    return Ok(Box::new(meidc::ffi::FfiDriver));
    #[cfg(not(feature = "medriver"))]
    bail!("built without the native ME driver backend; run with --simulate")
}

fn dio_pair(dio: &[u32]) -> Result<(u32, u32)> {
    match dio {
        [device, subdevice] => Ok((*device, *subdevice)),
        _ => bail!("--dio takes a device and a subdevice number"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let conf = Conf::load(cli.conf.as_deref()).context("loading settings")?;

    TermLogger::init(
        conf.runtime.log_level.to_filter(),
        simplelog::Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )?;

    let mut driver = build_driver(cli.simulate || conf.runtime.simulate)?;
    let config_path = cli.config_file.unwrap_or_else(|| conf.config_path());
    let (mut session, changed) = Session::startup(driver.as_mut(), config_path)?;
    if changed {
        info!("hardware setup was changed");
    }

    match cli.command.unwrap_or(Command::Browse) {
        Command::Browse => return tui::run(session, changed),
        Command::Scan => session.save()?,
        Command::Show => {
            for row in outline::outline(session.document()) {
                if row.value.is_empty() {
                    println!("{}{}", "  ".repeat(row.depth), row.label);
                } else {
                    println!("{}{}: {}", "  ".repeat(row.depth), row.label, row.value);
                }
            }
            return Ok(());
        }
        Command::Device { op } => {
            match op {
                DeviceOp::Delete { device } => session.delete_device(device)?,
                DeviceOp::Up { device } => session.move_device(device, Direction::Up)?,
                DeviceOp::Down { device } => session.move_device(device, Direction::Down)?,
            }
            session.save()?;
        }
        Command::Mux { op } => {
            match op {
                MuxOp::Register {
                    device,
                    subdevice,
                    channel,
                    dio,
                    timed,
                } => session.register_extension(
                    (device, subdevice),
                    ExtensionKind::Mux32m,
                    channel,
                    dio_pair(&dio)?,
                    timed,
                )?,
                MuxOp::Edit {
                    device,
                    subdevice,
                    channel,
                    dio,
                    timed,
                } => session.edit_extension((device, subdevice), channel, dio_pair(&dio)?, timed)?,
                MuxOp::Remove { device, subdevice } => {
                    session.remove_extension((device, subdevice))?
                }
                MuxOp::AddSlave { device, subdevice } => {
                    session.add_mux_slave((device, subdevice))?
                }
                MuxOp::RemoveSlave {
                    device,
                    subdevice,
                    index,
                } => session.remove_mux_slave((device, subdevice), index)?,
            }
            session.save()?;
        }
        Command::Demux { op } => {
            match op {
                DemuxOp::Register {
                    device,
                    subdevice,
                    channel,
                    dio,
                    timed,
                } => session.register_extension(
                    (device, subdevice),
                    ExtensionKind::Demux32,
                    channel,
                    dio_pair(&dio)?,
                    timed,
                )?,
                DemuxOp::Edit {
                    device,
                    subdevice,
                    channel,
                    dio,
                    timed,
                } => session.edit_extension((device, subdevice), channel, dio_pair(&dio)?, timed)?,
                DemuxOp::Remove { device, subdevice } => {
                    session.remove_extension((device, subdevice))?
                }
            }
            session.save()?;
        }
        Command::Remote { host, device } => {
            let appended = session.add_remote_devices(driver.as_mut(), &host, device)?;
            info!("registered {appended} device(s) of host {host}");
            session.save()?;
        }
        Command::Me1001 { op } => {
            match op {
                Me1001Op::Add { device } => session.add_me1001(device)?,
                Me1001Op::Remove { device } => session.remove_me1001(device)?,
            }
            session.save()?;
        }
    }

    Ok(())
}
