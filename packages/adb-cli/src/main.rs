//! Command-line front-end over the `adb-client` library: list devices, run
//! shell commands, and push/pull files against a running adb server.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use adb_client::{DeviceDescriptor, Host, MTIME_OF_CLOSE};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "adb-cli", about = "A client for the adb host/device protocol")]
struct Cli {
    /// adb server host.
    #[arg(long, global = true)]
    host: Option<String>,

    /// adb server port.
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Target device serial. Required for device-scoped commands when more
    /// than one device is attached.
    #[arg(short = 's', long = "serial", global = true)]
    serial: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached devices.
    Devices {
        /// Show product/model/device/usb attributes.
        #[arg(short = 'l', long)]
        long: bool,
        /// Keep watching and print state transitions as they happen.
        #[arg(short = 'w', long)]
        watch: bool,
    },
    /// Run a shell command on the device.
    Shell {
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Copy a file from the device to the local host (`-` for stdout).
    Pull {
        remote: String,
        local: Option<PathBuf>,
        #[arg(short = 'p', long)]
        progress: bool,
    },
    /// Copy a file from the local host (`-` for stdin) to the device.
    Push {
        local: PathBuf,
        remote: String,
        #[arg(short = 'p', long)]
        progress: bool,
    },
    /// Print the adb server's protocol version.
    Version,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let host = build_host(&cli);

    match &cli.command {
        Commands::Devices { long, watch } => cmd_devices(&host, *long, *watch),
        Commands::Shell { command } => cmd_shell(&host, &cli.serial, command),
        Commands::Pull {
            remote,
            local,
            progress,
        } => cmd_pull(&host, &cli.serial, remote, local.as_deref(), *progress),
        Commands::Push {
            local,
            remote,
            progress,
        } => cmd_push(&host, &cli.serial, local, remote, *progress),
        Commands::Version => cmd_version(&host),
    }
}

fn build_host(cli: &Cli) -> Host {
    match (&cli.host, cli.port) {
        (None, None) => Host::from_env(),
        (host, port) => Host::new(
            host.clone().unwrap_or_else(|| "localhost".to_string()),
            port.unwrap_or(adb_client::DEFAULT_PORT),
            "adb",
        ),
    }
}

fn descriptor_for(serial: &Option<String>) -> DeviceDescriptor {
    match serial {
        Some(s) => DeviceDescriptor::Serial(s.clone()),
        None => DeviceDescriptor::Any,
    }
}

fn cmd_version(host: &Host) -> Result<()> {
    let version = host.host_client().server_version()?;
    println!("Android Debug Bridge version 1.0.{version}");
    Ok(())
}

fn cmd_devices(host: &Host, long: bool, watch: bool) -> Result<()> {
    if watch {
        info!("watching for device state changes");
        let watcher = host.watch();
        loop {
            match watcher.recv() {
                Some(event) => {
                    println!("{}\t{} -> {}", event.serial, event.old_state, event.new_state);
                }
                None => {
                    if let Some(msg) = watcher.err_message() {
                        bail!("device watcher stopped: {msg}");
                    }
                    break;
                }
            }
        }
        return Ok(());
    }

    if long {
        let devices = host.host_client().list_devices()?;
        for d in devices {
            print!("{}\tdevice", d.serial);
            if let Some(p) = &d.product {
                print!(" product:{p}");
            }
            if let Some(m) = &d.model {
                print!(" model:{m}");
            }
            if let Some(dev) = &d.device {
                print!(" device:{dev}");
            }
            if let Some(usb) = &d.usb {
                print!(" usb:{usb}");
            }
            println!();
        }
    } else {
        for serial in host.host_client().list_device_serials()? {
            println!("{serial}\tdevice");
        }
    }
    Ok(())
}

fn cmd_shell(host: &Host, serial: &Option<String>, command: &[String]) -> Result<()> {
    let device = host.device(descriptor_for(serial));
    let args: Vec<&str> = command[1..].iter().map(String::as_str).collect();
    let output = device.run_command(&command[0], &args)?;
    io::stdout().write_all(&output)?;
    Ok(())
}

fn cmd_pull(
    host: &Host,
    serial: &Option<String>,
    remote: &str,
    local: Option<&std::path::Path>,
    progress: bool,
) -> Result<()> {
    let device = host.device(descriptor_for(serial));
    let total = device.stat(remote).ok().map(|e| e.size);
    let mut reader = device.open_read(remote)?;

    let mut out: Box<dyn Write> = match local {
        Some(p) if p != std::path::Path::new("-") => {
            Box::new(fs::File::create(p).with_context(|| format!("creating {}", p.display()))?)
        }
        _ => Box::new(io::stdout()),
    };

    copy_with_progress(&mut reader, &mut out, total, progress)?;
    Ok(())
}

fn cmd_push(
    host: &Host,
    serial: &Option<String>,
    local: &std::path::Path,
    remote: &str,
    progress: bool,
) -> Result<()> {
    let device = host.device(descriptor_for(serial));

    let (mode, mtime, total, mut input): (u32, Option<i64>, Option<u32>, Box<dyn Read>) =
        if local == std::path::Path::new("-") {
            (0o644, MTIME_OF_CLOSE, None, Box::new(io::stdin()))
        } else {
            let meta = fs::metadata(local).with_context(|| format!("stat {}", local.display()))?;
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64);
            #[cfg(unix)]
            let mode = std::os::unix::fs::PermissionsExt::mode(&meta.permissions());
            #[cfg(not(unix))]
            let mode = 0o644u32;
            let file =
                fs::File::open(local).with_context(|| format!("opening {}", local.display()))?;
            (mode, mtime, Some(meta.len() as u32), Box::new(file))
        };

    let mut writer = device.open_write(remote, mode, mtime)?;
    copy_with_progress(&mut input, &mut writer, total, progress)?;
    writer.close()?;
    Ok(())
}

fn copy_with_progress(
    input: &mut dyn Read,
    output: &mut dyn Write,
    total: Option<u32>,
    progress: bool,
) -> Result<()> {
    let mut buf = [0u8; 32 * 1024];
    let mut copied: u64 = 0;
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        if let Err(e) = output.write_all(&buf[..n]) {
            // The remote side closed the stream; stop copying and let the
            // caller's close/finish step surface the server's real error.
            if e.kind() == io::ErrorKind::BrokenPipe {
                break;
            }
            return Err(e.into());
        }
        copied += n as u64;
        if progress {
            match total {
                Some(t) if t > 0 => {
                    eprint!("\r{copied}/{t} bytes ({:.0}%)", copied as f64 / t as f64 * 100.0);
                }
                _ => eprint!("\r{copied} bytes"),
            }
            io::stderr().flush().ok();
        }
    }
    if progress {
        eprintln!();
    }
    Ok(())
}
