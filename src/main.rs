// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use ringlogd::config::Config;
use ringlogd::device::DeviceStore;
use ringlogd::logging::{self, LogSink, StderrSink, SyslogSink};
use ringlogd::store::{self, RingStore, SharedStore};
use ringlogd::supervisor::{self, Supervisor};
use ringlogd::signals;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Detach from the terminal and run in the background
    #[arg(short, long)]
    daemon: bool,

    /// Path to a JSON5 configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Back the log with a character device instead of process memory
    #[arg(long)]
    device: Option<PathBuf>,

    /// Maximum number of retained commands for the in-memory log
    #[arg(long)]
    capacity: Option<usize>,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("could not load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(capacity) = args.capacity {
        config.capacity = capacity;
    }
    if args.device.is_some() {
        config.device = args.device.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn build_store(config: &Config) -> Result<SharedStore> {
    match &config.device {
        Some(path) => {
            let device = DeviceStore::open(path)
                .with_context(|| format!("could not open log device {}", path.display()))?;
            Ok(store::shared(device))
        }
        None => Ok(store::shared(RingStore::new(config.capacity))),
    }
}

/// Detach from the controlling terminal. Must run before any thread is
/// spawned; fork does not carry other threads into the child.
///
/// The intermediate parent exits 0 once the listener is already bound, so
/// a launcher treats "bound and detached" as success and any earlier bind
/// failure as the nonzero exit it already saw.
fn daemonize() -> Result<()> {
    use std::os::fd::AsRawFd;

    use nix::unistd::{chdir, fork, setsid, ForkResult};

    match unsafe { fork() }.context("first fork failed")? {
        ForkResult::Parent { child } => {
            println!("Daemon PID: {child}");
            std::process::exit(0);
        }
        ForkResult::Child => {}
    }

    setsid().context("setsid failed")?;

    if let ForkResult::Parent { .. } = unsafe { fork() }.context("second fork failed")? {
        std::process::exit(0);
    }

    chdir("/").context("chdir to / failed")?;

    let devnull = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .context("could not open /dev/null")?;
    for fd in 0..=2 {
        if unsafe { libc::dup2(devnull.as_raw_fd(), fd) } < 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("could not redirect fd {fd}"));
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    signals::install_termination_handlers().context("could not install signal handlers")?;

    // Bind before detaching so a launcher sees bind failures as a nonzero
    // exit from the foreground process.
    let listener = supervisor::bind_listener(&config)?;

    if args.daemon {
        daemonize()?;
    }

    // Threads only from here on; the consumer thread would not survive the
    // forks above.
    let sink: Box<dyn LogSink> = if args.daemon {
        Box::new(SyslogSink::new("ringlogd"))
    } else {
        Box::new(StderrSink::new())
    };
    let (logger, consumer) = logging::init(sink, config.log_level);

    let store = build_store(&config)?;
    let supervisor = Supervisor::new(listener, &config, store, logger.clone());
    let outcome = supervisor.run();

    drop(logger);
    consumer.join();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_parsing() {
        let args = Args::parse_from(["ringlogd", "-p", "9001", "-d"]);
        assert_eq!(args.port, Some(9001));
        assert!(args.daemon);
        assert!(args.config.is_none());
        assert!(args.device.is_none());

        let args = Args::parse_from(["ringlogd", "--device", "/dev/logdev", "--capacity", "4"]);
        assert_eq!(args.device, Some(PathBuf::from("/dev/logdev")));
        assert_eq!(args.capacity, Some(4));
        assert!(!args.daemon);
    }

    #[test]
    fn test_cli_overrides_defaults() {
        let args = Args::parse_from(["ringlogd", "-p", "12345", "--capacity", "3"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.port, 12345);
        assert_eq!(config.capacity, 3);
        assert!(config.device.is_none());
    }

    #[test]
    fn test_cli_rejects_zero_capacity() {
        let args = Args::parse_from(["ringlogd", "--capacity", "0"]);
        assert!(load_config(&args).is_err());
    }
}
