//! Daemon lifecycle: spawn the `run` mode detached, stop it over the socket,
//! report status from the pid file and the socket.

use std::fs;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{bail, Result};

use chatcentral_config::AppConfig;
use chatcentral_runtime::DaemonClient;

#[derive(Debug, Clone)]
pub(crate) struct DaemonPaths {
    pub(crate) runtime_dir: PathBuf,
    pub(crate) pid_file: PathBuf,
    pub(crate) log_file: PathBuf,
}

pub(crate) fn daemon_paths(config: &AppConfig) -> DaemonPaths {
    let runtime_dir = config.runtime_dir();
    DaemonPaths {
        pid_file: runtime_dir.join("daemon.pid"),
        log_file: runtime_dir.join("daemon.log"),
        runtime_dir,
    }
}

pub(crate) fn daemon_start(config_path: &Path, config: &AppConfig) -> Result<()> {
    let paths = daemon_paths(config);
    fs::create_dir_all(&paths.runtime_dir)?;
    let socket_path = PathBuf::from(&config.daemon.socket_path);

    if is_socket_live(&socket_path) {
        bail!(
            "daemon already running on socket {}; use `chat-central daemon restart`",
            socket_path.display()
        );
    }
    if let Some(pid) = read_pid(&paths.pid_file)? {
        if is_pid_running(pid) {
            bail!("daemon already running with pid {pid}");
        }
        let _ = fs::remove_file(&paths.pid_file);
    }
    if socket_path.exists() {
        let _ = fs::remove_file(&socket_path);
    }

    let exe = std::env::current_exe()?;
    let out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.log_file)?;
    let err = out.try_clone()?;

    let mut child = Command::new(exe)
        .arg("run")
        .arg("--config")
        .arg(config_path)
        .stdin(Stdio::null())
        .stdout(Stdio::from(out))
        .stderr(Stdio::from(err))
        .spawn()?;

    fs::write(&paths.pid_file, child.id().to_string())?;

    for _ in 0..40 {
        if is_socket_live(&socket_path) {
            println!("daemon started");
            println!("- pid: {}", child.id());
            println!("- socket: {}", socket_path.display());
            println!("- log: {}", paths.log_file.display());
            return Ok(());
        }

        if let Some(status) = child.try_wait()? {
            let _ = fs::remove_file(&paths.pid_file);
            bail!(
                "daemon exited during startup with status {status}; check {}",
                paths.log_file.display()
            );
        }

        std::thread::sleep(Duration::from_millis(100));
    }

    let _ = fs::remove_file(&paths.pid_file);
    bail!(
        "daemon did not become ready on socket {}; check {}",
        socket_path.display(),
        paths.log_file.display()
    )
}

pub(crate) async fn daemon_stop(config: &AppConfig) -> Result<()> {
    let paths = daemon_paths(config);
    let client = DaemonClient::new(&config.daemon.socket_path);

    if client.shutdown().await.is_ok() {
        println!("daemon stop requested gracefully");
    }

    let Some(pid) = read_pid(&paths.pid_file)? else {
        println!("daemon is not running");
        return Ok(());
    };

    if !is_pid_running(pid) {
        let _ = fs::remove_file(&paths.pid_file);
        println!("daemon was not running (stale pid file cleaned)");
        return Ok(());
    }

    wait_for_pid_exit(pid, Duration::from_secs(2));
    if is_pid_running(pid) {
        terminate_pid(pid)?;
        wait_for_pid_exit(pid, Duration::from_secs(4));
    }
    let _ = fs::remove_file(&paths.pid_file);
    println!("daemon stopped (pid {pid})");
    Ok(())
}

pub(crate) fn daemon_status(config: &AppConfig) -> Result<()> {
    let paths = daemon_paths(config);
    let socket_path = PathBuf::from(&config.daemon.socket_path);
    let socket_live = is_socket_live(&socket_path);

    let running = match read_pid(&paths.pid_file)? {
        Some(pid) if is_pid_running(pid) || socket_live => {
            println!("daemon status: running");
            println!("- pid: {pid}");
            true
        }
        _ => {
            println!("daemon status: stopped");
            false
        }
    };
    println!("- socket: {}{}", socket_path.display(), if socket_live { " (live)" } else { "" });
    println!("- log: {}", paths.log_file.display());
    if !running && socket_path.exists() {
        println!("- note: stale socket file present");
    }
    Ok(())
}

fn wait_for_pid_exit(pid: u32, timeout: Duration) {
    let step = Duration::from_millis(50);
    let mut waited = Duration::from_millis(0);
    while waited < timeout {
        if !is_pid_running(pid) {
            return;
        }
        std::thread::sleep(step);
        waited += step;
    }
}

pub(crate) fn is_socket_live(path: &Path) -> bool {
    std::os::unix::net::UnixStream::connect(path).is_ok()
}

pub(crate) fn read_pid(path: &Path) -> Result<Option<u32>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    Ok(raw.trim().parse::<u32>().ok())
}

pub(crate) fn is_pid_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

fn terminate_pid(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let status = Command::new("kill").arg(pid.to_string()).status()?;
        if !status.success() {
            bail!("failed to terminate pid {pid}");
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        bail!("terminating pid {pid} is unsupported on this platform")
    }
}
