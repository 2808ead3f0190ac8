//! The lifecycle driver (§4.10): reads the session configuration from
//! stdin, builds one [`Image`] per configured device, mounts the namespace
//! over FUSE, and tears everything down when the launcher closes its end
//! of stdin. Mirrors the role the root `proxmox-backup` binaries and
//! `proxmox-backup-client::mount::mount_do` play together for
//! proxmox-backup: parse input, daemonize via a fork/pipe handshake, report
//! status on the original stdout, then run until told to stop.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use anyhow::{Context, Result};
use nix::unistd::ForkResult;

use vmnetfs_client::Transport;
use vmnetfs_datastore::{EventLog, Image};
use vmnetfs_fuse::{Namespace, VmnetFs};
use vmnetfs_types::SessionConfig;

fn main() {
    if let Err(err) = run() {
        eprintln!("vmnetfs: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mountpoint = std::env::args()
        .nth(1)
        .context("usage: vmnetfs <mountpoint>")?;
    let mountpoint = PathBuf::from(mountpoint);

    let config = read_config(&mut std::io::stdin())?;
    let event_log = EventLog::new();
    let transport = Arc::new(Transport::new().context("failed to initialize transport")?);

    let mut images: HashMap<String, Arc<Image>> = HashMap::new();
    for image_config in &config.images {
        let image = Image::init(image_config, Arc::clone(&transport), Arc::clone(&event_log))
            .with_context(|| format!("failed to initialize image '{}'", image_config.name))?;
        images.insert(image_config.name.clone(), image);
    }

    let namespace = Namespace::build(config.censored_text(), images.clone(), Arc::clone(&event_log));
    let fs = VmnetFs::new(namespace);
    let mount_options = VmnetFs::mount_options();

    // Per §6 process control surface: a pipe from child to parent carries
    // the single readiness byte; the parent prints the status line and
    // exits while the child keeps running as the daemon.
    let (read_fd, write_fd) = nix::unistd::pipe().context("failed to create status pipe")?;

    match unsafe { nix::unistd::fork() }.context("failed to fork")? {
        ForkResult::Parent { .. } => {
            nix::unistd::close(write_fd).ok();
            let mut buf = [0u8; 1];
            let mut file = unsafe {
                use std::os::unix::io::FromRawFd;
                std::fs::File::from_raw_fd(read_fd)
            };
            let _ = file.read(&mut buf);
            println!("\n{}", mountpoint.display());
            Ok(())
        }
        ForkResult::Child => {
            nix::unistd::close(read_fd).ok();
            nix::unistd::setsid().context("setsid failed")?;
            ignore_sigint();
            init_logging();
            event_log.log(&format!("mounting at {}", mountpoint.display()));

            let mount_thread = {
                let mountpoint = mountpoint.clone();
                std::thread::spawn(move || {
                    if let Err(err) = fuser::mount2(fs, &mountpoint, &mount_options) {
                        log::error!("FUSE mount exited: {err}");
                    }
                })
            };

            redirect_std_streams_to_dev_null()?;

            let mut file = unsafe {
                use std::os::unix::io::FromRawFd;
                std::fs::File::from_raw_fd(write_fd)
            };
            let _ = file.write_all(&[0u8]);
            drop(file);

            wait_for_stdin_eof();

            event_log.log("launcher closed stdin, tearing down");
            for image in images.values() {
                image.close();
            }
            event_log.close();
            lazy_unmount(&mountpoint);

            let _ = mount_thread.join();
            Ok(())
        }
    }
}

/// Reads the `<length>\n<bytes>` framed configuration document (§6) and
/// parses it against the vmnetx-vmnetfs schema.
fn read_config(input: &mut dyn Read) -> Result<SessionConfig> {
    let mut length_line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        input.read_exact(&mut byte)?;
        if byte[0] == b'\n' {
            break;
        }
        length_line.push(byte[0]);
    }
    let length: usize = String::from_utf8_lossy(&length_line)
        .trim()
        .parse()
        .context("malformed configuration length prefix")?;

    let mut xml = vec![0u8; length];
    input.read_exact(&mut xml)?;
    let xml = String::from_utf8(xml).context("configuration is not valid UTF-8")?;
    SessionConfig::parse_xml(&xml).map_err(anyhow::Error::from)
}

fn init_logging() {
    if syslog::init(syslog::Facility::LOG_DAEMON, log::LevelFilter::Info, Some("vmnetfs")).is_err()
    {
        env_logger::init();
    }
}

/// SIGINT is ignored by design (§6): the launcher tears a session down by
/// closing its end of stdin, not by signaling the engine process.
fn ignore_sigint() {
    unsafe {
        let _ = nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGINT,
            nix::sys::signal::SigHandler::SigIgn,
        );
    }
}

fn redirect_std_streams_to_dev_null() -> Result<()> {
    let null = nix::fcntl::open(
        "/dev/null",
        nix::fcntl::OFlag::O_RDWR,
        nix::sys::stat::Mode::empty(),
    )
    .context("failed to open /dev/null")?;
    nix::unistd::dup2(null, 1).context("failed to redirect stdout")?;
    nix::unistd::dup2(null, 2).context("failed to redirect stderr")?;
    if null > 2 {
        nix::unistd::close(null).ok();
    }
    Ok(())
}

/// Blocks until the launcher closes its end of stdin, signaling session
/// teardown. Stdin itself carries no further data after the initial
/// configuration document.
fn wait_for_stdin_eof() {
    let mut buf = [0u8; 4096];
    loop {
        match std::io::stdin().read(&mut buf) {
            Ok(0) => return,
            Ok(_) => continue,
            Err(_) => return,
        }
    }
}

/// Detaches the mount without requiring the current process to hold
/// `CAP_SYS_ADMIN`, the same way the `fusermount` helper fuser itself
/// shells out to on a non-setuid kernel.
fn lazy_unmount(mountpoint: &std::path::Path) {
    for bin in ["fusermount3", "fusermount"] {
        let status = Command::new(bin).arg("-u").arg("-z").arg(mountpoint).status();
        if matches!(status, Ok(status) if status.success()) {
            return;
        }
    }
    log::warn!("failed to lazily unmount {}", mountpoint.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_config_parses_the_length_prefixed_document() {
        let xml = r#"<config><image name="disk"><origin><url>https://origin.example/disk.img</url></origin><size>1048576</size><cache><path>/var/cache/vmnetfs</path><chunk-size>131072</chunk-size></cache></image></config>"#;
        let framed = format!("{}\n{}", xml.len(), xml);
        let config = read_config(&mut Cursor::new(framed.into_bytes())).unwrap();
        assert_eq!(config.images.len(), 1);
        assert_eq!(config.images[0].name, "disk");
    }

    #[test]
    fn read_config_rejects_a_malformed_length_prefix() {
        let framed = b"not-a-number\n<image/>".to_vec();
        assert!(read_config(&mut Cursor::new(framed)).is_err());
    }

    #[test]
    fn read_config_rejects_a_short_body() {
        let framed = b"100\ntoo short".to_vec();
        assert!(read_config(&mut Cursor::new(framed)).is_err());
    }
}
