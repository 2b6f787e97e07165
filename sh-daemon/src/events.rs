//! Hub pipe reader
//!
//! Drains the outbound event pipe on a dedicated thread, decodes the
//! fixed-size records and fans them out to subscribed connections.
//! Records can optionally be mirrored verbatim to a FIFO.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sh_protocol::{SensorEvent, EVENT_RECORD_SIZE};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Records buffered per subscriber before it starts lagging
pub const BROADCAST_CAPACITY: usize = 1024;

/// How often the reader re-checks the stop flag while idle
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Records read from the pipe per wakeup
const READ_BATCH: usize = 64;

/// Accumulates raw pipe bytes into whole records
#[derive(Debug, Default)]
pub struct RecordAssembler {
    pending: Vec<u8>,
}

impl RecordAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every complete record now available
    pub fn push(&mut self, bytes: &[u8]) -> Vec<[u8; EVENT_RECORD_SIZE]> {
        self.pending.extend_from_slice(bytes);
        let whole = self.pending.len() / EVENT_RECORD_SIZE;

        let mut out = Vec::with_capacity(whole);
        for chunk in self.pending.chunks_exact(EVENT_RECORD_SIZE) {
            let mut record = [0u8; EVENT_RECORD_SIZE];
            record.copy_from_slice(chunk);
            out.push(record);
        }
        self.pending.drain(..whole * EVENT_RECORD_SIZE);
        out
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Open an existing FIFO for mirroring without blocking on a missing reader
pub fn open_mirror(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

/// Wait up to `timeout` for `file` to become readable
fn wait_readable(file: &File, timeout: Duration) -> io::Result<bool> {
    let mut fds = [libc::pollfd {
        fd: file.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    }];
    let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

    // SAFETY: fds holds one initialized pollfd for a descriptor we own.
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), 1, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(fds[0].revents & (libc::POLLIN | libc::POLLHUP) != 0)
}

/// Spawn the reader thread
///
/// The thread exits once `stop` is set or the write end of the pipe closes.
pub fn spawn_reader(
    mut pipe: File,
    tx: broadcast::Sender<SensorEvent>,
    mut mirror: Option<File>,
    stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("sh-events".to_string())
        .spawn(move || {
            let mut assembler = RecordAssembler::new();
            let mut buf = vec![0u8; EVENT_RECORD_SIZE * READ_BATCH];
            let mut forwarded: u64 = 0;

            while !stop.load(Ordering::Acquire) {
                match wait_readable(&pipe, POLL_INTERVAL) {
                    Ok(false) => continue,
                    Ok(true) => {}
                    Err(e) => {
                        error!(error = %e, "Event pipe poll failed");
                        break;
                    }
                }

                let n = match pipe.read(&mut buf) {
                    Ok(0) => {
                        info!("Event pipe closed");
                        break;
                    }
                    Ok(n) => n,
                    Err(e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::Interrupted =>
                    {
                        continue
                    }
                    Err(e) => {
                        error!(error = %e, "Event pipe read failed");
                        break;
                    }
                };

                for record in assembler.push(&buf[..n]) {
                    if let Some(fifo) = mirror.as_mut() {
                        if let Err(e) = fifo.write_all(&record) {
                            if e.kind() != io::ErrorKind::WouldBlock {
                                warn!(error = %e, "Disabling event mirror");
                                mirror = None;
                            }
                        }
                    }

                    match SensorEvent::decode(&record) {
                        Ok(event) => {
                            forwarded += 1;
                            // No receivers is fine: nobody has subscribed yet
                            let _ = tx.send(event);
                        }
                        Err(e) => warn!(error = %e, "Dropping malformed event record"),
                    }
                }
            }

            debug!(forwarded, "Event reader exiting");
        })
}
