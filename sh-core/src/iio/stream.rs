//! Kernel-facing descriptors of a hardware sensor
//!
//! An IIO device exposes buffered scans on its character device and
//! discrete events on a second descriptor obtained through an ioctl.
//! Both are non-blocking and multiplexed with `poll(2)`.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::path::Path;
use std::time::Duration;

use crate::constants::buffer::IIO_EVENT_RECORD_SIZE;
use crate::error::Result;

/// `_IOR('i', 0x90, int)`
const IIO_GET_EVENT_FD_IOCTL: u64 = 0x8004_6990;

/// One discrete device event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IioEvent {
    pub id: u64,
    pub timestamp: i64,
}

impl IioEvent {
    pub fn decode(bytes: &[u8; IIO_EVENT_RECORD_SIZE]) -> Self {
        let mut id = [0u8; 8];
        let mut ts = [0u8; 8];
        id.copy_from_slice(&bytes[0..8]);
        ts.copy_from_slice(&bytes[8..16]);
        Self {
            id: u64::from_ne_bytes(id),
            timestamp: i64::from_ne_bytes(ts),
        }
    }

    pub fn encode(&self) -> [u8; IIO_EVENT_RECORD_SIZE] {
        let mut out = [0u8; IIO_EVENT_RECORD_SIZE];
        out[0..8].copy_from_slice(&self.id.to_ne_bytes());
        out[8..16].copy_from_slice(&self.timestamp.to_ne_bytes());
        out
    }
}

/// Which descriptors are ready after a wait
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub scan: bool,
    pub event: bool,
}

/// Scan and event descriptors of one device
#[derive(Debug)]
pub struct IioStreams {
    scan: File,
    events: Option<File>,
}

impl IioStreams {
    /// Open `/dev/iio:deviceN` and, when the device has events, its event descriptor
    pub fn open(dev_node: &Path) -> Result<Self> {
        let scan = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(dev_node)?;

        let events = open_event_fd(&scan);
        Ok(Self { scan, events })
    }

    /// Build from already-open descriptors (pipes in tests, pre-opened devices)
    pub fn from_files(scan: File, events: Option<File>) -> Self {
        Self { scan, events }
    }

    pub fn has_events(&self) -> bool {
        self.events.is_some()
    }

    /// Block until a descriptor is readable or `timeout` elapses
    pub fn wait(&self, timeout: Duration) -> Result<Readiness> {
        let mut fds = [
            libc::pollfd {
                fd: self.scan.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: self.events.as_ref().map(|f| f.as_raw_fd()).unwrap_or(-1),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

        // SAFETY: fds is a valid array of two initialized pollfd structs that
        // outlives the call; negative fds are ignored by poll.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Readiness::default());
            }
            return Err(err.into());
        }

        Ok(Readiness {
            scan: fds[0].revents & libc::POLLIN != 0,
            event: fds[1].revents & libc::POLLIN != 0,
        })
    }

    /// Read whatever complete scan data is available; 0 when none
    pub fn read_scans(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.scan.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    pub fn read_event(&mut self) -> Result<Option<IioEvent>> {
        let Some(events) = self.events.as_mut() else {
            return Ok(None);
        };

        let mut record = [0u8; IIO_EVENT_RECORD_SIZE];
        match events.read_exact(&mut record) {
            Ok(()) => Ok(Some(IioEvent::decode(&record))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn open_event_fd(scan: &File) -> Option<File> {
    let mut event_fd: libc::c_int = -1;

    // SAFETY: the scan descriptor is open for the duration of the call and
    // event_fd is a valid out-pointer to an int as the ioctl expects.
    let rc = unsafe {
        libc::ioctl(
            scan.as_raw_fd(),
            IIO_GET_EVENT_FD_IOCTL as _,
            &mut event_fd as *mut libc::c_int,
        )
    };
    if rc < 0 || event_fd < 0 {
        return None;
    }

    // SAFETY: the kernel handed us a fresh descriptor that nothing else owns.
    Some(unsafe { File::from_raw_fd(event_fd) })
}

/// Non-blocking pipe pair, used for the outbound event stream and in tests
pub fn nonblocking_pipe() -> Result<(File, File)> {
    let mut fds = [0 as libc::c_int; 2];

    // SAFETY: fds is a valid two-element array for pipe2 to fill.
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error().into());
    }

    // SAFETY: both descriptors were just created and are exclusively owned here.
    let (read, write) = unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) };
    Ok((read, write))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_event_record_roundtrip() {
        let ev = IioEvent { id: 0xDEAD, timestamp: -5 };
        assert_eq!(IioEvent::decode(&ev.encode()), ev);
    }

    #[test]
    fn test_wait_times_out_on_idle_pipe() {
        let (scan_rx, _scan_tx) = nonblocking_pipe().unwrap();
        let streams = IioStreams::from_files(scan_rx, None);
        let ready = streams.wait(Duration::from_millis(10)).unwrap();
        assert_eq!(ready, Readiness::default());
    }

    #[test]
    fn test_scan_and_event_readiness() {
        let (scan_rx, mut scan_tx) = nonblocking_pipe().unwrap();
        let (ev_rx, mut ev_tx) = nonblocking_pipe().unwrap();
        let mut streams = IioStreams::from_files(scan_rx, Some(ev_rx));

        scan_tx.write_all(&[1, 2, 3, 4]).unwrap();
        ev_tx.write_all(&IioEvent { id: 1, timestamp: 99 }.encode()).unwrap();

        let ready = streams.wait(Duration::from_millis(100)).unwrap();
        assert!(ready.scan);
        assert!(ready.event);

        let mut buf = [0u8; 16];
        assert_eq!(streams.read_scans(&mut buf).unwrap(), 4);
        assert_eq!(streams.read_scans(&mut buf).unwrap(), 0);

        let ev = streams.read_event().unwrap().unwrap();
        assert_eq!(ev.timestamp, 99);
        assert!(streams.read_event().unwrap().is_none());
    }
}
