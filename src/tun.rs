//! TUN device I/O. The fd is handed in by the host platform — this crate
//! never opens `/dev/net/tun` itself. Reads and writes go through
//! `tokio::io::unix::AsyncFd` over raw `libc::read`/`libc::write` calls,
//! the same "wrap a raw fd, poll it with tokio" shape the teacher uses for
//! the WebSocket's underlying `TcpStream` (via `AsyncFd` internally in
//! tokio's own net types) rather than pulling in a TUN-opening crate for a
//! device this crate is handed, not responsible for creating.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::error;

struct RawFdHandle(RawFd);

impl AsRawFd for RawFdHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// A TUN character device, addressed by the raw file descriptor the host
/// provided to `Supervisor::start`.
pub struct TunDevice {
    fd: AsyncFd<RawFdHandle>,
}

impl TunDevice {
    pub fn from_raw_fd(raw_fd: RawFd) -> io::Result<Self> {
        Ok(Self {
            fd: AsyncFd::new(RawFdHandle(raw_fd))?,
        })
    }

    /// Read one packet into `buf`, returning the number of bytes read.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            let result = guard.try_io(|inner| {
                let fd = inner.get_ref().0;
                let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });
            match result {
                Ok(inner) => return inner,
                Err(_would_block) => continue,
            }
        }
    }

    /// Write one packet. Blocks (asynchronously) until every byte is
    /// accepted by the device; TUN writes are whole-packet, not streamed.
    pub async fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut offset = 0;
        while offset < data.len() {
            let mut guard = self.fd.writable().await?;
            let result = guard.try_io(|inner| {
                let fd = inner.get_ref().0;
                let n = unsafe {
                    libc::write(
                        fd,
                        data[offset..].as_ptr() as *const libc::c_void,
                        data.len() - offset,
                    )
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });
            match result {
                Ok(Ok(n)) => offset += n,
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }
}

/// Sender half of the serialized TUN write queue: every flow, session and
/// the ICMP responder shares this handle instead of calling
/// [`TunDevice::write`] directly, so writes never interleave.
pub type TunWriter = mpsc::Sender<Vec<u8>>;

/// Spawn the single task that owns all TUN writes, serializing them so
/// packets from different flows never interleave mid-write.
pub fn spawn_writer(tun: Arc<TunDevice>) -> (TunWriter, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(1024);
    let handle = tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            if let Err(e) = tun.write(&packet).await {
                error!(error = %e, "TUN write failed");
            }
        }
    });
    (tx, handle)
}
