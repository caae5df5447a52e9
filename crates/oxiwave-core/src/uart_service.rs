use std::collections::VecDeque;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, warn};
use oxiwave_decode::ByteSource;
use parking_lot::Mutex;
use serialport::SerialPortInfo;
use thiserror::Error;

/// Receive buffer size. Plenty for this device: the oximeter streams about
/// 250 bytes/s, so this holds over a minute of unread data.
const RX_CAPACITY: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum UartError {
    #[error("failed to open {port}: {source}")]
    OpenFailed {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("service thread is gone")]
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct PortInfo {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => Self {
                port_name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => Self {
                port_name: info.port_name,
                vid: None,
                pid: None,
                product: None,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct UartConfig {
    pub port_name: String,
    pub baud_rate: u32,
}

impl Default for UartConfig {
    fn default() -> Self {
        // BerryMed dongles and transparent-UART bridges run 115200 8N1.
        Self {
            port_name: String::new(),
            baud_rate: 115_200,
        }
    }
}

#[derive(Debug, Clone)]
pub enum UartEvent {
    Opened(String),
    Closed,
    Error(String),
}

enum Command {
    Close,
}

/// Receive buffer shared between the reader thread and a decoder.
///
/// Bounded: when the producer outruns the consumer the oldest bytes are
/// evicted and the decoder realigns on the next sync byte.
#[derive(Clone)]
pub struct RxBuffer {
    inner: Arc<Mutex<VecDeque<u8>>>,
    capacity: usize,
}

impl RxBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn push(&self, bytes: &[u8]) {
        let mut queue = self.inner.lock();
        if bytes.len() >= self.capacity {
            queue.clear();
            queue.extend(bytes[bytes.len() - self.capacity..].iter().copied());
            return;
        }
        let overflow = (queue.len() + bytes.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            warn!("rx buffer overflow, dropping {overflow} oldest bytes");
            queue.drain(..overflow);
        }
        queue.extend(bytes.iter().copied());
    }

    /// Copy up to `buf.len()` buffered bytes into `buf`, consuming them.
    /// Returns the number copied; 0 when nothing is buffered.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut queue = self.inner.lock();
        let n = buf.len().min(queue.len());
        for (slot, byte) in buf[..n].iter_mut().zip(queue.drain(..n)) {
            *slot = byte;
        }
        n
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl ByteSource for RxBuffer {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        RxBuffer::read(self, buf)
    }
}

/// Background serial reader feeding an [`RxBuffer`].
///
/// The service owns the port on a dedicated thread; received bytes land in
/// the shared buffer, lifecycle notifications in an event channel.
pub struct UartService {
    cfg: UartConfig,
    rx: RxBuffer,
    tx_cmd: Sender<Command>,
    rx_evt: Receiver<UartEvent>,
}

impl UartService {
    pub fn list_ports() -> Vec<PortInfo> {
        serialport::available_ports()
            .unwrap_or_default()
            .into_iter()
            .map(PortInfo::from)
            .collect()
    }

    pub fn open(cfg: UartConfig) -> Result<Self, UartError> {
        let mut port = serialport::new(&cfg.port_name, cfg.baud_rate)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|source| UartError::OpenFailed {
                port: cfg.port_name.clone(),
                source,
            })?;

        let (tx_cmd, rx_cmd) = unbounded::<Command>();
        let (tx_evt, rx_evt) = unbounded::<UartEvent>();
        let rx = RxBuffer::new(RX_CAPACITY);

        let writer = rx.clone();
        let port_name = cfg.port_name.clone();
        std::thread::spawn(move || {
            let _ = tx_evt.send(UartEvent::Opened(port_name));
            let mut buf = [0u8; 512];
            loop {
                match port.read(&mut buf) {
                    Ok(n) if n > 0 => {
                        debug!("rx {n} bytes");
                        writer.push(&buf[..n]);
                    }
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => {
                        warn!("serial read failed: {e}");
                        let _ = tx_evt.send(UartEvent::Error(e.to_string()));
                        let _ = tx_evt.send(UartEvent::Closed);
                        return;
                    }
                }
                while let Ok(cmd) = rx_cmd.try_recv() {
                    match cmd {
                        Command::Close => {
                            let _ = tx_evt.send(UartEvent::Closed);
                            return;
                        }
                    }
                }
            }
        });

        Ok(Self {
            cfg,
            rx,
            tx_cmd,
            rx_evt,
        })
    }

    /// Handle to the shared receive buffer. Clones all refer to the same
    /// underlying queue; hand one to a `PulseOximeter`.
    pub fn rx(&self) -> RxBuffer {
        self.rx.clone()
    }

    pub fn events(&self) -> &Receiver<UartEvent> {
        &self.rx_evt
    }

    pub fn close(&self) -> Result<(), UartError> {
        self.tx_cmd
            .send(Command::Close)
            .map_err(|_| UartError::Disconnected)
    }

    pub fn config(&self) -> &UartConfig {
        &self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rx_buffer_reads_in_order() {
        let rx = RxBuffer::new(16);
        rx.push(&[1, 2, 3]);
        rx.push(&[4, 5]);

        let mut buf = [0u8; 4];
        assert_eq!(rx.read(&mut buf), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(rx.len(), 1);

        assert_eq!(rx.read(&mut buf), 1);
        assert_eq!(buf[0], 5);
        assert!(rx.is_empty());
        assert_eq!(rx.read(&mut buf), 0);
    }

    #[test]
    fn rx_buffer_evicts_oldest_on_overflow() {
        let rx = RxBuffer::new(4);
        rx.push(&[1, 2, 3]);
        rx.push(&[4, 5, 6]);

        let mut buf = [0u8; 8];
        assert_eq!(rx.read(&mut buf), 4);
        assert_eq!(&buf[..4], &[3, 4, 5, 6]);
    }

    #[test]
    fn rx_buffer_keeps_tail_of_oversized_push() {
        let rx = RxBuffer::new(4);
        rx.push(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut buf = [0u8; 8];
        assert_eq!(rx.read(&mut buf), 4);
        assert_eq!(&buf[..4], &[5, 6, 7, 8]);
    }

    #[test]
    fn rx_buffer_clones_share_the_queue() {
        let rx = RxBuffer::new(16);
        let other = rx.clone();
        rx.push(&[0x80, 0x32]);

        let mut buf = [0u8; 2];
        assert_eq!(other.read(&mut buf), 2);
        assert!(rx.is_empty());
    }
}
