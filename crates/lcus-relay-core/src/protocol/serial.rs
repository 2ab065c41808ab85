//! Serial port handling
//!
//! The relay drivers talk to a board through the [`Transport`] trait. [`SerialTransport`]
//! implements it over a `serialport` handle; tests and the simulator provide their own.
//!
//! The protocol is half-duplex request/reply without request ids, so every
//! write-then-read pair must run under one lock. [`SharedTransport::exchange`] is that unit.

use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{RelayError, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS};

/// Byte-level access to a relay board
///
/// Reads block for at most the transport's read timeout; a read that times out
/// without data returns `Ok(0)` (or an empty line) rather than an error.
pub trait Transport: Send {
    /// Write every byte of `data`
    fn write_all(&mut self, data: &[u8]) -> Result<(), RelayError>;

    /// Flush pending output to the device
    fn flush(&mut self) -> Result<(), RelayError>;

    /// Read available bytes into `buf`, returning 0 on timeout
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, RelayError>;

    /// Discard anything waiting in the receive buffer
    fn reset_input_buffer(&mut self) -> Result<(), RelayError>;

    /// Read one line including its `\n`; a partial or empty line means the read timed out
    fn read_line(&mut self) -> Result<Vec<u8>, RelayError> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if self.read(&mut byte)? == 0 {
                break;
            }
            line.push(byte[0]);
            if byte[0] == b'\n' {
                break;
            }
        }
        Ok(line)
    }

    /// Read until `len` bytes have arrived or a read times out
    fn read_up_to(&mut self, len: usize) -> Result<Vec<u8>, RelayError> {
        let mut data = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data.truncate(filled);
        Ok(data)
    }
}

/// Read newline-terminated lines until a read comes back empty
pub fn read_lines(port: &mut dyn Transport) -> Result<Vec<Vec<u8>>, RelayError> {
    let mut lines = Vec::new();
    loop {
        let line = port.read_line()?;
        if line.is_empty() {
            break;
        }
        tracing::debug!("read line {:?}", String::from_utf8_lossy(&line));
        lines.push(line);
    }
    Ok(lines)
}

/// Open a serial port for a relay board
pub fn open_port(
    name: &str,
    baud_rate: Option<u32>,
    timeout: Option<Duration>,
) -> Result<Box<dyn SerialPort>, RelayError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);
    let timeout = timeout.unwrap_or(Duration::from_millis(DEFAULT_READ_TIMEOUT_MS));

    tracing::debug!("opening {} at {} baud, timeout {}ms", name, baud, timeout.as_millis());

    serialport::new(name, baud)
        .timeout(timeout)
        .open()
        .map_err(|e| RelayError::SerialError(format!("{}: {}", name, e)))
}

/// Configure a serial port for relay board communication
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), RelayError> {
    // Standard 8N1 configuration
    port.set_data_bits(serialport::DataBits::Eight)?;
    port.set_parity(serialport::Parity::None)?;
    port.set_stop_bits(serialport::StopBits::One)?;
    port.set_flow_control(serialport::FlowControl::None)?;
    Ok(())
}

/// [`Transport`] over a real serial port
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl SerialTransport {
    /// Open and configure `name` as 8N1
    pub fn open(name: &str, baud_rate: u32, timeout: Duration) -> Result<Self, RelayError> {
        let mut port = open_port(name, Some(baud_rate), Some(timeout))?;
        configure_port(port.as_mut())?;
        Ok(Self {
            port: Some(port),
            name: name.to_string(),
        })
    }

    /// Wrap an already opened port
    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        let name = port.name().unwrap_or_default();
        Self {
            port: Some(port),
            name,
        }
    }

    /// Port name as opened
    pub fn name(&self) -> &str {
        &self.name
    }

    /// False once [`SerialTransport::close`] has run
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Flush and release the port; later I/O fails with `NotConnected`
    pub fn close(&mut self) -> Result<(), RelayError> {
        if let Some(mut port) = self.port.take() {
            port.flush()?;
            tracing::debug!("closed {}", self.name);
        }
        Ok(())
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, RelayError> {
        self.port.as_mut().ok_or(RelayError::NotConnected)
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, data: &[u8]) -> Result<(), RelayError> {
        tracing::debug!("write {:02x?}", data);
        self.port()?.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RelayError> {
        self.port()?.flush()?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, RelayError> {
        match self.port()?.read(buf) {
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(0)
            }
            Err(e) => Err(RelayError::SerialError(e.to_string())),
        }
    }

    fn reset_input_buffer(&mut self) -> Result<(), RelayError> {
        self.port()?.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }
}

/// Cloneable handle serializing access to one [`Transport`]
#[derive(Clone)]
pub struct SharedTransport {
    inner: Arc<Mutex<Box<dyn Transport>>>,
}

impl SharedTransport {
    /// Take ownership of a transport
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(transport))),
        }
    }

    /// Run one request/response exchange with the transport locked
    pub fn exchange<R>(
        &self,
        f: impl FnOnce(&mut dyn Transport) -> Result<R, RelayError>,
    ) -> Result<R, RelayError> {
        let mut guard = self.inner.lock().map_err(|_| RelayError::LockPoisoned)?;
        f(&mut **guard)
    }
}

impl std::fmt::Debug for SharedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTransport").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Hands out queued chunks one read at a time
    struct ChunkedPort {
        chunks: VecDeque<Vec<u8>>,
    }

    impl Transport for ChunkedPort {
        fn write_all(&mut self, _data: &[u8]) -> Result<(), RelayError> {
            Ok(())
        }

        fn flush(&mut self) -> Result<(), RelayError> {
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, RelayError> {
            let Some(mut chunk) = self.chunks.pop_front() else {
                return Ok(0);
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.chunks.push_front(chunk.split_off(n));
            }
            Ok(n)
        }

        fn reset_input_buffer(&mut self) -> Result<(), RelayError> {
            self.chunks.clear();
            Ok(())
        }
    }

    fn port(chunks: &[&[u8]]) -> ChunkedPort {
        ChunkedPort {
            chunks: chunks.iter().map(|c| c.to_vec()).collect(),
        }
    }

    #[test]
    fn test_read_lines_until_timeout() {
        let mut p = port(&[b"CH1: ON\r\nCH2", b": OFF\r\n"]);
        let lines = read_lines(&mut p).unwrap();
        assert_eq!(lines, vec![b"CH1: ON\r\n".to_vec(), b"CH2: OFF\r\n".to_vec()]);
    }

    #[test]
    fn test_read_line_partial_on_timeout() {
        let mut p = port(&[b"CH1: O"]);
        assert_eq!(p.read_line().unwrap(), b"CH1: O".to_vec());
        assert!(p.read_line().unwrap().is_empty());
    }

    #[test]
    fn test_read_up_to_across_chunks() {
        let mut p = port(&[&[0xA0, 0x01], &[0x01, 0xA2, 0xFF]]);
        assert_eq!(p.read_up_to(4).unwrap(), vec![0xA0, 0x01, 0x01, 0xA2]);
        assert_eq!(p.read_up_to(4).unwrap(), vec![0xFF]);
    }

    #[test]
    fn test_shared_transport_exchange() {
        let shared = SharedTransport::new(port(&[b"x"]));
        let other = shared.clone();
        let n = other
            .exchange(|t| {
                let mut buf = [0u8; 8];
                t.read(&mut buf)
            })
            .unwrap();
        assert_eq!(n, 1);
        let n = shared.exchange(|t| t.read(&mut [0u8; 8])).unwrap();
        assert_eq!(n, 0);
    }
}
