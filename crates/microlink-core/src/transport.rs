use std::io::{Read, Write};

use serialport::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortInfo, SerialPortType,
    StopBits,
};

use crate::link::LinkConfig;
use crate::{LinkError, Result};

/// A serial port visible on this machine.
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => Self {
                name: info.port_name,
                vid: None,
                pid: None,
                product: None,
            },
        }
    }
}

/// Enumerate serial ports, USB metadata included. Never fails; an
/// enumeration error reads as "no ports".
pub fn list_ports() -> Vec<PortInfo> {
    serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect()
}

/// Device identifiers only, in enumeration order.
pub fn list_port_names() -> Vec<String> {
    list_ports().into_iter().map(|p| p.name).collect()
}

/// What the link needs from a port. The worker owns exactly one of these;
/// tests substitute a scripted implementation.
pub trait Transport: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write_all(&mut self, data: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    /// Bytes currently buffered on the input side.
    fn available(&mut self) -> Result<usize>;
    /// Drop everything buffered on the input side.
    fn clear_input(&mut self) -> Result<()>;
    fn name(&self) -> Option<String>;
}

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(config: &LinkConfig) -> Result<Self> {
        let port = serialport::new(config.port_name.as_str(), config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.read_timeout)
            .open()
            .map_err(|source| LinkError::Connect {
                port: config.port_name.clone(),
                source,
            })?;

        log::info!(
            "opened {} at {} baud",
            config.port_name,
            config.baud_rate
        );

        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.port.flush()?;
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.port.bytes_to_read().map_err(std::io::Error::from)? as usize)
    }

    fn clear_input(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(std::io::Error::from)?;
        Ok(())
    }

    fn name(&self) -> Option<String> {
        self.port.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumeration_never_fails() {
        let ports = list_ports();
        let names = list_port_names();
        assert_eq!(names.len(), ports.len());
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    use super::Transport;
    use crate::Result;

    #[derive(Default)]
    pub(crate) struct MockState {
        pub(crate) written: Vec<u8>,
        pub(crate) clears: usize,
    }

    /// Scripted stand-in for a port: chunks become readable once their
    /// offset from construction has elapsed, and writes can be echoed back.
    pub(crate) struct MockTransport {
        start: Instant,
        schedule: VecDeque<(Duration, Vec<u8>)>,
        pending: Vec<u8>,
        echo: bool,
        fail_writes: bool,
        pub(crate) state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        pub(crate) fn new() -> Self {
            Self::with_schedule(Vec::new())
        }

        pub(crate) fn with_schedule(chunks: Vec<(Duration, Vec<u8>)>) -> Self {
            Self {
                start: Instant::now(),
                schedule: chunks.into(),
                pending: Vec::new(),
                echo: false,
                fail_writes: false,
                state: Arc::new(Mutex::new(MockState::default())),
            }
        }

        pub(crate) fn echoing() -> Self {
            Self::new().echo()
        }

        pub(crate) fn echo(mut self) -> Self {
            self.echo = true;
            self
        }

        pub(crate) fn failing_writes() -> Self {
            Self {
                fail_writes: true,
                ..Self::new()
            }
        }

        fn absorb_due(&mut self) {
            let elapsed = self.start.elapsed();
            while matches!(self.schedule.front(), Some((at, _)) if *at <= elapsed) {
                if let Some((_, bytes)) = self.schedule.pop_front() {
                    self.pending.extend_from_slice(&bytes);
                }
            }
        }
    }

    impl Transport for MockTransport {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            self.absorb_due();
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }

        fn write_all(&mut self, data: &[u8]) -> Result<()> {
            if self.fail_writes {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "scripted write failure",
                )
                .into());
            }
            self.state.lock().written.extend_from_slice(data);
            if self.echo {
                self.pending.extend_from_slice(data);
            }
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }

        fn available(&mut self) -> Result<usize> {
            self.absorb_due();
            Ok(self.pending.len())
        }

        fn clear_input(&mut self) -> Result<()> {
            self.absorb_due();
            self.pending.clear();
            self.state.lock().clears += 1;
            Ok(())
        }

        fn name(&self) -> Option<String> {
            Some("mock".to_string())
        }
    }
}
