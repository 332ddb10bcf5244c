use std::io::{self, Read, Write};

use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};

use crate::config::{ConnectionConfig, Timing};
use crate::error::LinkError;
use crate::link::{Connector, Link};

/// Opens real serial ports, 8N1 without flow control.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn open(
        &mut self,
        config: &ConnectionConfig,
        timing: &Timing,
    ) -> Result<Box<dyn Link>, LinkError> {
        let port = serialport::new(&config.port_identifier, config.baud_rate)
            .timeout(timing.read_timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| LinkError::open(&config.port_identifier, e))?;
        Ok(Box::new(SerialLink { port: Some(port) }))
    }
}

pub struct SerialLink {
    port: Option<Box<dyn SerialPort>>,
}

impl SerialLink {
    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, LinkError> {
        self.port
            .as_mut()
            .ok_or_else(|| LinkError::Io(io::Error::new(io::ErrorKind::NotConnected, "port closed")))
    }
}

impl Link for SerialLink {
    fn write_all(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        let port = self.port()?;
        port.write_all(payload)?;
        port.flush()?;
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        match self.port()?.read(buf) {
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) -> Result<(), LinkError> {
        // serialport closes the descriptor on drop
        self.port.take();
        Ok(())
    }
}

/// One entry of `available_ports`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
}

pub fn available_ports() -> Result<Vec<PortInfo>, LinkError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| PortInfo {
            description: describe(&p.port_type),
            name: p.port_name,
        })
        .collect())
}

fn describe(kind: &SerialPortType) -> String {
    match kind {
        SerialPortType::UsbPort(usb) => {
            let mut s = format!("usb {:04x}:{:04x}", usb.vid, usb.pid);
            if let Some(product) = &usb.product {
                s.push(' ');
                s.push_str(product);
            }
            s
        }
        SerialPortType::PciPort => "pci".into(),
        SerialPortType::BluetoothPort => "bluetooth".into(),
        SerialPortType::Unknown => "unknown".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn opening_missing_port_is_an_open_failure() {
        let cfg = ConnectionConfig::new("/dev/serial-telemetry-does-not-exist", 115_200);
        let err = match SerialConnector.open(&cfg, &Timing::default()) {
            Ok(_) => panic!("opened a nonexistent port"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), FailureKind::Open);
        assert!(err.to_string().contains("serial-telemetry-does-not-exist"));
    }

    #[test]
    fn describes_port_types() {
        assert_eq!(describe(&SerialPortType::PciPort), "pci");
        assert_eq!(describe(&SerialPortType::Unknown), "unknown");
    }
}
