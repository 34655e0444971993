use std::io::Write;
use std::time::Duration;

use super::read_line_from;
use crate::scpi::{ScpiError, ScpiResult, Transport};

/// USB-serial link, as used by the Windfreak synthesizers. The SynthHD takes bare commands, so no
/// terminator is appended unless one is set.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    pub terminator: &'static str,
}

impl SerialTransport {
    /// # Errors
    /// `ScpiError::Device` if the port cannot be opened.
    pub fn open(path: &str, baud: u32, timeout: Duration) -> ScpiResult<Self> {
        let port = serialport::new(path, baud)
            .timeout(timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .open()
            .map_err(|e| ScpiError::Device(format!("{path}: {e}")))?;
        Ok(SerialTransport {
            port,
            terminator: "",
        })
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, cmd: &str) -> ScpiResult<()> {
        self.port.write_all(cmd.as_bytes())?;
        self.port.write_all(self.terminator.as_bytes())?;
        self.port.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> ScpiResult<String> {
        Ok(read_line_from(&mut self.port)?)
    }

    fn read_raw(&mut self) -> ScpiResult<Vec<u8>> {
        Ok(self.read_line()?.into_bytes())
    }
}
