use std::ffi::CString;
use std::io::Write;
use std::time::Duration;

use visa_rs::prelude::*;

use super::{read_block_from, read_line_from};
use crate::scpi::{ScpiError, ScpiResult, Transport};

fn vs_err(err: visa_rs::Error) -> ScpiError {
    ScpiError::Device(format!("VISA: {err:?}"))
}

/// USB/TCP instrument opened through the system VISA library.
pub struct VisaTransport {
    // dropped before the resource manager, which would otherwise close it underneath us
    instr: Instrument,
    _rm: DefaultRM,
}

impl VisaTransport {
    /// Open e.g. `"USB0::0x1AB1::0x04CE::DS1ZA000000000::INSTR"`.
    /// # Errors
    /// `ScpiError::Device` if VISA cannot find or open the resource.
    pub fn open(resource: &str, timeout: Duration) -> ScpiResult<Self> {
        let rm = DefaultRM::new().map_err(vs_err)?;
        let name = CString::new(resource)
            .map_err(|_| ScpiError::Device(format!("bad resource name {resource:?}")))?;
        let instr = rm
            .open(&name.into(), AccessMode::NO_LOCK, timeout)
            .map_err(vs_err)?;
        Ok(VisaTransport { instr, _rm: rm })
    }
}

impl Transport for VisaTransport {
    fn write(&mut self, cmd: &str) -> ScpiResult<()> {
        self.instr.write_all(cmd.as_bytes())?;
        self.instr.write_all(b"\n")?;
        Ok(())
    }

    fn read_line(&mut self) -> ScpiResult<String> {
        Ok(read_line_from(&self.instr)?)
    }

    fn read_raw(&mut self) -> ScpiResult<Vec<u8>> {
        Ok(read_block_from(&self.instr)?)
    }
}
