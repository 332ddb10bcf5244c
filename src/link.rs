//! The seam between the control loop and the physical port.
//!
//! `port` provides the serialport-backed implementation; tests substitute a
//! scripted one.

use crate::config::{ConnectionConfig, Timing};
use crate::error::LinkError;

/// An open connection. Owned exclusively by the control loop.
pub trait Link: Send {
    fn write_all(&mut self, payload: &[u8]) -> Result<(), LinkError>;

    /// Read whatever arrives within the link's read timeout. `Ok(0)` means
    /// nothing did.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, LinkError>;

    /// Release the handle. Dropping must release it too; this exists so the
    /// loop can log a failing close.
    fn close(&mut self) -> Result<(), LinkError> {
        Ok(())
    }
}

/// Something that can (re)open the link on demand.
pub trait Connector: Send {
    fn open(&mut self, config: &ConnectionConfig, timing: &Timing)
    -> Result<Box<dyn Link>, LinkError>;
}

impl<F> Connector for F
where
    F: FnMut(&ConnectionConfig, &Timing) -> Result<Box<dyn Link>, LinkError> + Send,
{
    fn open(
        &mut self,
        config: &ConnectionConfig,
        timing: &Timing,
    ) -> Result<Box<dyn Link>, LinkError> {
        self(config, timing)
    }
}
