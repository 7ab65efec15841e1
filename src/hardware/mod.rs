//! Hardware access for the TSL2591 light sensor.
//!
//! The sensor is driven through two layers:
//!
//! - [`I2cTransport`]: raw register reads and writes on the bus. Implemented by
//!   [`i2c::LinuxI2cTransport`] for `/dev/i2c-N` devices and by [`mock::MockTransport`]
//!   for tests and hardware-free runs.
//! - [`tsl2591::Tsl2591`]: the register-level protocol. Owns the enable/gain/timing
//!   state behind one exclusive lock.

pub mod i2c;
pub mod mock;
pub mod tsl2591;

use anyhow::Result;
use async_trait::async_trait;

pub use tsl2591::{ChannelReading, DeviceStatus, Gain, IntegrationTime, Tsl2591};

/// Byte-level register access on an I2C bus.
///
/// `command` is the full command byte sent to the device (register address with the
/// command bit already applied).
#[async_trait]
pub trait I2cTransport: Send + Sync {
    /// Short transport name for logs (e.g. "i2c", "mock").
    fn name(&self) -> &str;

    /// Write `data` to the register addressed by `command`.
    async fn write_register(&mut self, command: u8, data: &[u8]) -> Result<()>;

    /// Fill `buffer` with bytes read starting at the register addressed by `command`.
    async fn read_register(&mut self, command: u8, buffer: &mut [u8]) -> Result<()>;
}
