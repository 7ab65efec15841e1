//! Linux `/dev/i2c-N` transport.
//!
//! Wraps `linux-embedded-hal`'s `I2cdev` and runs the blocking ioctl calls on Tokio's
//! blocking thread pool so the sampling loop never stalls the runtime. Built only with
//! the `instrument_i2c` feature. Without it, opening the transport reports
//! `FeatureNotEnabled`.

#[cfg(feature = "instrument_i2c")]
mod enabled {
    use std::sync::Arc;

    use anyhow::{anyhow, Context, Result};
    use async_trait::async_trait;
    use embedded_hal::i2c::I2c;
    use linux_embedded_hal::I2cdev;
    use parking_lot::Mutex;
    use tracing::debug;

    use crate::hardware::I2cTransport;

    /// I2C transport backed by a Linux i2c-dev character device.
    #[derive(Clone)]
    pub struct LinuxI2cTransport {
        /// Device path (e.g., "/dev/i2c-1")
        path: String,

        /// 7-bit target address
        address: u8,

        /// The opened bus (behind Arc<Mutex> for use from blocking tasks)
        device: Arc<Mutex<I2cdev>>,
    }

    impl LinuxI2cTransport {
        /// Open `path` for talking to the device at `address`.
        pub fn open(path: &str, address: u8) -> Result<Self> {
            let device = I2cdev::new(path)
                .with_context(|| format!("Failed to open I2C bus '{}'", path))?;
            debug!("I2C bus '{}' opened for address {:#04x}", path, address);
            Ok(Self {
                path: path.to_string(),
                address,
                device: Arc::new(Mutex::new(device)),
            })
        }

        /// Path of the underlying character device.
        pub fn path(&self) -> &str {
            &self.path
        }
    }

    #[async_trait]
    impl I2cTransport for LinuxI2cTransport {
        fn name(&self) -> &str {
            "i2c"
        }

        async fn write_register(&mut self, command: u8, data: &[u8]) -> Result<()> {
            let mut frame = Vec::with_capacity(data.len() + 1);
            frame.push(command);
            frame.extend_from_slice(data);
            let device = self.device.clone();
            let address = self.address;

            tokio::task::spawn_blocking(move || {
                device
                    .lock()
                    .write(address, &frame)
                    .map_err(|e| anyhow!("I2C write of {:#04x} failed: {:?}", command, e))
            })
            .await
            .context("I2C I/O task panicked")?
        }

        async fn read_register(&mut self, command: u8, buffer: &mut [u8]) -> Result<()> {
            let len = buffer.len();
            let device = self.device.clone();
            let address = self.address;

            let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
                let mut bytes = vec![0u8; len];
                device
                    .lock()
                    .write_read(address, &[command], &mut bytes)
                    .map_err(|e| anyhow!("I2C read of {:#04x} failed: {:?}", command, e))?;
                Ok(bytes)
            })
            .await
            .context("I2C I/O task panicked")??;

            buffer.copy_from_slice(&bytes);
            Ok(())
        }
    }
}

#[cfg(not(feature = "instrument_i2c"))]
mod disabled {
    use anyhow::Result;
    use async_trait::async_trait;

    use crate::error::MeterError;
    use crate::hardware::I2cTransport;

    /// Placeholder used when the crate is built without `instrument_i2c`.
    pub struct LinuxI2cTransport;

    impl LinuxI2cTransport {
        /// Always fails: I2C support was not compiled in.
        pub fn open(_path: &str, _address: u8) -> Result<Self> {
            Err(MeterError::FeatureNotEnabled("instrument_i2c".to_string()).into())
        }
    }

    #[async_trait]
    impl I2cTransport for LinuxI2cTransport {
        fn name(&self) -> &str {
            "i2c"
        }

        async fn write_register(&mut self, _command: u8, _data: &[u8]) -> Result<()> {
            Err(MeterError::FeatureNotEnabled("instrument_i2c".to_string()).into())
        }

        async fn read_register(&mut self, _command: u8, _buffer: &mut [u8]) -> Result<()> {
            Err(MeterError::FeatureNotEnabled("instrument_i2c".to_string()).into())
        }
    }
}

#[cfg(feature = "instrument_i2c")]
pub use enabled::LinuxI2cTransport;

#[cfg(not(feature = "instrument_i2c"))]
pub use disabled::LinuxI2cTransport;
