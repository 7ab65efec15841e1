//! Mock TSL2591 for running without physical hardware.
//!
//! [`MockTransport`] simulates the sensor's register file:
//!
//! - `DEVICE_ID` answers `0x50` (or `0x00` for [`MockTransport::absent`])
//! - `ENABLE` and `CONTROL` hold whatever was last written
//! - the channel block is computed from a [`LightLevel`] and the current control
//!   register, saturating at `0xFFFF` like the real ADC
//!
//! Tests can script exact readings, inject read failures and inspect every write.
//! Clones share the same register file, so a test keeps one handle while the device
//! owns another.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::tsl2591::{enable, register, Gain, IntegrationTime, CHANNEL_MAX, DEVICE_ID};
use super::I2cTransport;

/// Simulated light hitting the sensor, in counts per (millisecond × gain multiplier).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LightLevel {
    /// Channel 0 (full spectrum) rate.
    pub full_spectrum: f64,
    /// Channel 1 (infrared) rate.
    pub infrared: f64,
}

impl LightLevel {
    /// Counts the ADC would report under `gain` and `integration_time`.
    pub fn counts(&self, gain: Gain, integration_time: IntegrationTime) -> (u16, u16) {
        let exposure = integration_time.millis() as f64 * gain.multiplier();
        let clamp = |rate: f64| (rate * exposure).round().clamp(0.0, f64::from(CHANNEL_MAX)) as u16;
        (clamp(self.full_spectrum), clamp(self.infrared))
    }
}

#[derive(Debug)]
struct MockRegisters {
    device_id: u8,
    enable: u8,
    control: u8,
    light: LightLevel,
    scripted: VecDeque<(u16, u16)>,
    failing_reads: usize,
    channel_reads: usize,
    writes: Vec<(u8, Vec<u8>)>,
}

/// In-memory stand-in for the sensor's I2C interface.
#[derive(Debug, Clone)]
pub struct MockTransport {
    registers: Arc<Mutex<MockRegisters>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A dark sensor that answers the device-ID probe.
    pub fn new() -> Self {
        Self::with_device_id(DEVICE_ID)
    }

    /// A bus with something other than a TSL2591 on it.
    pub fn absent() -> Self {
        Self::with_device_id(0x00)
    }

    fn with_device_id(device_id: u8) -> Self {
        Self {
            registers: Arc::new(Mutex::new(MockRegisters {
                device_id,
                enable: enable::POWEROFF,
                control: 0,
                light: LightLevel::default(),
                scripted: VecDeque::new(),
                failing_reads: 0,
                channel_reads: 0,
                writes: Vec::new(),
            })),
        }
    }

    /// A sensor under a constant light level.
    pub fn with_light(full_spectrum: f64, infrared: f64) -> Self {
        let mock = Self::new();
        mock.set_light(full_spectrum, infrared);
        mock
    }

    /// Change the simulated light level.
    pub fn set_light(&self, full_spectrum: f64, infrared: f64) {
        self.registers.lock().light = LightLevel {
            full_spectrum,
            infrared,
        };
    }

    /// Queue an exact channel reading; queued readings are served before the light model.
    pub fn push_reading(&self, ch0: u16, ch1: u16) {
        self.registers.lock().scripted.push_back((ch0, ch1));
    }

    /// Make the next `count` channel reads fail with a bus error.
    pub fn fail_next_reads(&self, count: usize) {
        self.registers.lock().failing_reads = count;
    }

    /// Last byte written to the ENABLE register.
    pub fn enable_register(&self) -> u8 {
        self.registers.lock().enable
    }

    /// Last byte written to the CONTROL register.
    pub fn control_register(&self) -> u8 {
        self.registers.lock().control
    }

    /// Number of channel block reads attempted.
    pub fn channel_reads(&self) -> usize {
        self.registers.lock().channel_reads
    }

    /// Every `(command, data)` write seen so far.
    pub fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.registers.lock().writes.clone()
    }
}

#[async_trait]
impl I2cTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn write_register(&mut self, command: u8, data: &[u8]) -> Result<()> {
        let mut regs = self.registers.lock();
        regs.writes.push((command, data.to_vec()));
        let value = data.first().copied().unwrap_or_default();
        match command & 0x1F {
            register::ENABLE => regs.enable = value,
            register::CONTROL => regs.control = value,
            _ => {}
        }
        Ok(())
    }

    async fn read_register(&mut self, command: u8, buffer: &mut [u8]) -> Result<()> {
        let mut regs = self.registers.lock();
        buffer.fill(0);
        match command & 0x1F {
            register::DEVICE_ID => {
                if let Some(byte) = buffer.first_mut() {
                    *byte = regs.device_id;
                }
            }
            register::ENABLE => {
                if let Some(byte) = buffer.first_mut() {
                    *byte = regs.enable;
                }
            }
            register::CONTROL => {
                if let Some(byte) = buffer.first_mut() {
                    *byte = regs.control;
                }
            }
            register::CHAN0_LOW => {
                regs.channel_reads += 1;
                if regs.failing_reads > 0 {
                    regs.failing_reads -= 1;
                    return Err(anyhow!("simulated I2C read failure"));
                }
                let (ch0, ch1) = match regs.scripted.pop_front() {
                    Some(reading) => reading,
                    None if regs.enable & enable::POWERON == 0 => (0, 0),
                    None => regs.light.counts(
                        Gain::from_bits(regs.control),
                        IntegrationTime::from_bits(regs.control),
                    ),
                };
                let mut block = [0u8; 4];
                block[..2].copy_from_slice(&ch0.to_le_bytes());
                block[2..].copy_from_slice(&ch1.to_le_bytes());
                let len = buffer.len().min(block.len());
                buffer[..len].copy_from_slice(&block[..len]);
            }
            _ => {}
        }
        Ok(())
    }
}
