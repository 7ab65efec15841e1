//! TSL2591 register protocol.
//!
//! Datasheet: <https://cdn-shop.adafruit.com/datasheets/TSL25911_Datasheet_EN_v1.pdf>
//!
//! Every register access ORs [`COMMAND_BIT`] into the register address. The control
//! register packs the integration-time code in the low nibble and the gain code in the
//! high nibble, so changing one field must rewrite the other with its current value.
//!
//! All device state (`enabled`, `gain`, `integration_time`) and the transport live behind
//! a single `tokio::sync::Mutex`. No caller can observe a half-applied enable, control
//! write or channel read.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, Span};

use super::I2cTransport;
use crate::error::{AppResult, MeterError};

/// Default 7-bit I2C address.
pub const I2C_ADDRESS: u8 = 0x29;

/// 1010 0000: bits 7 and 5 select "command, normal operation".
pub const COMMAND_BIT: u8 = 0xA0;

/// Value of [`register::DEVICE_ID`] on a genuine TSL2591.
pub const DEVICE_ID: u8 = 0x50;

/// Saturated channel reading.
pub const CHANNEL_MAX: u16 = 0xFFFF;

/// Register map.
#[allow(missing_docs)]
pub mod register {
    pub const ENABLE: u8 = 0x00;
    pub const CONTROL: u8 = 0x01;
    pub const THRESHOLD_AILTL: u8 = 0x04;
    pub const THRESHOLD_AILTH: u8 = 0x05;
    pub const THRESHOLD_AIHTL: u8 = 0x06;
    pub const THRESHOLD_AIHTH: u8 = 0x07;
    pub const THRESHOLD_NPAILTL: u8 = 0x08;
    pub const THRESHOLD_NPAILTH: u8 = 0x09;
    pub const THRESHOLD_NPAIHTL: u8 = 0x0A;
    pub const THRESHOLD_NPAIHTH: u8 = 0x0B;
    pub const PERSIST_FILTER: u8 = 0x0C;
    pub const PACKAGE_PID: u8 = 0x11;
    pub const DEVICE_ID: u8 = 0x12;
    pub const DEVICE_STATUS: u8 = 0x13;
    pub const CHAN0_LOW: u8 = 0x14;
    pub const CHAN0_HIGH: u8 = 0x15;
    pub const CHAN1_LOW: u8 = 0x16;
    pub const CHAN1_HIGH: u8 = 0x17;
}

/// ENABLE register bits.
pub mod enable {
    /// All bits clear: oscillator and ALS off.
    pub const POWEROFF: u8 = 0x00;
    /// Oscillator on.
    pub const POWERON: u8 = 0x01;
    /// ALS enable.
    pub const AEN: u8 = 0x02;
    /// ALS interrupt enable (subject to the persist filter).
    pub const AIEN: u8 = 0x10;
    /// No-persist interrupt enable (bypasses the persist filter).
    pub const NPIEN: u8 = 0x80;
    /// Byte written when powering the sensor on.
    pub const ACTIVE: u8 = POWERON | AEN | AIEN | NPIEN;
}

/// Analog gain applied before digitization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gain {
    /// 1x
    #[default]
    Low,
    /// 25x
    Med,
    /// 428x
    High,
    /// 9876x
    Max,
}

impl Gain {
    /// All gains, lowest first. This is the calibration search order.
    pub const ASCENDING: [Gain; 4] = [Gain::Low, Gain::Med, Gain::High, Gain::Max];

    /// Gain field of the control register.
    pub fn bits(self) -> u8 {
        match self {
            Gain::Low => 0x00,
            Gain::Med => 0x10,
            Gain::High => 0x20,
            Gain::Max => 0x30,
        }
    }

    /// Decode the gain field of a control register byte.
    pub fn from_bits(control: u8) -> Gain {
        match control & 0x30 {
            0x10 => Gain::Med,
            0x20 => Gain::High,
            0x30 => Gain::Max,
            _ => Gain::Low,
        }
    }

    /// Amplification factor used by the lux formula.
    pub fn multiplier(self) -> f64 {
        match self {
            Gain::Low => 1.0,
            Gain::Med => 25.0,
            Gain::High => 428.0,
            Gain::Max => 9876.0,
        }
    }
}

impl fmt::Display for Gain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gain::Low => write!(f, "Low gain (1x)"),
            Gain::Med => write!(f, "Medium gain (25x)"),
            Gain::High => write!(f, "High gain (428x)"),
            Gain::Max => write!(f, "Max gain (9876x)"),
        }
    }
}

/// ADC integration (exposure) time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum IntegrationTime {
    /// 100 ms
    Ms100,
    /// 200 ms
    Ms200,
    /// 300 ms
    #[default]
    Ms300,
    /// 400 ms
    Ms400,
    /// 500 ms
    Ms500,
    /// 600 ms
    Ms600,
}

impl IntegrationTime {
    /// All integration times, longest first. This is the calibration search order.
    pub const DESCENDING: [IntegrationTime; 6] = [
        IntegrationTime::Ms600,
        IntegrationTime::Ms500,
        IntegrationTime::Ms400,
        IntegrationTime::Ms300,
        IntegrationTime::Ms200,
        IntegrationTime::Ms100,
    ];

    /// Timing field of the control register.
    pub fn bits(self) -> u8 {
        match self {
            IntegrationTime::Ms100 => 0x00,
            IntegrationTime::Ms200 => 0x01,
            IntegrationTime::Ms300 => 0x02,
            IntegrationTime::Ms400 => 0x03,
            IntegrationTime::Ms500 => 0x04,
            IntegrationTime::Ms600 => 0x05,
        }
    }

    /// Decode the timing field of a control register byte.
    ///
    /// Reserved codes 6 and 7 decode as 100 ms.
    pub fn from_bits(control: u8) -> IntegrationTime {
        match control & 0x07 {
            0x01 => IntegrationTime::Ms200,
            0x02 => IntegrationTime::Ms300,
            0x03 => IntegrationTime::Ms400,
            0x04 => IntegrationTime::Ms500,
            0x05 => IntegrationTime::Ms600,
            _ => IntegrationTime::Ms100,
        }
    }

    /// Integration time in milliseconds.
    pub fn millis(self) -> u64 {
        (u64::from(self.bits()) + 1) * 100
    }

    /// Wait before reading the channel registers: 200 ms per step of the timing code.
    pub fn settle_delay(self) -> Duration {
        Duration::from_millis(200 * u64::from(self.bits()))
    }
}

impl TryFrom<u64> for IntegrationTime {
    type Error = String;

    fn try_from(millis: u64) -> Result<Self, Self::Error> {
        match millis {
            100 => Ok(IntegrationTime::Ms100),
            200 => Ok(IntegrationTime::Ms200),
            300 => Ok(IntegrationTime::Ms300),
            400 => Ok(IntegrationTime::Ms400),
            500 => Ok(IntegrationTime::Ms500),
            600 => Ok(IntegrationTime::Ms600),
            other => Err(format!(
                "integration time {other} ms is not supported (100, 200, 300, 400, 500 or 600)"
            )),
        }
    }
}

impl From<IntegrationTime> for u64 {
    fn from(value: IntegrationTime) -> Self {
        value.millis()
    }
}

impl fmt::Display for IntegrationTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.millis())
    }
}

/// Raw counts from one channel read, with the settings they were taken under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelReading {
    /// Channel 0: full spectrum.
    pub ch0: u16,
    /// Channel 1: infrared.
    pub ch1: u16,
    /// Gain active during the read.
    pub gain: Gain,
    /// Integration time active during the read.
    pub integration_time: IntegrationTime,
}

/// Snapshot of the device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    /// Whether the oscillator and ALS are powered on.
    pub enabled: bool,
    /// Current gain.
    pub gain: Gain,
    /// Current integration time.
    pub integration_time: IntegrationTime,
}

struct DeviceState {
    transport: Box<dyn I2cTransport>,
    enabled: bool,
    gain: Gain,
    integration_time: IntegrationTime,
}

impl DeviceState {
    async fn write(&mut self, register: u8, value: u8) -> AppResult<()> {
        self.transport
            .write_register(COMMAND_BIT | register, &[value])
            .await
            .map_err(|e| MeterError::WriteFailure(format!("{e:#}")))
    }

    async fn write_control(&mut self, gain: Gain, integration_time: IntegrationTime) -> AppResult<()> {
        if !self.enabled {
            return Err(MeterError::NotEnabled);
        }
        self.write(register::CONTROL, integration_time.bits() | gain.bits())
            .await?;
        self.gain = gain;
        self.integration_time = integration_time;
        Ok(())
    }
}

/// A TSL2591 attached to an [`I2cTransport`].
pub struct Tsl2591 {
    state: Mutex<DeviceState>,
    span: Span,
}

impl Tsl2591 {
    /// Confirm a TSL2591 answers on `transport`, apply `gain`/`integration_time`, then
    /// power it down until a job enables it.
    ///
    /// # Errors
    ///
    /// `DeviceAbsent` if the device-ID register cannot be read or does not hold
    /// [`DEVICE_ID`].
    pub async fn probe(
        transport: Box<dyn I2cTransport>,
        gain: Gain,
        integration_time: IntegrationTime,
    ) -> AppResult<Self> {
        Self::probe_with_span(transport, gain, integration_time, tracing::info_span!("tsl2591"))
            .await
    }

    /// [`Tsl2591::probe`] with an injected logging span.
    pub async fn probe_with_span(
        mut transport: Box<dyn I2cTransport>,
        gain: Gain,
        integration_time: IntegrationTime,
        span: Span,
    ) -> AppResult<Self> {
        let mut id = [0u8; 1];
        transport
            .read_register(COMMAND_BIT | register::DEVICE_ID, &mut id)
            .await
            .map_err(|e| MeterError::DeviceAbsent(format!("failed to read device id: {e:#}")))?;
        if id[0] != DEVICE_ID {
            return Err(MeterError::DeviceAbsent(format!(
                "expected device id {DEVICE_ID:#04x} on {} bus, got {:#04x}",
                transport.name(),
                id[0]
            )));
        }

        // The power state is unknown after boot; assume on so the control write is
        // accepted, then power off explicitly.
        let mut state = DeviceState {
            transport,
            enabled: true,
            gain,
            integration_time,
        };
        state.write_control(gain, integration_time).await?;
        state.write(register::ENABLE, enable::POWEROFF).await?;
        state.enabled = false;

        info!(parent: &span, %gain, %integration_time, "TSL2591 found");
        Ok(Self {
            state: Mutex::new(state),
            span,
        })
    }

    /// Power on the oscillator and ALS. No-op if already enabled.
    pub async fn enable(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if state.enabled {
            return Ok(());
        }
        state.write(register::ENABLE, enable::ACTIVE).await?;
        state.enabled = true;
        debug!(parent: &self.span, "sensor enabled");
        Ok(())
    }

    /// Power the sensor off. No-op if already disabled.
    pub async fn disable(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if !state.enabled {
            return Ok(());
        }
        state.write(register::ENABLE, enable::POWEROFF).await?;
        state.enabled = false;
        debug!(parent: &self.span, "sensor disabled");
        Ok(())
    }

    /// Set the gain, preserving the current integration time.
    pub async fn set_gain(&self, gain: Gain) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let integration_time = state.integration_time;
        state.write_control(gain, integration_time).await
    }

    /// Set the integration time, preserving the current gain.
    pub async fn set_timing(&self, integration_time: IntegrationTime) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let gain = state.gain;
        state.write_control(gain, integration_time).await
    }

    /// Wait for the current integration cycle, then read both channels as one 4-byte
    /// block starting at `CHAN0_LOW`.
    pub async fn read_channels(&self) -> AppResult<ChannelReading> {
        let mut state = self.state.lock().await;
        if !state.enabled {
            return Err(MeterError::NotEnabled);
        }

        let settle = state.integration_time.settle_delay();
        tokio::time::sleep(settle).await;

        let mut bytes = [0u8; 4];
        state
            .transport
            .read_register(COMMAND_BIT | register::CHAN0_LOW, &mut bytes)
            .await
            .map_err(|e| MeterError::ReadFailure(format!("{e:#}")))?;

        let ch0 = u16::from_le_bytes([bytes[0], bytes[1]]);
        let ch1 = u16::from_le_bytes([bytes[2], bytes[3]]);
        debug!(parent: &self.span, ?bytes, ch0, ch1, "channels read");

        Ok(ChannelReading {
            ch0,
            ch1,
            gain: state.gain,
            integration_time: state.integration_time,
        })
    }

    /// Current enable/gain/timing state.
    pub async fn status(&self) -> DeviceStatus {
        let state = self.state.lock().await;
        DeviceStatus {
            enabled: state.enabled,
            gain: state.gain,
            integration_time: state.integration_time,
        }
    }

    /// The span this device logs under.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockTransport;

    async fn probe(mock: &MockTransport) -> Tsl2591 {
        Tsl2591::probe(Box::new(mock.clone()), Gain::Low, IntegrationTime::Ms300)
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_configures_then_powers_off() {
        let mock = MockTransport::new();
        let device = probe(&mock).await;

        let status = device.status().await;
        assert!(!status.enabled);
        assert_eq!(status.gain, Gain::Low);
        assert_eq!(status.integration_time, IntegrationTime::Ms300);
        assert_eq!(mock.control_register(), 0x02);
        assert_eq!(mock.enable_register(), enable::POWEROFF);
    }

    #[tokio::test]
    async fn test_probe_rejects_wrong_device_id() {
        let mock = MockTransport::absent();
        let result = Tsl2591::probe(Box::new(mock), Gain::Low, IntegrationTime::Ms300).await;
        assert!(matches!(result, Err(MeterError::DeviceAbsent(_))));
    }

    #[tokio::test]
    async fn test_enable_is_idempotent() {
        let mock = MockTransport::new();
        let device = probe(&mock).await;
        let writes_after_probe = mock.writes().len();

        device.enable().await.unwrap();
        device.enable().await.unwrap();
        assert_eq!(mock.enable_register(), enable::ACTIVE);
        assert_eq!(mock.writes().len(), writes_after_probe + 1);

        device.disable().await.unwrap();
        device.disable().await.unwrap();
        assert_eq!(mock.enable_register(), enable::POWEROFF);
        assert_eq!(mock.writes().len(), writes_after_probe + 2);
    }

    #[tokio::test]
    async fn test_control_writes_preserve_other_field() {
        let mock = MockTransport::new();
        let device = probe(&mock).await;
        device.enable().await.unwrap();

        device.set_gain(Gain::High).await.unwrap();
        assert_eq!(mock.control_register(), 0x20 | 0x02);

        device.set_timing(IntegrationTime::Ms600).await.unwrap();
        assert_eq!(mock.control_register(), 0x20 | 0x05);

        let last = mock.writes().last().cloned().unwrap();
        assert_eq!(last, (COMMAND_BIT | register::CONTROL, vec![0x25]));
    }

    #[tokio::test]
    async fn test_operations_require_enabled() {
        let mock = MockTransport::new();
        let device = probe(&mock).await;

        assert!(matches!(device.set_gain(Gain::Max).await, Err(MeterError::NotEnabled)));
        assert!(matches!(
            device.set_timing(IntegrationTime::Ms100).await,
            Err(MeterError::NotEnabled)
        ));
        assert!(matches!(device.read_channels().await, Err(MeterError::NotEnabled)));
        assert_eq!(device.status().await.gain, Gain::Low);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_channels_decodes_little_endian() {
        let mock = MockTransport::new();
        mock.push_reading(0x1234, 0x00AB);
        let device = probe(&mock).await;
        device.enable().await.unwrap();

        let reading = device.read_channels().await.unwrap();
        assert_eq!(reading.ch0, 0x1234);
        assert_eq!(reading.ch1, 0x00AB);
        assert_eq!(reading.gain, Gain::Low);
        assert_eq!(reading.integration_time, IntegrationTime::Ms300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_waits_for_integration() {
        let mock = MockTransport::new();
        let device = probe(&mock).await;
        device.enable().await.unwrap();
        device.set_timing(IntegrationTime::Ms600).await.unwrap();

        let start = tokio::time::Instant::now();
        device.read_channels().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_is_reported() {
        let mock = MockTransport::new();
        mock.fail_next_reads(1);
        let device = probe(&mock).await;
        device.enable().await.unwrap();

        assert!(matches!(device.read_channels().await, Err(MeterError::ReadFailure(_))));
        assert!(device.read_channels().await.is_ok());
    }

    #[test]
    fn test_control_field_codes() {
        for gain in Gain::ASCENDING {
            assert_eq!(Gain::from_bits(gain.bits() | 0x05), gain);
        }
        for time in IntegrationTime::DESCENDING {
            assert_eq!(IntegrationTime::from_bits(time.bits() | 0x30), time);
        }
        assert_eq!(IntegrationTime::Ms100.settle_delay(), Duration::ZERO);
        assert_eq!(IntegrationTime::Ms400.millis(), 400);
        assert!(IntegrationTime::try_from(250).is_err());
    }

    #[test]
    fn test_setting_names() {
        assert_eq!(Gain::High.to_string(), "High gain (428x)");
        assert_eq!(IntegrationTime::Ms500.to_string(), "500ms");
    }
}
