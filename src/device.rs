//! Output device discovery.
//!
//! ```no_run
//! use schleife::{CpalDevice, Player, ThreadDriver};
//!
//! let device = CpalDevice::default_output().expect("no output device");
//! println!("{} ({} Hz, {} ch)", device.name(), device.sample_rate(), device.channels());
//!
//! let sink = device.create_sink().expect("could not open stream");
//! let player = Player::new(ThreadDriver::default(), device.sample_rate(), sink);
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use cpal::traits::{DeviceTrait, HostTrait};
use tracing::debug;

use crate::error::EngineError;
use crate::nodes::CpalSink;

/// A discovered audio output device.
pub struct CpalDevice {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    name: String,
}

impl CpalDevice {
    fn from_device(device: cpal::Device) -> Option<Self> {
        let config = device.default_output_config().ok()?;
        let name = device.name().unwrap_or_else(|_| "Unknown".into());
        Some(Self { device, config, name })
    }

    /// The system's default output device, if there is one
    pub fn default_output() -> Option<Self> {
        let device = cpal::default_host().default_output_device()?;
        Self::from_device(device)
    }

    /// Every output device that reports a usable default config.
    ///
    /// Empty if enumeration fails.
    pub fn list_outputs() -> Vec<Self> {
        match cpal::default_host().output_devices() {
            Ok(devices) => devices.filter_map(Self::from_device).collect(),
            Err(e) => {
                debug!("output device enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device sample rate in Hz; the graph should run at this rate
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels()
    }

    /// Open an output stream and return the sink node feeding it.
    pub fn create_sink(&self) -> Result<CpalSink, EngineError> {
        CpalSink::new(&self.device, &self.config)
    }
}
