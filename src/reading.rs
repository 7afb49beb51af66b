//! The decoded telemetry record.
//!
//! The board prints one brace-delimited object per cycle:
//!
//! ```text
//! {"t":21.5,"l":120,"c":90,"s":30,"storm":0,"ultra":21.48}
//! ```
//!
//! A candidate becomes a [`Reading`] only when it is an object with exactly these six
//! keys and every value is a number. Anything else is rejected whole.

use serde::{Deserialize, Serialize};

/// One fully decoded telemetry record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reading {
    /// Primary temperature in °C (`t`).
    #[serde(rename = "t")]
    pub temperature: f64,
    /// Light level, 0-255 nominal (`l`).
    #[serde(rename = "l")]
    pub light: f64,
    /// Compass heading in degrees, 0-360 (`c`).
    #[serde(rename = "c")]
    pub compass: f64,
    /// Sound level (`s`).
    #[serde(rename = "s")]
    pub sound: f64,
    /// Storm-risk flag, 0 or 1 (`storm`).
    pub storm: f64,
    /// Averaged high-precision temperature in °C (`ultra`).
    #[serde(rename = "ultra")]
    pub ultra_temperature: f64,
}

impl Reading {
    /// Decode one candidate record.
    pub fn decode(candidate: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(candidate)
    }

    /// True when the board flags storm risk.
    pub fn storm_risk(&self) -> bool {
        self.storm != 0.0
    }
}
