//! Hardware capability traits for the stage, camera, illumination, piezo,
//! filter wheel, and laser autofocus peripherals. Vendor SDK integration is
//! out of scope; these traits are the seam controllers program against, all
//! plain blocking calls since every call here is expected to block on real
//! hardware I/O.

pub mod mock;

use crate::error::AcqResult;
use crate::model::{ImageMetadata, JobImage, Position};

/// The image sensor used for regular acquisition and live view.
pub trait Camera: Send + Sync {
    fn start_streaming(&self) -> AcqResult<()>;
    fn stop_streaming(&self) -> AcqResult<()>;
    fn set_exposure_time_ms(&self, exposure_ms: f64) -> AcqResult<()>;
    fn set_analog_gain(&self, gain: f64) -> AcqResult<()>;
    /// Whether the camera can accept a new trigger right now (spec §4.4
    /// "if camera reports not ready, skip this tick").
    fn is_ready_for_trigger(&self) -> bool;
    fn send_trigger(&self) -> AcqResult<()>;
    /// Blocks up to `timeout` for the next frame, returning `None` on
    /// timeout (spec §4.9 "frame wait timeout").
    fn read_frame(&self, timeout: std::time::Duration) -> AcqResult<Option<(JobImage, ImageMetadata)>>;
}

/// The dedicated sensor used by `LaserAutofocusController` (spec §4.6).
pub trait LaserAfCamera: Send + Sync {
    fn read_frame(&self, timeout: std::time::Duration) -> AcqResult<Option<JobImage>>;
}

pub trait Stage: Send + Sync {
    fn position(&self) -> AcqResult<Position>;
    fn move_absolute(&self, position: Position) -> AcqResult<()>;
    fn move_relative_z_um(&self, delta_um: f64) -> AcqResult<()>;
}

pub trait Piezo: Send + Sync {
    fn position_um(&self) -> AcqResult<f64>;
    fn move_absolute_um(&self, position_um: f64) -> AcqResult<()>;
    fn range_um(&self) -> (f64, f64);
}

pub trait Illumination: Send + Sync {
    fn set_on(&self, source: crate::model::IlluminationSource, on: bool) -> AcqResult<()>;
    fn set_intensity(&self, source: crate::model::IlluminationSource, intensity: f64) -> AcqResult<()>;
    fn all_off(&self) -> AcqResult<()>;
}

pub trait FilterWheel: Send + Sync {
    fn move_to_position(&self, position: u32) -> AcqResult<()>;
}

/// Reagent-exchange hardware driven between timepoints (spec §4.8 "fluidics
/// hooks"); a no-op implementation is valid when `use_fluidics=false`.
pub trait Fluidics: Send + Sync {
    fn run_protocol(&self, time_point: u32) -> AcqResult<()>;
}

/// The laser-AF excitation source, switched independently of the main
/// `Illumination` capability (spec §4.6 "turn AF laser on").
pub trait LaserAfIllumination: Send + Sync {
    fn set_on(&self, on: bool) -> AcqResult<()>;
}
