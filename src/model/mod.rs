//! Data model (spec §3): value types and immutable snapshots shared across
//! every component. Nothing here owns a thread or a hardware handle; see
//! `resource_coordinator`, `scheduler`, `autofocus` for the stateful pieces
//! that consume these types.

pub mod acquisition_params;
pub mod capture_info;
pub mod channel;
pub mod focus_map;
pub mod image;
pub mod laser_af;
pub mod lease;
pub mod position;
pub mod scan_region;

pub use acquisition_params::{AcquisitionParameters, ZRangeMm, ZStackingConfig};
pub use capture_info::CaptureInfo;
pub use channel::{ChannelConfigurationSet, ChannelMode, IlluminationSource};
pub use focus_map::FocusMap;
pub use image::{ImageMetadata, JobImage, PixelBuffer};
pub use laser_af::{LaserAFConfig, LaserAFReference, Roi as LaserAfRoi, SpotDetectionMode};
pub use lease::{GlobalMode, LeaseMode, Resource, ResourceLease};
pub use position::Position;
pub use scan_region::{FovCoord, RegionShape, ScanPositionInformation, ScanRegion};
