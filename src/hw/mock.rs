//! In-memory mock hardware, used by controller/scheduler unit and
//! integration tests (spec §8's scenarios all run against mocks - no real
//! instrument is part of this crate's scope).

use super::{Camera, Fluidics, Illumination, LaserAfCamera, LaserAfIllumination, Piezo, Stage};
use crate::error::AcqResult;
use crate::model::{IlluminationSource, ImageMetadata, JobImage, PixelBuffer, Position};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A camera that always reports ready and returns a flat synthetic frame.
/// Tests that need contrast/centroid behavior construct `MockCamera` with a
/// custom `frame_generator`.
pub struct MockCamera {
    pub width: u32,
    pub height: u32,
    pub ready: AtomicBool,
    pub trigger_count: AtomicU64,
    pub not_ready_skips: AtomicU64,
    #[allow(clippy::type_complexity)]
    pub frame_generator: Mutex<Box<dyn FnMut(u64) -> Vec<u16> + Send>>,
}

impl MockCamera {
    pub fn new(width: u32, height: u32) -> Self {
        let len = (width * height) as usize;
        Self {
            width,
            height,
            ready: AtomicBool::new(true),
            trigger_count: AtomicU64::new(0),
            not_ready_skips: AtomicU64::new(0),
            frame_generator: Mutex::new(Box::new(move |_| vec![1000u16; len])),
        }
    }

    pub fn with_frame_generator<F>(width: u32, height: u32, generator: F) -> Self
    where
        F: FnMut(u64) -> Vec<u16> + Send + 'static,
    {
        Self {
            frame_generator: Mutex::new(Box::new(generator)),
            ..Self::new(width, height)
        }
    }
}

impl Camera for MockCamera {
    fn start_streaming(&self) -> AcqResult<()> {
        Ok(())
    }

    fn stop_streaming(&self) -> AcqResult<()> {
        Ok(())
    }

    fn set_exposure_time_ms(&self, _exposure_ms: f64) -> AcqResult<()> {
        Ok(())
    }

    fn set_analog_gain(&self, _gain: f64) -> AcqResult<()> {
        Ok(())
    }

    fn is_ready_for_trigger(&self) -> bool {
        let ready = self.ready.load(Ordering::SeqCst);
        if !ready {
            self.not_ready_skips.fetch_add(1, Ordering::Relaxed);
        }
        ready
    }

    fn send_trigger(&self) -> AcqResult<()> {
        self.trigger_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_frame(&self, _timeout: Duration) -> AcqResult<Option<(JobImage, ImageMetadata)>> {
        let count = self.trigger_count.load(Ordering::SeqCst);
        let pixels = (self.frame_generator.lock().unwrap_or_else(|e| e.into_inner()))(count);
        let metadata = ImageMetadata::default();
        let image = JobImage {
            width: self.width,
            height: self.height,
            pixels: PixelBuffer::U16(pixels),
            metadata: metadata.clone(),
        };
        Ok(Some((image, metadata)))
    }
}

pub struct MockLaserAfCamera {
    pub width: u32,
    pub height: u32,
    #[allow(clippy::type_complexity)]
    pub frame_generator: Mutex<Box<dyn FnMut() -> Vec<u16> + Send>>,
}

impl MockLaserAfCamera {
    pub fn with_frame_generator<F>(width: u32, height: u32, generator: F) -> Self
    where
        F: FnMut() -> Vec<u16> + Send + 'static,
    {
        Self {
            width,
            height,
            frame_generator: Mutex::new(Box::new(generator)),
        }
    }
}

impl LaserAfCamera for MockLaserAfCamera {
    fn read_frame(&self, _timeout: Duration) -> AcqResult<Option<JobImage>> {
        let pixels = (self.frame_generator.lock().unwrap_or_else(|e| e.into_inner()))();
        Ok(Some(JobImage {
            width: self.width,
            height: self.height,
            pixels: PixelBuffer::U16(pixels),
            metadata: ImageMetadata::default(),
        }))
    }
}

pub struct MockStage {
    position: Mutex<Position>,
}

impl MockStage {
    pub fn new(initial: Position) -> Self {
        Self {
            position: Mutex::new(initial),
        }
    }
}

impl Stage for MockStage {
    fn position(&self) -> AcqResult<Position> {
        Ok(*self.position.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn move_absolute(&self, position: Position) -> AcqResult<()> {
        *self.position.lock().unwrap_or_else(|e| e.into_inner()) = position;
        Ok(())
    }

    fn move_relative_z_um(&self, delta_um: f64) -> AcqResult<()> {
        let mut guard = self.position.lock().unwrap_or_else(|e| e.into_inner());
        guard.z_mm += delta_um / 1000.0;
        Ok(())
    }
}

pub struct MockPiezo {
    position_um: Mutex<f64>,
    range_um: (f64, f64),
}

impl MockPiezo {
    pub fn new(range_um: (f64, f64)) -> Self {
        Self {
            position_um: Mutex::new(0.0),
            range_um,
        }
    }
}

impl Piezo for MockPiezo {
    fn position_um(&self) -> AcqResult<f64> {
        Ok(*self.position_um.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn move_absolute_um(&self, position_um: f64) -> AcqResult<()> {
        *self.position_um.lock().unwrap_or_else(|e| e.into_inner()) = position_um;
        Ok(())
    }

    fn range_um(&self) -> (f64, f64) {
        self.range_um
    }
}

#[derive(Default)]
pub struct MockIllumination {
    pub on_sources: Mutex<Vec<IlluminationSource>>,
}

impl Illumination for MockIllumination {
    fn set_on(&self, source: IlluminationSource, on: bool) -> AcqResult<()> {
        let mut guard = self.on_sources.lock().unwrap_or_else(|e| e.into_inner());
        guard.retain(|s| s.0 != source.0);
        if on {
            guard.push(source);
        }
        Ok(())
    }

    fn set_intensity(&self, _source: IlluminationSource, _intensity: f64) -> AcqResult<()> {
        Ok(())
    }

    fn all_off(&self) -> AcqResult<()> {
        self.on_sources.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }
}

pub struct MockLaserAfIllumination {
    pub on: AtomicBool,
}

impl Default for MockLaserAfIllumination {
    fn default() -> Self {
        Self {
            on: AtomicBool::new(false),
        }
    }
}

impl LaserAfIllumination for MockLaserAfIllumination {
    fn set_on(&self, on: bool) -> AcqResult<()> {
        self.on.store(on, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockFluidics {
    pub runs: AtomicU32,
}

impl Fluidics for MockFluidics {
    fn run_protocol(&self, _time_point: u32) -> AcqResult<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
