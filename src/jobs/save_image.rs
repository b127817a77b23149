//! Writes a captured frame to disk as PNG/TIFF (via the `image` crate) or
//! Zarr v3 (via `zarrs`), as a synchronous, single-array-per-frame write
//! (no async runtime in this crate's worker threads).

use super::job::Job;
use crate::error::{AcqError, AcqResult};
use crate::model::{CaptureInfo, JobImage, PixelBuffer};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Tiff,
    Zarr,
}

pub struct SaveImageJob {
    pub info: CaptureInfo,
    pub image: Arc<JobImage>,
    pub format: ImageFormat,
}

impl SaveImageJob {
    pub fn new(info: CaptureInfo, image: Arc<JobImage>, format: ImageFormat) -> Self {
        Self { info, image, format }
    }

    fn output_path(&self, ext: &str) -> PathBuf {
        self.info.save_directory.join(self.info.output_filename(ext))
    }

    fn write_raster(&self) -> AcqResult<()> {
        std::fs::create_dir_all(&self.info.save_directory)?;
        let width = self.image.width;
        let height = self.image.height;
        match (&self.image.pixels, self.format) {
            (PixelBuffer::U8(data), ImageFormat::Png) => {
                let buffer = image::GrayImage::from_raw(width, height, data.clone())
                    .ok_or_else(|| AcqError::FilesystemError("pixel buffer does not match frame dimensions".into()))?;
                buffer
                    .save(self.output_path("png"))
                    .map_err(|e| AcqError::FilesystemError(e.to_string()))
            }
            (PixelBuffer::U16(data), _) => {
                let buffer = image::ImageBuffer::<image::Luma<u16>, Vec<u16>>::from_raw(width, height, data.clone())
                    .ok_or_else(|| AcqError::FilesystemError("pixel buffer does not match frame dimensions".into()))?;
                buffer
                    .save(self.output_path("tiff"))
                    .map_err(|e| AcqError::FilesystemError(e.to_string()))
            }
            (PixelBuffer::U8(data), ImageFormat::Tiff) => {
                let buffer = image::GrayImage::from_raw(width, height, data.clone())
                    .ok_or_else(|| AcqError::FilesystemError("pixel buffer does not match frame dimensions".into()))?;
                buffer
                    .save(self.output_path("tiff"))
                    .map_err(|e| AcqError::FilesystemError(e.to_string()))
            }
            (PixelBuffer::F64(_), _) => Err(AcqError::FilesystemError(
                "F64 pixel buffers are not directly rasterizable; use Zarr output".into(),
            )),
        }
    }

    fn write_zarr(&self) -> AcqResult<()> {
        use zarrs::array::{ArrayBuilder, DataType, FillValue};
        use zarrs::filesystem::FilesystemStore;
        use zarrs::storage::ReadableWritableListableStorage;

        let store_path = self.info.save_directory.join(format!("{}.zarr", self.info.file_id));
        std::fs::create_dir_all(&self.info.save_directory)?;
        let store: ReadableWritableListableStorage = Arc::new(
            FilesystemStore::new(&store_path).map_err(|e| AcqError::FilesystemError(e.to_string()))?,
        );

        let (data_type, fill_value) = match &self.image.pixels {
            PixelBuffer::U8(_) => (DataType::UInt8, FillValue::from(0u8)),
            PixelBuffer::U16(_) => (DataType::UInt16, FillValue::from(0u16)),
            PixelBuffer::F64(_) => (DataType::Float64, FillValue::from(0.0f64)),
        };

        let array = ArrayBuilder::new(
            vec![self.image.height as u64, self.image.width as u64],
            data_type,
            vec![self.image.height as u64, self.image.width as u64].try_into().map_err(|_| {
                AcqError::FilesystemError("invalid chunk shape".into())
            })?,
            fill_value,
        )
        .dimension_names(Some(vec!["y".into(), "x".into()]))
        .build(store, "/")
        .map_err(|e| AcqError::FilesystemError(e.to_string()))?;

        array
            .store_metadata()
            .map_err(|e| AcqError::FilesystemError(e.to_string()))?;

        match &self.image.pixels {
            PixelBuffer::U8(data) => array
                .store_array_subset_elements(&array.subset_all(), data)
                .map_err(|e| AcqError::FilesystemError(e.to_string())),
            PixelBuffer::U16(data) => array
                .store_array_subset_elements(&array.subset_all(), data)
                .map_err(|e| AcqError::FilesystemError(e.to_string())),
            PixelBuffer::F64(data) => array
                .store_array_subset_elements(&array.subset_all(), data)
                .map_err(|e| AcqError::FilesystemError(e.to_string())),
        }
    }
}

impl Job for SaveImageJob {
    fn id(&self) -> String {
        self.info.output_filename(match self.format {
            ImageFormat::Png => "png",
            ImageFormat::Tiff => "tiff",
            ImageFormat::Zarr => "zarr",
        })
    }

    fn run(&self) -> AcqResult<()> {
        match self.format {
            ImageFormat::Png | ImageFormat::Tiff => self.write_raster(),
            ImageFormat::Zarr => self.write_zarr(),
        }
    }
}

/// Stacks the three single-band sub-exposures of an `_RGB`-suffixed
/// configuration (spec §6) into one interleaved RGB raster, mirroring the
/// original's `construct_rgb_image`: U16 planes write a 16-bit TIFF, U8
/// planes write a PNG.
pub struct SaveCompositeImageJob {
    pub info: CaptureInfo,
    pub red: Arc<JobImage>,
    pub green: Arc<JobImage>,
    pub blue: Arc<JobImage>,
}

impl SaveCompositeImageJob {
    pub fn new(info: CaptureInfo, red: Arc<JobImage>, green: Arc<JobImage>, blue: Arc<JobImage>) -> Self {
        Self { info, red, green, blue }
    }

    fn output_path(&self, ext: &str) -> PathBuf {
        self.info.save_directory.join(self.info.output_filename(ext))
    }
}

impl Job for SaveCompositeImageJob {
    fn id(&self) -> String {
        self.info.output_filename(match &self.red.pixels {
            PixelBuffer::U16(_) => "tiff",
            _ => "png",
        })
    }

    fn run(&self) -> AcqResult<()> {
        std::fs::create_dir_all(&self.info.save_directory)?;
        let width = self.red.width;
        let height = self.red.height;
        if self.green.width != width || self.green.height != height || self.blue.width != width || self.blue.height != height {
            return Err(AcqError::FilesystemError(
                "RGB composite bands have mismatched frame dimensions".into(),
            ));
        }

        match (&self.red.pixels, &self.green.pixels, &self.blue.pixels) {
            (PixelBuffer::U16(r), PixelBuffer::U16(g), PixelBuffer::U16(b)) => {
                let mut interleaved = Vec::with_capacity(r.len() * 3);
                for i in 0..r.len() {
                    interleaved.push(r[i]);
                    interleaved.push(g[i]);
                    interleaved.push(b[i]);
                }
                let buffer = image::ImageBuffer::<image::Rgb<u16>, Vec<u16>>::from_raw(width, height, interleaved)
                    .ok_or_else(|| AcqError::FilesystemError("pixel buffer does not match frame dimensions".into()))?;
                buffer
                    .save(self.output_path("tiff"))
                    .map_err(|e| AcqError::FilesystemError(e.to_string()))
            }
            (PixelBuffer::U8(r), PixelBuffer::U8(g), PixelBuffer::U8(b)) => {
                let mut interleaved = Vec::with_capacity(r.len() * 3);
                for i in 0..r.len() {
                    interleaved.push(r[i]);
                    interleaved.push(g[i]);
                    interleaved.push(b[i]);
                }
                let buffer = image::RgbImage::from_raw(width, height, interleaved)
                    .ok_or_else(|| AcqError::FilesystemError("pixel buffer does not match frame dimensions".into()))?;
                buffer
                    .save(self.output_path("png"))
                    .map_err(|e| AcqError::FilesystemError(e.to_string()))
            }
            _ => Err(AcqError::FilesystemError(
                "RGB composite bands must share one native pixel depth (U8 or U16)".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChannelMode, ImageMetadata, Position};
    use chrono::Utc;
    use std::path::PathBuf;

    fn sample_capture_info(save_directory: PathBuf) -> CaptureInfo {
        CaptureInfo {
            position: Position::new(0.0, 0.0, 0.0),
            z_index: 0,
            capture_time: Utc::now(),
            z_piezo_um: None,
            configuration: ChannelMode::new("BF", 20.0),
            configuration_idx: 0,
            region_id: "A1".into(),
            fov: 0,
            time_point: 0,
            file_id: "A1_0000_0000".into(),
            save_directory,
            total_time_points: 1,
            total_z_levels: 1,
            total_channels: 1,
            channel_names: vec!["BF".into()],
            physical_size_x_um: 0.325,
            physical_size_y_um: 0.325,
            physical_size_z_um: 1.0,
            time_increment_s: 0.0,
        }
    }

    #[test]
    fn writes_png_for_u8_frame() {
        let dir = tempfile::tempdir().unwrap();
        let info = sample_capture_info(dir.path().to_path_buf());
        let image = Arc::new(JobImage {
            width: 4,
            height: 4,
            pixels: PixelBuffer::U8(vec![128; 16]),
            metadata: ImageMetadata::default(),
        });
        let job = SaveImageJob::new(info.clone(), image, ImageFormat::Png);
        job.run().unwrap();
        assert!(dir.path().join(info.output_filename("png")).exists());
    }

    #[test]
    fn writes_tiff_for_u16_frame() {
        let dir = tempfile::tempdir().unwrap();
        let info = sample_capture_info(dir.path().to_path_buf());
        let image = Arc::new(JobImage {
            width: 4,
            height: 4,
            pixels: PixelBuffer::U16(vec![1000; 16]),
            metadata: ImageMetadata::default(),
        });
        let job = SaveImageJob::new(info.clone(), image, ImageFormat::Tiff);
        job.run().unwrap();
        assert!(dir.path().join(info.output_filename("tiff")).exists());
    }

    #[test]
    fn composite_writes_png_for_u8_bands() {
        let dir = tempfile::tempdir().unwrap();
        let mut info = sample_capture_info(dir.path().to_path_buf());
        info.configuration = ChannelMode::new("BF LED matrix full_RGB", 20.0);
        let band = |value: u8| {
            Arc::new(JobImage {
                width: 4,
                height: 4,
                pixels: PixelBuffer::U8(vec![value; 16]),
                metadata: ImageMetadata::default(),
            })
        };
        let job = SaveCompositeImageJob::new(info.clone(), band(10), band(20), band(30));
        job.run().unwrap();
        assert!(dir.path().join(info.output_filename("png")).exists());
    }

    #[test]
    fn composite_rejects_mismatched_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let info = sample_capture_info(dir.path().to_path_buf());
        let red = Arc::new(JobImage {
            width: 4,
            height: 4,
            pixels: PixelBuffer::U8(vec![10; 16]),
            metadata: ImageMetadata::default(),
        });
        let green = Arc::new(JobImage {
            width: 2,
            height: 2,
            pixels: PixelBuffer::U8(vec![20; 4]),
            metadata: ImageMetadata::default(),
        });
        let blue = red.clone();
        let job = SaveCompositeImageJob::new(info, red, green, blue);
        assert!(job.run().is_err());
    }
}
