//! Job inputs and outputs on disk
//!
//! PNG textures in, PNG stills and raw planar `.yuv` animations out, plus the
//! text report for compute jobs.

use shader_engine::gpu::FrameStats;
use shader_engine::jobs::{FrameSink, JobError, Progress, TextureInput};
use shader_engine::output::{OutputKind, OutputStorage};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Load an image file as an RGBA8 texture
pub fn load_texture<P: AsRef<Path>>(path: P) -> Result<TextureInput, String> {
    let path = path.as_ref();
    log::debug!("Loading image from: {:?}", path);

    let img = image::open(path).map_err(|e| format!("Failed to load image {:?}: {}", path, e))?;
    let rgba_img = img.to_rgba8();
    let (width, height) = rgba_img.dimensions();

    log::info!("Loaded image {}x{} from {:?}", width, height, path);
    Ok(TextureInput {
        width,
        height,
        rgba: rgba_img.into_raw(),
    })
}

/// Write top-to-bottom RGBA8 pixels as a PNG
pub fn save_png<P: AsRef<Path>>(path: P, width: u32, height: u32, rgba: &[u8]) -> Result<(), String> {
    let path = path.as_ref();
    create_parent(path)?;
    image::save_buffer(path, rgba, width, height, image::ExtendedColorType::Rgba8)
        .map_err(|e| format!("Failed to write {:?}: {}", path, e))?;
    log::info!("Wrote {}x{} PNG to {:?}", width, height, path);
    Ok(())
}

/// Write the compute report: the requested interpretation, then all of them
pub fn save_report<P: AsRef<Path>>(path: P, output: &OutputStorage, kind: OutputKind) -> Result<(), String> {
    let path = path.as_ref();
    create_parent(path)?;
    std::fs::write(path, format_report(output, kind)).map_err(|e| format!("Failed to write {:?}: {}", path, e))
}

fn format_report(output: &OutputStorage, kind: OutputKind) -> String {
    format!("requested: {:?}\n{}\n", output.decode(kind), output.report())
}

fn create_parent(path: &Path) -> Result<(), String> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create {:?}: {}", parent, e)),
        _ => Ok(()),
    }
}

/// Appends planar frames to a raw `.yuv` file
pub struct YuvFileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    frames: u32,
}

impl YuvFileSink {
    /// Create (or truncate) `path`
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref().to_path_buf();
        create_parent(&path)?;
        let file = File::create(&path).map_err(|e| format!("Failed to create {:?}: {}", path, e))?;
        Ok(Self { path, writer: BufWriter::new(file), frames: 0 })
    }

    /// Flush buffered frames to disk
    pub fn finish(mut self) -> Result<u32, String> {
        self.writer.flush().map_err(|e| format!("Failed to write {:?}: {}", self.path, e))?;
        log::info!("Wrote {} planar frames to {:?}", self.frames, self.path);
        Ok(self.frames)
    }
}

impl FrameSink for YuvFileSink {
    fn frame(&mut self, index: u32, planes: &[u8], stats: FrameStats) -> Result<(), JobError> {
        self.writer
            .write_all(planes)
            .map_err(|e| JobError::Sink(format!("{:?}: {}", self.path, e)))?;
        self.frames += 1;
        log::debug!("Frame {} written ({:?} GPU wait)", index, stats.gpu_wait);
        Ok(())
    }

    fn progress(&mut self, progress: Progress) {
        log::info!("Rendering frame {}/{} ({:.0}%)", progress.frame, progress.frames, progress.percent());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("red.png");
        let pixels: Vec<u8> = [255, 0, 0, 255].repeat(6);

        save_png(&path, 3, 2, &pixels).unwrap();
        let texture = load_texture(&path).unwrap();
        assert_eq!((texture.width, texture.height), (3, 2));
        assert_eq!(texture.rgba, pixels);
    }

    #[test]
    fn test_missing_texture_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_texture(dir.path().join("absent.png")).is_err());
    }

    #[test]
    fn test_yuv_sink_concatenates_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.yuv");

        let mut sink = YuvFileSink::create(&path).unwrap();
        sink.frame(0, &[1, 2, 3], FrameStats::default()).unwrap();
        sink.frame(1, &[4, 5, 6], FrameStats::default()).unwrap();
        assert_eq!(sink.finish().unwrap(), 2);

        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_report_leads_with_requested_value() {
        let mut bytes = [0u8; 64];
        bytes[..4].copy_from_slice(&7i32.to_ne_bytes());
        let output = OutputStorage::from_bytes(&bytes);

        let report = format_report(&output, OutputKind::Int);
        assert!(report.starts_with("requested: Int(7)"));
        assert!(report.contains("int  : 7"));
    }
}
