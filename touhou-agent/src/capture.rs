use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ql::ml_model::model::ModelInput;

use crate::device::{PixelSource, ScreenRegion};

pub type GrayFrame = ImageBuffer<Luma<u8>, Vec<u8>>;

/// One grayscale frame of the game screen, already scaled down to the observation size
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    frame: GrayFrame,
}

impl Observation {
    pub fn new(frame: GrayFrame) -> Self { Self { frame } }

    pub fn frame(&self) -> &GrayFrame { &self.frame }

    pub fn width(&self) -> u32 { self.frame.width() }

    pub fn height(&self) -> u32 { self.frame.height() }
}

impl ModelInput for Observation {
    fn dims(&self) -> [usize; 3] { [1, self.frame.height() as usize, self.frame.width() as usize] }

    fn write_features(
        &self,
        out: &mut Vec<f32>,
    ) {
        out.extend(self.frame.as_raw().iter().map(|&p| p as f32 / 255.0))
    }
}

/// Grabs the game region from a [PixelSource] and turns it into an [Observation]
pub struct ObservationCapture {
    source: Box<dyn PixelSource>,
    region: ScreenRegion,
    width: u32,
    height: u32,
}

impl ObservationCapture {
    pub fn new(
        source: Box<dyn PixelSource>,
        region: ScreenRegion,
        width: u32,
        height: u32,
    ) -> Self {
        assert!(width > 0 && height > 0);
        Self { source, region, width, height }
    }

    pub fn observation_size(&self) -> (u32, u32) { (self.width, self.height) }

    /// Always the freshest frame; nothing is buffered
    pub fn capture(&mut self) -> Result<Observation> {
        let screen = self
            .source
            .grab(&self.region)
            .with_context(|| format!("failed to grab screen region {:?}", self.region))?;
        let gray: GrayFrame = imageops::grayscale(&screen);
        Ok(Observation::new(resize_to(gray, self.width, self.height)))
    }
}

/// Bilinear resize; a no-op for frames already having the requested size
pub fn resize_to(
    frame: GrayFrame,
    width: u32,
    height: u32,
) -> GrayFrame {
    if frame.dimensions() == (width, height) {
        frame
    } else {
        imageops::resize(&frame, width, height, FilterType::Triangle)
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use crate::mock::ScriptedPixelSource;

    use super::*;

    fn region() -> ScreenRegion { ScreenRegion { top: 0, left: 0, width: 64, height: 48 } }

    #[test]
    fn test_capture_converts_and_resizes() {
        let source = ScriptedPixelSource::new(|_| RgbaImage::from_pixel(64, 48, Rgba([255, 255, 255, 255])));
        let mut capture = ObservationCapture::new(Box::new(source), region(), 32, 16);

        let observation = capture.capture().unwrap();
        assert_eq!((observation.width(), observation.height()), (32, 16));
        assert_eq!(observation.dims(), [1, 16, 32]);
        assert!(observation.frame().pixels().all(|p| p.0[0] >= 254));
    }

    #[test]
    fn test_capture_returns_freshest_frame() {
        let source = ScriptedPixelSource::new(|n| RgbaImage::from_pixel(8, 8, Rgba([n as u8 * 10, n as u8 * 10, n as u8 * 10, 255])));
        let grabs = source.grab_counter();
        let mut capture = ObservationCapture::new(Box::new(source), region(), 8, 8);

        capture.capture().unwrap();
        let second = capture.capture().unwrap();
        assert_eq!(second.frame().get_pixel(3, 3).0[0], 10);
        assert_eq!(grabs.get(), 2);
    }

    #[test]
    fn test_features_are_scaled() {
        let mut frame = GrayFrame::new(2, 1);
        frame.put_pixel(1, 0, Luma([255]));
        let mut features = vec![];
        Observation::new(frame).write_features(&mut features);
        assert_eq!(features, vec![0.0, 1.0]);
    }

    #[test]
    fn test_resize_skipped_for_matching_size() {
        let mut frame = GrayFrame::new(4, 4);
        frame.put_pixel(0, 0, Luma([7]));
        assert_eq!(resize_to(frame.clone(), 4, 4), frame);
    }
}
