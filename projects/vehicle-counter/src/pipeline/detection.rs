use crate::error::{CountError, Result};
use crate::pipeline::types::{BBox, Detection, VehicleClass};
use image::{DynamicImage, ImageBuffer, Rgb};
use opencv::core::Mat;
use opencv::prelude::*;
use usls::models::RTDETR;
use usls::{Config, Image};

/// Object detector contract: one call per frame, candidates in pixel
/// coordinates of the input frame.
pub trait Detector: Send {
    fn infer(&mut self, frame: &Mat) -> Result<Vec<Detection>>;
}

/// A wrapper around the USLS RT-DETR model that handles BGR-to-RGB conversion
/// and corrects for aspect-ratio padding bugs in the underlying model library.
pub struct ObjectDetector {
    model: RTDETR,
    /// Detector class id -> vehicle class, built once from the label table.
    class_table: Vec<Option<VehicleClass>>,
}

impl ObjectDetector {
    /// Create a new detector with the given model path.
    pub fn new(model_path: &str) -> Result<Self> {
        let config = Config::default()
            .with_model_file(model_path)
            .with_class_names(&usls::NAMES_COCO_80);

        #[cfg(target_os = "macos")]
        let config = config.with_model_device(usls::Device::CoreMl);

        let config = config
            .commit()
            .map_err(|e| CountError::DetectorFailure(format!("model config: {}", e)))?;
        let model = RTDETR::new(config).map_err(|e| {
            CountError::DetectorFailure(format!("failed to load model {}: {}", model_path, e))
        })?;

        tracing::info!("Loaded detector model {}", model_path);

        Ok(Self {
            model,
            class_table: class_table(&usls::NAMES_COCO_80),
        })
    }

    fn resolve_class(&self, hbb: &usls::Hbb) -> Option<VehicleClass> {
        match hbb.id() {
            Some(id) => self.class_table.get(id).copied().flatten(),
            None => hbb.name().and_then(VehicleClass::from_label),
        }
    }
}

impl Detector for ObjectDetector {
    fn infer(&mut self, frame: &Mat) -> Result<Vec<Detection>> {
        let dynamic_image = mat_to_dynamic_image(frame)?;

        // Correction calculations (USLS RT-DETR bug workaround)
        let size = frame.size()?;
        let img_w = size.width as f32;
        let img_h = size.height as f32;
        let (x_corr, y_corr) = if img_w > img_h {
            (img_w / img_h, 1.0)
        } else if img_h > img_w {
            (1.0, img_h / img_w)
        } else {
            (1.0, 1.0)
        };

        let results = self
            .model
            .forward(&[Image::from(dynamic_image)])
            .map_err(|e| CountError::DetectorFailure(e.to_string()))?;

        let detections = results
            .into_iter()
            .next()
            .map(|y| {
                y.hbbs
                    .iter()
                    .map(|hbb| {
                        let x = hbb.xmin() * x_corr;
                        let w = hbb.width() * x_corr;
                        let y_coord = hbb.ymin() * y_corr;
                        let h = hbb.height() * y_corr;
                        Detection {
                            bbox: BBox::new(
                                x as i32,
                                y_coord as i32,
                                (x + w) as i32,
                                (y_coord + h) as i32,
                            ),
                            class: self.resolve_class(hbb),
                            confidence: hbb.confidence().unwrap_or(0.0),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(detections)
    }
}

fn class_table(names: &[&str]) -> Vec<Option<VehicleClass>> {
    names.iter().map(|n| VehicleClass::from_label(n)).collect()
}

/// Convert an OpenCV Mat (BGR) to an image::DynamicImage (RGB)
fn mat_to_dynamic_image(mat: &Mat) -> Result<DynamicImage> {
    let mut rgb_mat = Mat::default();
    opencv::imgproc::cvt_color_def(mat, &mut rgb_mat, opencv::imgproc::COLOR_BGR2RGB)?;

    let size = rgb_mat.size()?;
    let width = size.width as u32;
    let height = size.height as u32;

    if !rgb_mat.is_continuous() {
        return Err(CountError::DetectorFailure("Mat is not continuous".into()));
    }

    let buffer = rgb_mat.data_bytes()?.to_vec();

    let img_buffer = ImageBuffer::<Rgb<u8>, _>::from_vec(width, height, buffer).ok_or_else(|| {
        CountError::DetectorFailure("Failed to create ImageBuffer from Mat data".into())
    })?;

    Ok(DynamicImage::ImageRgb8(img_buffer))
}
