//! Object detection with a YOLOv8 ONNX model.
//!
use std::path::Path;

use common::protocol::{BoxXywh, ConeDetection};
use image::RgbImage;
use ndarray::s;
use thiserror::Error;
use tract_onnx::prelude::*;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Number of leading rows of the YOLOv8 output holding the box (cx, cy, w, h).
const BOX_ROWS: usize = 4;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model not loaded")]
    NotLoaded,
    #[error("unexpected model output shape {0:?}")]
    ShapeMismatch(Vec<usize>),
    #[error("model execution failed: {0}")]
    Execution(String),
}

impl From<TractError> for InferenceError {
    fn from(e: TractError) -> Self {
        InferenceError::Execution(format!("{e:#}"))
    }
}

/// A detected object in model input coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: String,
    pub score: f32,
    pub bbox: BoxXywh,
}

impl Detection {
    pub fn to_wire(&self) -> ConeDetection {
        ConeDetection {
            class_name: self.class_name.clone(),
            score: self.score,
            bbox: self.bbox,
        }
    }
}

/// Turns a frame into detections.
pub trait InferModel: Send + Sync {
    /// Expected input shape `[1, height, width, 3]`.
    fn input_shape(&self) -> [usize; 4];

    fn run(&self, frame: &RgbImage) -> Result<Vec<Detection>, InferenceError>;
}

#[derive(Clone, Debug)]
pub struct YoloParams {
    pub width: u32,
    pub height: u32,
    pub min_confidence: f32,
    pub max_iou: f32,
    pub max_detections: usize,
    pub class_names: Vec<String>,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            width: 640,
            height: 640,
            min_confidence: 0.25,
            max_iou: 0.45,
            max_detections: 100,
            class_names: vec!["cone".into()],
        }
    }
}

pub struct YoloModel {
    model: NnModel,
    params: YoloParams,
}

impl YoloModel {
    pub fn load(path: impl AsRef<Path>, params: YoloParams) -> Result<Self, InferenceError> {
        let input_fact = InferenceFact::dt_shape(
            f32::datum_type(),
            tvec!(1, 3, params.height as usize, params.width as usize),
        );
        let model = tract_onnx::onnx()
            .model_for_path(path)?
            .with_input_fact(0, input_fact)?
            .into_optimized()?
            .into_runnable()?;

        Ok(Self { model, params })
    }

    /// Run the model once on a blank input so the first real frame is not slowed down.
    pub fn warm_up(&self) -> Result<(), InferenceError> {
        let blank = RgbImage::new(self.params.width, self.params.height);
        self.run(&blank).map(|_| ())
    }

    fn preproc(&self, frame: &RgbImage) -> Tensor {
        let resized: RgbImage = image::imageops::resize(
            frame,
            self.params.width,
            self.params.height,
            image::imageops::FilterType::Triangle,
        );

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.params.height as usize, self.params.width as usize),
            |(_, c, y, x)| resized[(x as _, y as _)][c] as f32 / 255.0,
        )
        .into()
    }

    /// Decode the raw `[1, 4 + classes, anchors]` output.
    ///
    /// Every anchor column holds the box centre, width and height followed by
    /// one score per class. Only the best class of an anchor is kept.
    fn postproc(&self, output: &Tensor) -> Result<Vec<Detection>, InferenceError> {
        let shape = output.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= BOX_ROWS {
            return Err(InferenceError::ShapeMismatch(shape));
        }

        let output = output.to_array_view::<f32>()?;
        let output = output.slice(s![0, .., ..]);

        let candidates: Vec<Detection> = output
            .columns()
            .into_iter()
            .filter_map(|anchor| {
                let (class_id, score) = anchor
                    .iter()
                    .skip(BOX_ROWS)
                    .copied()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(&b.1))?;
                if score < self.params.min_confidence {
                    return None;
                }

                let (cx, cy, w, h) = (anchor[0], anchor[1], anchor[2], anchor[3]);
                Some(Detection {
                    class_id,
                    class_name: self.class_name(class_id),
                    score,
                    bbox: BoxXywh {
                        x: cx - w / 2.0,
                        y: cy - h / 2.0,
                        w,
                        h,
                    },
                })
            })
            .collect();

        Ok(non_maximum_suppression(
            candidates,
            self.params.max_iou,
            self.params.max_detections,
        ))
    }

    fn class_name(&self, class_id: usize) -> String {
        self.params
            .class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }
}

impl InferModel for YoloModel {
    fn input_shape(&self) -> [usize; 4] {
        [1, self.params.height as usize, self.params.width as usize, 3]
    }

    fn run(&self, frame: &RgbImage) -> Result<Vec<Detection>, InferenceError> {
        let input = tvec!(self.preproc(frame).into());
        let raw_nn_out = self.model.run(input)?;
        let output = raw_nn_out
            .first()
            .ok_or_else(|| InferenceError::Execution("model produced no output".into()))?;

        self.postproc(output)
    }
}

/// Run class-aware non-maximum-suppression on candidate detections.
///
/// Candidates are visited in the order of sinking score. A candidate is kept
/// when its IoU with every kept detection of the same class is at most
/// `max_iou`. At most `max_detections` are returned.
pub fn non_maximum_suppression(
    mut candidates: Vec<Detection>,
    max_iou: f32,
    max_detections: usize,
) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut selected: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if selected.len() >= max_detections {
            break;
        }

        let overlaps = selected.iter().any(|kept| {
            kept.class_id == candidate.class_id && iou(&kept.bbox, &candidate.bbox) > max_iou
        });
        if !overlaps {
            selected.push(candidate);
        }
    }

    selected
}

/// Calculate the intersection-over-union metric for two boxes.
pub fn iou(a: &BoxXywh, b: &BoxXywh) -> f32 {
    // Without overlap the width or height of the intersection is negative and the area is zero.
    let overlap_w = f32::min(a.x + a.w, b.x + b.w) - f32::max(a.x, b.x);
    let overlap_h = f32::min(a.y + a.h, b.y + b.h) - f32::max(a.y, b.y);
    let overlap_area = overlap_w.max(0.0) * overlap_h.max(0.0);

    overlap_area / (area(a) + area(b) - overlap_area + EPS)
}

fn area(bbox: &BoxXywh) -> f32 {
    bbox.w.max(0.0) * bbox.h.max(0.0)
}

#[cfg(test)]
mod test {

    use super::*;

    fn detection(class_id: usize, score: f32, x: f32, y: f32) -> Detection {
        Detection {
            class_id,
            class_name: format!("class_{class_id}"),
            score,
            bbox: BoxXywh {
                x,
                y,
                w: 10.0,
                h: 10.0,
            },
        }
    }

    #[test]
    fn test_iou() {
        let a = BoxXywh {
            x: 0.0,
            y: 0.0,
            w: 10.0,
            h: 10.0,
        };
        let b = BoxXywh {
            x: 5.0,
            y: 0.0,
            w: 10.0,
            h: 10.0,
        };
        let far = BoxXywh {
            x: 50.0,
            y: 50.0,
            w: 10.0,
            h: 10.0,
        };

        assert!((iou(&a, &a) - 1.0).abs() < 1e-4);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-4);
        assert_eq!(iou(&a, &far), 0.0);
    }

    #[test]
    fn test_nms_keeps_most_confident_of_overlapping() {
        let candidates = vec![
            detection(0, 0.6, 1.0, 1.0),
            detection(0, 0.9, 0.0, 0.0),
            detection(0, 0.7, 40.0, 40.0),
        ];

        let selected = non_maximum_suppression(candidates, 0.45, 100);

        let scores: Vec<f32> = selected.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_is_class_aware_and_capped() {
        let candidates = vec![
            detection(0, 0.9, 0.0, 0.0),
            detection(1, 0.8, 0.0, 0.0),
            detection(2, 0.7, 0.0, 0.0),
        ];

        assert_eq!(non_maximum_suppression(candidates.clone(), 0.45, 100).len(), 3);
        assert_eq!(non_maximum_suppression(candidates, 0.45, 2).len(), 2);
    }

    #[test]
    fn test_to_wire() {
        let wire = detection(0, 0.5, 1.0, 2.0).to_wire();
        assert_eq!(wire.class_name, "class_0");
        assert_eq!(wire.bbox.y, 2.0);
    }
}
