//! Rendering of detections on top of the camera frame.
//!
use std::{path::Path, sync::Arc};

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use common::protocol::BoxXywh;
use image::{codecs::jpeg::JpegEncoder, ColorType, ImageResult, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use rusttype::{Font, Scale};
use tokio::sync::broadcast;

use crate::{camera::Frame, nn::Detection};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const JPEG_QUALITY: u8 = 85;

/// A frame with its detections, as last drawn on the canvas.
#[derive(Debug)]
pub struct RenderedFrame {
    pub seq: u64,
    pub jpeg: Bytes,
    pub detections: Vec<Detection>,
}

pub struct Canvas {
    width: u32,
    height: u32,
    font: Option<Font<'static>>,
    tx: broadcast::Sender<Arc<RenderedFrame>>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        let (tx, _rx) = broadcast::channel(4);
        Self {
            width: width.max(1),
            height: height.max(1),
            font: None,
            tx,
        }
    }

    /// Label boxes with class and score using `font`.
    pub fn with_font(mut self, font: Option<Font<'static>>) -> Self {
        self.font = font;
        self
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RenderedFrame>> {
        self.tx.subscribe()
    }

    /// Redraw the canvas from `frame` and publish it.
    ///
    /// `input_shape` is the `[1, height, width, 3]` shape of the model the
    /// detections came from.
    pub fn render(
        &self,
        frame: &Frame,
        detections: Vec<Detection>,
        input_shape: [usize; 4],
    ) -> ImageResult<Arc<RenderedFrame>> {
        let mut canvas: RgbImage = image::imageops::resize(
            frame.image.as_ref(),
            self.width,
            self.height,
            image::imageops::FilterType::Triangle,
        );

        let model_size = (input_shape[2] as f32, input_shape[1] as f32);
        for detection in detections.iter() {
            let rect = match map_to_canvas(&detection.bbox, model_size, (self.width, self.height)) {
                Some(rect) => rect,
                None => continue,
            };

            draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
            if let Some(font) = &self.font {
                draw_text_mut(
                    &mut canvas,
                    BOX_COLOR,
                    rect.left(),
                    (rect.top() - 16).max(0),
                    Scale { x: 16.0, y: 16.0 },
                    font,
                    &format!("{} {:.2}%", detection.class_name, detection.score * 100.0),
                );
            }
        }

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode(
            &canvas,
            self.width,
            self.height,
            ColorType::Rgb8,
        )?;

        let rendered = Arc::new(RenderedFrame {
            seq: frame.seq,
            jpeg: Bytes::from(jpeg),
            detections,
        });
        // No subscribers is fine, nobody is watching the stream.
        self.tx.send(rendered.clone()).ok();

        Ok(rendered)
    }
}

/// Map a box from model input pixels to canvas pixels.
///
/// The box is clipped to the canvas. Boxes entirely outside the canvas give `None`.
pub fn map_to_canvas(bbox: &BoxXywh, model_size: (f32, f32), canvas_size: (u32, u32)) -> Option<Rect> {
    let (model_w, model_h) = model_size;
    if model_w <= 0.0 || model_h <= 0.0 {
        return None;
    }
    let (canvas_w, canvas_h) = (canvas_size.0 as f32, canvas_size.1 as f32);
    let (scale_x, scale_y) = (canvas_w / model_w, canvas_h / model_h);

    // Coordinate frame basis is on the top left corner
    let x_tl = (bbox.x * scale_x).max(0.0);
    let y_tl = (bbox.y * scale_y).max(0.0);
    let x_br = ((bbox.x + bbox.w) * scale_x).min(canvas_w);
    let y_br = ((bbox.y + bbox.h) * scale_y).min(canvas_h);
    if x_br <= x_tl || y_br <= y_tl {
        return None;
    }

    let width = ((x_br - x_tl).round() as u32).max(1);
    let height = ((y_br - y_tl).round() as u32).max(1);
    Some(Rect::at(x_tl.round() as i32, y_tl.round() as i32).of_size(width, height))
}

/// Load a TrueType font for box labels.
pub fn font_from_file(path: &Path) -> Result<Font<'static>> {
    let data = std::fs::read(path).with_context(|| format!("reading font {}", path.display()))?;
    Font::try_from_vec(data).ok_or_else(|| anyhow!("invalid font file {}", path.display()))
}

/// Wrap a JPEG into one part of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}

#[cfg(test)]
mod test {

    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoxXywh {
        BoxXywh { x, y, w, h }
    }

    #[test]
    fn test_map_scales_to_canvas() {
        let rect = map_to_canvas(&bbox(10.0, 20.0, 30.0, 40.0), (640.0, 640.0), (320, 160)).unwrap();
        assert_eq!((rect.left(), rect.top()), (5, 5));
        assert_eq!((rect.width(), rect.height()), (15, 10));
    }

    #[test]
    fn test_map_clips_to_canvas() {
        let rect = map_to_canvas(&bbox(-10.0, -10.0, 30.0, 30.0), (100.0, 100.0), (100, 100)).unwrap();
        assert_eq!((rect.left(), rect.top()), (0, 0));
        assert_eq!((rect.width(), rect.height()), (20, 20));

        assert!(map_to_canvas(&bbox(200.0, 0.0, 10.0, 10.0), (100.0, 100.0), (100, 100)).is_none());
        assert!(map_to_canvas(&bbox(0.0, 0.0, 0.0, 10.0), (100.0, 100.0), (100, 100)).is_none());
    }

    #[test]
    fn test_render_publishes_jpeg() {
        let canvas = Canvas::new(32, 24);
        let mut rx = canvas.subscribe();
        let frame = Frame {
            seq: 7,
            image: Arc::new(RgbImage::new(64, 48)),
        };
        let detections = vec![Detection {
            class_id: 0,
            class_name: "cone".into(),
            score: 0.9,
            bbox: bbox(8.0, 8.0, 16.0, 16.0),
        }];

        let rendered = canvas.render(&frame, detections, [1, 64, 64, 3]).unwrap();

        assert_eq!(rendered.seq, 7);
        assert_eq!(&rendered.jpeg[..2], &[0xFFu8, 0xD8]);
        let decoded = image::load_from_memory(&rendered.jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));

        let published = rx.try_recv().unwrap();
        assert_eq!(published.detections.len(), 1);
    }

    #[test]
    fn test_stream_item_framing() {
        let item = as_jpeg_stream_item(b"jpg");
        assert!(item.starts_with(b"--frame\r\n"));
        assert!(item.ends_with(b"jpg\r\n\r\n"));
    }
}
