//! YuNet-style anchor-free face detection.
//!
//! The detector predicts directly from grid locations at strides 8, 16 and
//! 32. For each stride it outputs classification scores, objectness scores,
//! bbox deltas (dx, dy, dw, dh) and 5-point landmark deltas, in that order:
//! cls_8, cls_16, cls_32, obj_8, ..., kps_32. Decoding is grid-based:
//!
//!   cx = (grid_x + dx) * stride / input_size
//!   cy = (grid_y + dy) * stride / input_size
//!   w  = dw * stride / input_size
//!   h  = dh * stride / input_size

use image::{imageops, DynamicImage, GenericImageView, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};

use crate::engine::ExtractError;

const INPUT_SIZE: u32 = 640;
const STRIDES: [usize; 3] = [8, 16, 32];

/// A detected face in original-image pixel coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

/// A decoded detection in coordinates normalized to the letterboxed canvas.
#[derive(Debug, Clone)]
struct RawDetection {
    bbox: [f32; 4],
    score: f32,
    landmarks: [f32; 10],
}

struct Letterbox {
    scale: f32,
    offset_x: u32,
    offset_y: u32,
}

/// Run the detector over an image and return all faces above
/// `score_threshold`, NMS-suppressed at `nms_threshold`.
pub fn detect(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>, ExtractError> {
    let (canvas, letterbox) = letterbox(img);
    let planes = bgr_planes(&canvas);

    let input = Array4::from_shape_vec(
        (1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize),
        planes,
    )
    .map_err(|err| ExtractError::Output(err.to_string()))?;
    let tensor = Value::from_array(input).map_err(ExtractError::from_ort)?;

    let outputs = session
        .run(ort::inputs![tensor])
        .map_err(ExtractError::from_ort)?;

    let mut raw_outputs: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, value) in outputs.iter() {
        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .map_err(ExtractError::from_ort)?;
        raw_outputs.push((shape.iter().copied().collect(), data.to_vec()));
    }

    let mut detections: Vec<Detection> = decode_grid(&raw_outputs, score_threshold)?
        .into_iter()
        .map(|d| to_image_coords(d, &letterbox))
        .collect();

    if nms_threshold < 1.0 {
        detections = nms(detections, nms_threshold);
    }

    Ok(detections)
}

/// Pad the image into a square canvas so the fixed 640x640 detector input
/// does not distort aspect ratio.
fn letterbox(img: &DynamicImage) -> (RgbImage, Letterbox) {
    let (orig_width, orig_height) = img.dimensions();
    let scale = INPUT_SIZE as f32 / orig_width.max(orig_height) as f32;
    let new_width = (orig_width as f32 * scale) as u32;
    let new_height = (orig_height as f32 * scale) as u32;

    let resized = img.resize_exact(new_width, new_height, imageops::FilterType::Triangle);

    let mut canvas = DynamicImage::new_rgb8(INPUT_SIZE, INPUT_SIZE);
    let offset_x = (INPUT_SIZE - new_width) / 2;
    let offset_y = (INPUT_SIZE - new_height) / 2;
    imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

    (
        canvas.to_rgb8(),
        Letterbox {
            scale,
            offset_x,
            offset_y,
        },
    )
}

/// CHW planes in BGR channel order with values in [0, 255], the layout both
/// models expect.
pub(crate) fn bgr_planes(img: &RgbImage) -> Vec<f32> {
    let pixel_count = (img.width() * img.height()) as usize;
    let mut planes = vec![0f32; 3 * pixel_count];
    let (b_channel, rest) = planes.split_at_mut(pixel_count);
    let (g_channel, r_channel) = rest.split_at_mut(pixel_count);

    for (i, px) in img.pixels().enumerate() {
        r_channel[i] = px[0] as f32;
        g_channel[i] = px[1] as f32;
        b_channel[i] = px[2] as f32;
    }
    planes
}

fn plane<'a>(
    outputs: &'a [(Vec<i64>, Vec<f32>)],
    index: usize,
    locations: usize,
    width: usize,
) -> Result<&'a [f32], ExtractError> {
    let (shape, data) = outputs
        .get(index)
        .ok_or_else(|| ExtractError::Output(format!("missing detector output {index}")))?;
    if *shape != [1, locations as i64, width as i64] {
        return Err(ExtractError::Output(format!(
            "detector output {index} has shape {shape:?}, expected [1, {locations}, {width}]"
        )));
    }
    Ok(data.as_slice())
}

fn decode_grid(
    outputs: &[(Vec<i64>, Vec<f32>)],
    score_threshold: f32,
) -> Result<Vec<RawDetection>, ExtractError> {
    let input = INPUT_SIZE as usize;
    let mut detections = Vec::new();

    for (scale_idx, &stride) in STRIDES.iter().enumerate() {
        let grid = input / stride;
        let locations = grid * grid;

        let cls = plane(outputs, scale_idx, locations, 1)?;
        let obj = plane(outputs, scale_idx + 3, locations, 1)?;
        let boxes = plane(outputs, scale_idx + 6, locations, 4)?;
        let kps = plane(outputs, scale_idx + 9, locations, 10)?;

        for row in 0..grid {
            for col in 0..grid {
                let idx = row * grid + col;
                let score = sigmoid(cls[idx] * obj[idx]);
                if score < score_threshold {
                    continue;
                }

                let dx = boxes[idx * 4];
                let dy = boxes[idx * 4 + 1];
                let dw = boxes[idx * 4 + 2];
                let dh = boxes[idx * 4 + 3];

                let cx = (col as f32 + dx) * stride as f32 / input as f32;
                let cy = (row as f32 + dy) * stride as f32 / input as f32;
                let w = dw * stride as f32 / input as f32;
                let h = dh * stride as f32 / input as f32;

                let mut landmarks = [0f32; 10];
                for k in 0..5 {
                    let lm_dx = kps[idx * 10 + k * 2];
                    let lm_dy = kps[idx * 10 + k * 2 + 1];
                    landmarks[k * 2] = (col as f32 + lm_dx) * stride as f32 / input as f32;
                    landmarks[k * 2 + 1] = (row as f32 + lm_dy) * stride as f32 / input as f32;
                }

                detections.push(RawDetection {
                    bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                    score,
                    landmarks,
                });
            }
        }
    }

    Ok(detections)
}

/// Map normalized canvas coordinates back into original-image pixels,
/// undoing the letterbox scale and padding.
fn to_image_coords(raw: RawDetection, lb: &Letterbox) -> Detection {
    let size = INPUT_SIZE as f32;
    let map_x = |x: f32| (x * size - lb.offset_x as f32) / lb.scale;
    let map_y = |y: f32| (y * size - lb.offset_y as f32) / lb.scale;

    let mut landmarks = [0f32; 10];
    for k in 0..5 {
        landmarks[k * 2] = map_x(raw.landmarks[k * 2]);
        landmarks[k * 2 + 1] = map_y(raw.landmarks[k * 2 + 1]);
    }

    Detection {
        bbox: [
            map_x(raw.bbox[0]),
            map_y(raw.bbox[1]),
            raw.bbox[2] * size / lb.scale,
            raw.bbox[3] * size / lb.scale,
        ],
        score: raw.score,
        landmarks,
    }
}

/// Greedy non-maximum suppression, highest score first.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep
            .iter()
            .all(|kept| iou(&kept.bbox, &det.bbox) <= iou_threshold)
        {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
