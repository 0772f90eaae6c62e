//! Face alignment and embedding extraction.

use image::{imageops, DynamicImage, GenericImageView};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

use crate::detect::{bgr_planes, Detection};
use crate::engine::ExtractError;

/// Encoder input edge length and the ArcFace reference frame it implies.
const ALIGN_SIZE: u32 = 112;
const REF_LEFT_EYE: (f32, f32) = (38.3, 51.7);
const REF_RIGHT_EYE: (f32, f32) = (73.5, 51.5);

/// L2-normalized face embedding.
#[derive(Debug, Clone)]
pub struct Embedding {
    vector: Array1<f32>,
}

impl Embedding {
    /// Wrap an already-normalized vector, e.g. one read back from a cache.
    pub fn from_raw(vector: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(vector),
        }
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        self.vector.as_slice().unwrap_or(&[])
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.to_vec()
    }
}

/// Crop and rotate the detected face onto the 112x112 reference frame,
/// using a similarity transform that maps the detected eye landmarks onto
/// the reference eye positions. Bilinear sampling; out-of-bounds pixels
/// stay black.
pub fn align(img: &DynamicImage, detection: &Detection) -> Result<DynamicImage, ExtractError> {
    // landmarks: [left_eye_x, left_eye_y, right_eye_x, right_eye_y, nose, ...]
    let left_eye = (detection.landmarks[0], detection.landmarks[1]);
    let right_eye = (detection.landmarks[2], detection.landmarks[3]);

    let eye_dx = right_eye.0 - left_eye.0;
    let eye_dy = right_eye.1 - left_eye.1;
    let eye_dist = (eye_dx * eye_dx + eye_dy * eye_dy).sqrt();
    if eye_dist < 1.0 {
        return Err(ExtractError::Output(
            "degenerate eye landmarks, cannot align face".into(),
        ));
    }

    let angle = eye_dy.atan2(eye_dx);
    let ref_dist = ((REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).powi(2)
        + (REF_RIGHT_EYE.1 - REF_LEFT_EYE.1).powi(2))
    .sqrt();
    let scale = ref_dist / eye_dist;

    let eye_center = (
        (left_eye.0 + right_eye.0) / 2.0,
        (left_eye.1 + right_eye.1) / 2.0,
    );
    let ref_center = (
        (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0,
        (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0,
    );

    // Affine matrix [a b tx; c d ty]: rotate by the eye angle, scale to the
    // reference eye distance, translate the eye center onto the reference.
    let a = scale * angle.cos();
    let b = scale * angle.sin();
    let c = -b;
    let d = a;
    let tx = ref_center.0 - (a * eye_center.0 + b * eye_center.1);
    let ty = ref_center.1 - (c * eye_center.0 + d * eye_center.1);

    // det = a*d - b*c = scale^2, nonzero by the eye_dist guard above
    let det = a * d - b * c;

    let (img_w, img_h) = img.dimensions();
    let mut output = image::RgbImage::new(ALIGN_SIZE, ALIGN_SIZE);

    for out_y in 0..ALIGN_SIZE {
        for out_x in 0..ALIGN_SIZE {
            // Invert the transform to find the source pixel
            let tmp_x = out_x as f32 - tx;
            let tmp_y = out_y as f32 - ty;
            let in_x = (d * tmp_x - b * tmp_y) / det;
            let in_y = (-c * tmp_x + a * tmp_y) / det;

            if in_x < 0.0 || in_x >= img_w as f32 || in_y < 0.0 || in_y >= img_h as f32 {
                continue;
            }

            let x0 = in_x.floor() as u32;
            let y0 = in_y.floor() as u32;
            let x1 = (x0 + 1).min(img_w - 1);
            let y1 = (y0 + 1).min(img_h - 1);
            let fx = in_x - x0 as f32;
            let fy = in_y - y0 as f32;

            let p00 = img.get_pixel(x0, y0);
            let p10 = img.get_pixel(x1, y0);
            let p01 = img.get_pixel(x0, y1);
            let p11 = img.get_pixel(x1, y1);

            let w00 = (1.0 - fx) * (1.0 - fy);
            let w10 = fx * (1.0 - fy);
            let w01 = (1.0 - fx) * fy;
            let w11 = fx * fy;

            let r = (p00[0] as f32 * w00
                + p10[0] as f32 * w10
                + p01[0] as f32 * w01
                + p11[0] as f32 * w11) as u8;
            let g = (p00[1] as f32 * w00
                + p10[1] as f32 * w10
                + p01[1] as f32 * w01
                + p11[1] as f32 * w11) as u8;
            let b_val = (p00[2] as f32 * w00
                + p10[2] as f32 * w10
                + p01[2] as f32 * w01
                + p11[2] as f32 * w11) as u8;

            output.put_pixel(out_x, out_y, image::Rgb([r, g, b_val]));
        }
    }

    Ok(DynamicImage::ImageRgb8(output))
}

/// Encode an aligned face crop into an L2-normalized embedding.
pub fn encode(session: &mut Session, face: &DynamicImage) -> Result<Embedding, ExtractError> {
    let rgb = face
        .resize_exact(ALIGN_SIZE, ALIGN_SIZE, imageops::FilterType::Triangle)
        .to_rgb8();
    let planes = bgr_planes(&rgb);

    let input = Array4::from_shape_vec((1, 3, ALIGN_SIZE as usize, ALIGN_SIZE as usize), planes)
        .map_err(|err| ExtractError::Output(err.to_string()))?;
    let tensor = Value::from_array(input).map_err(ExtractError::from_ort)?;

    let outputs = session
        .run(ort::inputs![tensor])
        .map_err(ExtractError::from_ort)?;
    let (shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(ExtractError::from_ort)?;

    // Expecting shape [1, N]
    let dim = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if dim == 0 || data.len() < dim {
        return Err(ExtractError::Output(format!(
            "encoder produced {} values for claimed dimension {dim}",
            data.len()
        )));
    }

    let mut vector: Vec<f32> = data[..dim].to_vec();
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }

    Ok(Embedding::from_raw(vector))
}

/// Cosine distance between two normalized embeddings: 1 - dot, in [0, 2].
/// Lower is more similar.
pub fn cosine_distance(a: &Embedding, b: &Embedding) -> f32 {
    let dot: f32 = a
        .as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(x, y)| x * y)
        .sum();
    (1.0 - dot).clamp(0.0, 2.0)
}
