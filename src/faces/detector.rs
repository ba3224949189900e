use anyhow::{anyhow, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use super::{FaceEmbedding, FaceEncoder};

/// Pixel-space face box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Face detection model (UltraFace - lightweight and fast)
static DETECTION_MODEL: OnceLock<Mutex<Session>> = OnceLock::new();
/// Face embedding model (ArcFace - generates 512-dim embeddings)
static EMBEDDING_MODEL: OnceLock<Mutex<Session>> = OnceLock::new();

const DETECTION_MODEL_FILE: &str = "ultraface-320.onnx";
const DETECTION_MODEL_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx";
const EMBEDDING_MODEL_FILE: &str = "arcface-resnet100.onnx";
const EMBEDDING_MODEL_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/arcface/model/arcfaceresnet100-11-int8.onnx";

/// Default models directory
pub fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("biocheck")
        .join("models")
}

/// Path of an already downloaded model
fn model_path(models_dir: &Path, filename: &str) -> Result<PathBuf> {
    let model_path = models_dir.join(filename);
    if !model_path.exists() {
        return Err(anyhow!(
            "model missing: {} (run `biocheck fetch-models`)",
            model_path.display()
        ));
    }
    Ok(model_path)
}

/// Download a model file if it doesn't exist
fn download_model(models_dir: &Path, filename: &str, url: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(models_dir)?;
    let model_path = models_dir.join(filename);

    if !model_path.exists() {
        tracing::info!(model = %filename, "Downloading model...");
        let response = ureq::get(url)
            .call()
            .map_err(|e| anyhow!("Failed to download model: {}", e))?;

        let mut file = std::fs::File::create(&model_path)?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
        tracing::info!(model = %filename, path = ?model_path, "Model downloaded");
    }

    Ok(model_path)
}

fn load_session(models_dir: &Path, filename: &str) -> Result<Session> {
    let model_path = model_path(models_dir, filename)?;

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(&model_path)?;

    Ok(session)
}

/// Lock a session, recovering it if an earlier comparison panicked while
/// holding the lock. Sessions carry no per-comparison state.
fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Face encoder backed by UltraFace detection and ArcFace embeddings on
/// ONNX Runtime. Sessions are loaded once per process on first use.
pub struct OnnxFaceEncoder {
    models_dir: PathBuf,
    confidence_threshold: f32,
    nms_threshold: f32,
}

impl OnnxFaceEncoder {
    pub fn new(models_dir: PathBuf) -> Self {
        Self {
            models_dir,
            confidence_threshold: 0.7,
            nms_threshold: 0.3,
        }
    }

    pub fn with_thresholds(mut self, confidence: f32, nms: f32) -> Self {
        self.confidence_threshold = confidence;
        self.nms_threshold = nms;
        self
    }

    /// Download any model file missing from the models directory.
    /// Comparisons never download on their own.
    pub fn fetch_models(&self) -> Result<()> {
        download_model(&self.models_dir, DETECTION_MODEL_FILE, DETECTION_MODEL_URL)?;
        download_model(&self.models_dir, EMBEDDING_MODEL_FILE, EMBEDDING_MODEL_URL)?;
        Ok(())
    }

    pub fn models_present(&self) -> bool {
        [DETECTION_MODEL_FILE, EMBEDDING_MODEL_FILE]
            .iter()
            .all(|f| self.models_dir.join(f).exists())
    }

    /// Load both models now instead of on the first comparison
    pub fn init_models(&self) -> Result<()> {
        if DETECTION_MODEL.get().is_none() {
            let session = load_session(&self.models_dir, DETECTION_MODEL_FILE)?;
            let _ = DETECTION_MODEL.set(Mutex::new(session));
        }
        if EMBEDDING_MODEL.get().is_none() {
            let session = load_session(&self.models_dir, EMBEDDING_MODEL_FILE)?;
            let _ = EMBEDDING_MODEL.set(Mutex::new(session));
        }
        Ok(())
    }

    fn detect_and_embed(&self, img: &DynamicImage) -> Result<Vec<FaceEmbedding>> {
        self.init_models()?;

        let (orig_width, orig_height) = img.dimensions();

        let face_boxes = {
            let mut detection_model = lock_recovering(
                DETECTION_MODEL
                    .get()
                    .ok_or_else(|| anyhow!("Detection model not initialized"))?,
            );
            run_ultraface_detection(&mut *detection_model, img, self.confidence_threshold, self.nms_threshold)?
        };

        if face_boxes.is_empty() {
            return Ok(Vec::new());
        }

        let mut embedding_model = lock_recovering(
            EMBEDDING_MODEL
                .get()
                .ok_or_else(|| anyhow!("Embedding model not initialized"))?,
        );

        let mut embeddings = Vec::with_capacity(face_boxes.len());
        for (bbox, confidence) in face_boxes {
            if bbox.width <= 0 || bbox.height <= 0 {
                continue;
            }

            let face_crop = crop_face(img, &bbox, orig_width, orig_height);
            let embedding = run_arcface_embedding(&mut *embedding_model, &face_crop)?;
            tracing::debug!(?bbox, confidence, dim = embedding.len(), "Encoded face");
            embeddings.push(FaceEmbedding::new(embedding));
        }

        Ok(embeddings)
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(&self, image: &DynamicImage) -> Result<Vec<FaceEmbedding>> {
        self.detect_and_embed(image)
    }
}

/// Run UltraFace detection model. Faces come back strongest first.
fn run_ultraface_detection(
    session: &mut Session,
    img: &DynamicImage,
    confidence_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<(BoundingBox, f32)>> {
    const INPUT_WIDTH: u32 = 320;
    const INPUT_HEIGHT: u32 = 240;

    let (orig_width, orig_height) = img.dimensions();

    let resized = img.resize_exact(INPUT_WIDTH, INPUT_HEIGHT, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    // NCHW, normalized to roughly [-1, 1]
    let plane = (INPUT_HEIGHT * INPUT_WIDTH) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let idx = y as usize * INPUT_WIDTH as usize + x as usize;
        for c in 0..3 {
            input_data[c * plane + idx] = (pixel[c] as f32 - 127.0) / 128.0;
        }
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize],
        input_data.into_boxed_slice(),
    ))?;

    let outputs = session.run(ort::inputs!["input" => input_tensor])?;

    let scores_value = outputs.get("scores").ok_or_else(|| anyhow!("No scores output"))?;
    let boxes_value = outputs.get("boxes").ok_or_else(|| anyhow!("No boxes output"))?;

    let (scores_shape, scores_data) = scores_value.try_extract_tensor::<f32>()?;
    let (_boxes_shape, boxes_data) = boxes_value.try_extract_tensor::<f32>()?;

    // scores: [1, anchors, 2] (background, face); boxes: [1, anchors, 4] normalized corners
    let num_anchors = scores_shape[1] as usize;
    let mut face_boxes = Vec::new();

    for i in 0..num_anchors {
        let confidence = scores_data[i * 2 + 1];
        if confidence <= confidence_threshold {
            continue;
        }

        let x1 = (boxes_data[i * 4] * orig_width as f32) as i32;
        let y1 = (boxes_data[i * 4 + 1] * orig_height as f32) as i32;
        let x2 = (boxes_data[i * 4 + 2] * orig_width as f32) as i32;
        let y2 = (boxes_data[i * 4 + 3] * orig_height as f32) as i32;

        let bbox = BoundingBox {
            x: x1.max(0),
            y: y1.max(0),
            width: (x2 - x1).max(1),
            height: (y2 - y1).max(1),
        };
        face_boxes.push((bbox, confidence));
    }

    Ok(nms(face_boxes, nms_threshold))
}

/// Non-maximum suppression to remove overlapping detections
fn nms(mut boxes: Vec<(BoundingBox, f32)>, threshold: f32) -> Vec<(BoundingBox, f32)> {
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(boxes[i]);

        for j in (i + 1)..boxes.len() {
            if !suppressed[j] && compute_iou(&boxes[i].0, &boxes[j].0) > threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Intersection over Union between two boxes
fn compute_iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let intersection = ((x2 - x1).max(0) * (y2 - y1).max(0)) as f32;
    let union = (a.width * a.height) as f32 + (b.width * b.height) as f32 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Crop face region with 20% padding, clipped to the image
fn crop_face(img: &DynamicImage, bbox: &BoundingBox, img_width: u32, img_height: u32) -> DynamicImage {
    let padding_x = (bbox.width as f32 * 0.2) as i32;
    let padding_y = (bbox.height as f32 * 0.2) as i32;

    let x = ((bbox.x - padding_x).max(0) as u32).min(img_width.saturating_sub(1));
    let y = ((bbox.y - padding_y).max(0) as u32).min(img_height.saturating_sub(1));
    let w = ((bbox.width + padding_x * 2) as u32).min(img_width - x);
    let h = ((bbox.height + padding_y * 2) as u32).min(img_height - y);

    img.crop_imm(x, y, w.max(1), h.max(1))
}

/// Run ArcFace and L2-normalize the output
fn run_arcface_embedding(session: &mut Session, face_img: &DynamicImage) -> Result<Vec<f32>> {
    const INPUT_SIZE: u32 = 112;

    let resized = face_img.resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let idx = y as usize * INPUT_SIZE as usize + x as usize;
        for c in 0..3 {
            input_data[c * plane + idx] = (pixel[c] as f32 - 127.5) / 127.5;
        }
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
        input_data.into_boxed_slice(),
    ))?;

    // ArcFace ONNX model uses "data" as input name
    let outputs = session.run(ort::inputs!["data" => input_tensor])?;

    let embedding_output = outputs.iter().next().ok_or_else(|| anyhow!("No embedding output"))?;
    let (_shape, embedding_data) = embedding_output.1.try_extract_tensor::<f32>()?;

    let mut embedding: Vec<f32> = embedding_data.to_vec();
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in embedding.iter_mut() {
            *x /= norm;
        }
    }

    Ok(embedding)
}
