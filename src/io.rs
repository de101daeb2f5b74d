use crate::canvas::{LayerId, Surface};
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum EditorError {
    Io(std::io::Error),
    Decode(String),
    Encode(String),
    Config(String),
    InvalidColor(String),
    /// Copy was attempted on a selection lifted from a reference layer.
    ReferenceCopy,
    NoActiveLayer,
}

impl std::fmt::Display for EditorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditorError::Io(e) => write!(f, "I/O error: {}", e),
            EditorError::Decode(e) => write!(f, "Decode error: {}", e),
            EditorError::Encode(e) => write!(f, "Encode error: {}", e),
            EditorError::Config(e) => write!(f, "Config error: {}", e),
            EditorError::InvalidColor(e) => write!(f, "Invalid color: {}", e),
            EditorError::ReferenceCopy => {
                write!(f, "Selections from a reference layer cannot be copied")
            }
            EditorError::NoActiveLayer => write!(f, "No active layer"),
        }
    }
}

impl std::error::Error for EditorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EditorError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EditorError {
    fn from(e: std::io::Error) -> Self {
        EditorError::Io(e)
    }
}

impl From<image::ImageError> for EditorError {
    fn from(e: image::ImageError) -> Self {
        EditorError::Decode(e.to_string())
    }
}

// ============================================================================
// DECODING
// ============================================================================

/// Where an image comes from.  The editor never picks files itself; callers
/// hand in a path or the raw bytes they already hold.
#[derive(Clone, Debug)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl ImageSource {
    pub fn decode(&self) -> Result<RgbaImage, EditorError> {
        let img = match self {
            ImageSource::Path(path) => image::open(path)?,
            ImageSource::Bytes(bytes) => image::load_from_memory(bytes)?,
        };
        Ok(img.to_rgba8())
    }

    pub fn label(&self) -> String {
        match self {
            ImageSource::Path(path) => path.display().to_string(),
            ImageSource::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }
}

/// Fit `img` into a `width`×`height` surface: aspect preserved, centered,
/// never upscaled, floor-rounded.
pub fn fit_into(img: &RgbaImage, width: u32, height: u32) -> Surface {
    let (sw, sh) = img.dimensions();
    if sw == 0 || sh == 0 {
        return Surface::new(width, height);
    }
    let scale = (width as f64 / sw as f64)
        .min(height as f64 / sh as f64)
        .min(1.0);
    let dw = ((sw as f64 * scale).floor() as u32).max(1);
    let dh = ((sh as f64 * scale).floor() as u32).max(1);
    let dx = (width - dw.min(width)) / 2;
    let dy = (height - dh.min(height)) / 2;

    let mut canvas = RgbaImage::new(width, height);
    if dw == sw && dh == sh {
        image::imageops::replace(&mut canvas, img, dx as i64, dy as i64);
    } else {
        let scaled = image::imageops::resize(img, dw, dh, image::imageops::FilterType::Triangle);
        image::imageops::replace(&mut canvas, &scaled, dx as i64, dy as i64);
    }
    Surface::from_rgba_image(&canvas)
}

/// A finished background decode, addressed to the layer it was queued for.
pub struct DecodeResult {
    pub layer: LayerId,
    pub label: String,
    pub image: Result<RgbaImage, EditorError>,
}

/// Decodes images off the editing thread and hands the results back over a
/// channel.  Results are applied by the owner, never by the worker.
pub struct ImageLoader {
    io_sender: mpsc::Sender<DecodeResult>,
    io_receiver: mpsc::Receiver<DecodeResult>,
    pending_io_ops: usize,
}

impl ImageLoader {
    pub fn new() -> Self {
        let (io_sender, io_receiver) = mpsc::channel();
        Self {
            io_sender,
            io_receiver,
            pending_io_ops: 0,
        }
    }

    /// Start decoding `source` for `layer`.
    pub fn queue(&mut self, layer: LayerId, source: ImageSource) {
        let sender = self.io_sender.clone();
        self.pending_io_ops += 1;
        rayon::spawn(move || {
            let image = source.decode();
            let _ = sender.send(DecodeResult {
                layer,
                label: source.label(),
                image,
            });
        });
    }

    /// Number of decodes queued but not yet collected.
    pub fn pending(&self) -> usize {
        self.pending_io_ops
    }

    /// Collect one finished decode without blocking.
    pub fn try_recv(&mut self) -> Option<DecodeResult> {
        let result = self.io_receiver.try_recv().ok()?;
        self.pending_io_ops = self.pending_io_ops.saturating_sub(1);
        Some(result)
    }

    /// Block until the next decode finishes.  `None` when nothing is pending.
    pub fn recv_blocking(&mut self) -> Option<DecodeResult> {
        if self.pending_io_ops == 0 {
            return None;
        }
        let result = self.io_receiver.recv().ok()?;
        self.pending_io_ops -= 1;
        Some(result)
    }
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ENCODING
// ============================================================================

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, EditorError> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgba8)
        .map_err(|e| EditorError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Pending PNG encode running on the rayon pool.
pub struct ExportHandle {
    receiver: mpsc::Receiver<Result<Vec<u8>, EditorError>>,
}

impl ExportHandle {
    pub fn spawn(image: RgbaImage) -> Self {
        let (sender, receiver) = mpsc::channel();
        rayon::spawn(move || {
            let _ = sender.send(encode_png(&image));
        });
        Self { receiver }
    }

    /// Non-blocking poll; `None` while the encode is still running.
    pub fn try_take(&self) -> Option<Result<Vec<u8>, EditorError>> {
        self.receiver.try_recv().ok()
    }

    /// Block until the encoded bytes are ready.
    pub fn wait(self) -> Result<Vec<u8>, EditorError> {
        self.receiver
            .recv()
            .map_err(|_| EditorError::Encode("export worker exited early".to_string()))?
    }
}

pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), EditorError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn fit_downscales_and_centers() {
        let img = RgbaImage::from_pixel(400, 100, Rgba([9, 9, 9, 255]));
        let s = fit_into(&img, 200, 200);
        // 400x100 -> 200x50 centered at y = 75
        assert_eq!(s.get_pixel(0, 74)[3], 0);
        assert_eq!(s.get_pixel(0, 75)[3], 255);
        assert_eq!(s.get_pixel(199, 124)[3], 255);
        assert_eq!(s.get_pixel(199, 125)[3], 0);
    }

    #[test]
    fn fit_never_upscales() {
        let img = RgbaImage::from_pixel(10, 4, Rgba([1, 2, 3, 255]));
        let s = fit_into(&img, 100, 100);
        // 10x4 centered at (45, 48)
        assert_eq!(*s.get_pixel(45, 48), Rgba([1, 2, 3, 255]));
        assert_eq!(*s.get_pixel(54, 51), Rgba([1, 2, 3, 255]));
        assert_eq!(s.get_pixel(44, 48)[3], 0);
        assert_eq!(s.get_pixel(55, 48)[3], 0);
    }

    #[test]
    fn png_encode_decodes_back() {
        let img = RgbaImage::from_pixel(3, 2, Rgba([200, 10, 10, 255]));
        let bytes = encode_png(&img).unwrap();
        let back = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(back, img);
    }

    #[test]
    fn export_handle_yields_bytes() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));
        let handle = ExportHandle::spawn(img.clone());
        let polled = loop {
            if let Some(result) = handle.try_take() {
                break result.unwrap();
            }
            std::thread::yield_now();
        };
        assert_eq!(&polled[1..4], b"PNG");
        let bytes = ExportHandle::spawn(img).wait().unwrap();
        assert_eq!(bytes, polled);
    }

    #[test]
    fn loader_reports_results_and_failures() {
        let png = encode_png(&RgbaImage::from_pixel(4, 4, Rgba([5, 5, 5, 255]))).unwrap();
        let mut loader = ImageLoader::new();
        let good = LayerId::new();
        let bad = LayerId::new();
        loader.queue(good, ImageSource::Bytes(png));
        loader.queue(bad, ImageSource::Bytes(vec![1, 2, 3]));
        assert_eq!(loader.pending(), 2);

        let mut seen = Vec::new();
        while let Some(result) = loader.recv_blocking() {
            seen.push((result.layer, result.image.is_ok()));
        }
        assert_eq!(loader.pending(), 0);
        assert!(seen.contains(&(good, true)));
        assert!(seen.contains(&(bad, false)));
    }

    #[test]
    fn missing_file_is_decode_error() {
        let err = ImageSource::Path(PathBuf::from("/definitely/not/here.png"))
            .decode()
            .unwrap_err();
        assert!(matches!(err, EditorError::Decode(_) | EditorError::Io(_)));
    }
}
