//! Synthetic camera gateway.
//!
//! Stands in for a vendor camera stack in the demo binary's `--simulate`
//! mode and in tests. Completions are delivered after a configurable
//! latency, failures can be injected at each phase of a capture, and all
//! hardware interactions are counted so tests can assert on exclusive
//! ownership and release.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use tokio::time::sleep;

use super::{
    CameraDevice, CameraGateway, CameraId, CameraInfo, CaptureStream, Facing, Rotation,
    StillRequest, StillSize,
};
use crate::error::{Error, Result};

/// Failure injection switches, one per capture phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimFaults {
    /// `open` fails with a device-open error.
    pub fail_open: bool,
    /// `create_stream` fails with a session-configuration error.
    pub fail_configure: bool,
    /// `submit` reports the capture as failed.
    pub fail_capture: bool,
    /// `submit` succeeds but no image is ever delivered.
    pub drop_image: bool,
}

/// Usage counters shared between the gateway and its handles.
#[derive(Debug, Default)]
pub struct SimStats {
    pub opens: AtomicUsize,
    pub device_closes: AtomicUsize,
    pub stream_closes: AtomicUsize,
    pub submits: AtomicUsize,
    pub images_delivered: AtomicUsize,
    /// JPEG orientation of the most recent submitted request.
    pub last_orientation: Mutex<Option<i32>>,
    /// Resolution of the most recently configured stream.
    pub last_size: Mutex<Option<StillSize>>,
}

impl SimStats {
    fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// True when every opened handle has been closed exactly once.
    pub fn all_released(&self) -> bool {
        Self::count(&self.opens) == Self::count(&self.device_closes)
    }
}

/// Deterministic in-process camera gateway.
pub struct SimGateway {
    devices: Vec<CameraInfo>,
    sizes: Vec<StillSize>,
    rotation: Rotation,
    latency: Duration,
    faults: SimFaults,
    stats: Arc<SimStats>,
}

impl SimGateway {
    /// Gateway with a single front camera (sensor mounted at 270 degrees)
    /// and a typical set of JPEG output sizes.
    pub fn new() -> Self {
        Self::with_devices(vec![CameraInfo {
            id: CameraId("0".to_string()),
            facing: Facing::Front,
            sensor_orientation: 270,
        }])
    }

    pub fn with_devices(devices: Vec<CameraInfo>) -> Self {
        Self {
            devices,
            sizes: vec![
                StillSize { width: 4032, height: 3024 },
                StillSize { width: 1920, height: 1080 },
                StillSize { width: 640, height: 480 },
            ],
            rotation: Rotation::R0,
            latency: Duration::from_millis(5),
            faults: SimFaults::default(),
            stats: Arc::new(SimStats::default()),
        }
    }

    pub fn set_sizes(&mut self, sizes: Vec<StillSize>) {
        self.sizes = sizes;
    }

    pub fn set_rotation(&mut self, rotation: Rotation) {
        self.rotation = rotation;
    }

    pub fn set_latency(&mut self, latency: Duration) {
        self.latency = latency;
    }

    pub fn set_faults(&mut self, faults: SimFaults) {
        self.faults = faults;
    }

    pub fn stats(&self) -> Arc<SimStats> {
        Arc::clone(&self.stats)
    }
}

impl Default for SimGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraGateway for SimGateway {
    type Device = SimDevice;

    fn devices(&self) -> Result<Vec<CameraInfo>> {
        Ok(self.devices.clone())
    }

    fn display_rotation(&self) -> Rotation {
        self.rotation
    }

    fn open(&self, id: &CameraId) -> impl Future<Output = Result<SimDevice>> + Send {
        let known = self.devices.iter().any(|d| &d.id == id);
        let id = id.clone();
        let sizes = self.sizes.clone();
        let latency = self.latency;
        let faults = self.faults;
        let stats = Arc::clone(&self.stats);
        async move {
            sleep(latency).await;
            if !known {
                return Err(Error::DeviceOpen(format!("unknown camera {id}")));
            }
            if faults.fail_open {
                return Err(Error::DeviceOpen(format!("camera {id} disconnected")));
            }
            stats.opens.fetch_add(1, Ordering::SeqCst);
            Ok(SimDevice {
                sizes,
                latency,
                faults,
                stats,
                closed: false,
            })
        }
    }
}

/// An open synthetic camera.
pub struct SimDevice {
    sizes: Vec<StillSize>,
    latency: Duration,
    faults: SimFaults,
    stats: Arc<SimStats>,
    closed: bool,
}

impl CameraDevice for SimDevice {
    type Stream = SimStream;

    fn still_sizes(&self) -> Result<Vec<StillSize>> {
        Ok(self.sizes.clone())
    }

    fn create_stream(&mut self, size: StillSize) -> impl Future<Output = Result<SimStream>> + Send {
        let latency = self.latency;
        let faults = self.faults;
        let stats = Arc::clone(&self.stats);
        async move {
            sleep(latency).await;
            if faults.fail_configure {
                return Err(Error::SessionConfig(format!(
                    "stream at {size} rejected by hardware"
                )));
            }
            if let Ok(mut guard) = stats.last_size.lock() {
                *guard = Some(size);
            }
            Ok(SimStream {
                latency,
                faults,
                stats,
                frame: None,
                closed: false,
            })
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.device_closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A configured synthetic capture stream.
pub struct SimStream {
    latency: Duration,
    faults: SimFaults,
    stats: Arc<SimStats>,
    frame: Option<Vec<u8>>,
    closed: bool,
}

impl CaptureStream for SimStream {
    fn submit(&mut self, request: StillRequest) -> impl Future<Output = Result<()>> + Send {
        let latency = self.latency;
        let fail = self.faults.fail_capture;
        let drop_image = self.faults.drop_image;
        let stats = Arc::clone(&self.stats);
        // Frames are synthesized small regardless of the configured size;
        // the configured size only drives selection logic.
        let frame = if fail || drop_image {
            Ok(None)
        } else {
            sample_jpeg(64, 48).map(Some)
        };
        let out = &mut self.frame;
        async move {
            sleep(latency).await;
            if fail {
                return Err(Error::CaptureFailed("hardware reported failure".to_string()));
            }
            stats.submits.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut guard) = stats.last_orientation.lock() {
                *guard = Some(request.jpeg_orientation);
            }
            *out = frame?;
            Ok(())
        }
    }

    fn next_image(&mut self) -> impl Future<Output = Result<Vec<u8>>> + Send {
        let latency = self.latency;
        let frame = self.frame.take();
        let stats = Arc::clone(&self.stats);
        async move {
            // Delivery trails request completion, as on real hardware.
            sleep(latency).await;
            match frame {
                Some(bytes) => {
                    stats.images_delivered.fetch_add(1, Ordering::SeqCst);
                    Ok(bytes)
                }
                // No frame was produced; the caller's bounded wait fires.
                None => std::future::pending().await,
            }
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.stream_closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Encode a small gradient frame as JPEG.
pub fn sample_jpeg(width: u32, height: u32) -> Result<Vec<u8>> {
    let mut img = RgbImage::new(width, height);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        pixel.0 = [r, g, 128];
    }
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 80).encode_image(&img)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_jpeg_is_decodable() {
        let bytes = sample_jpeg(64, 48).unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (64, 48));
    }

    #[tokio::test]
    async fn capture_round_trip_delivers_a_frame() {
        let gateway = SimGateway::new();
        let info = &gateway.devices().unwrap()[0];
        let mut device = gateway.open(&info.id).await.unwrap();
        let size = device.still_sizes().unwrap()[0];
        let mut stream = device.create_stream(size).await.unwrap();
        stream.submit(StillRequest { jpeg_orientation: 0 }).await.unwrap();
        let frame = stream.next_image().await.unwrap();
        assert!(!frame.is_empty());
        stream.close();
        device.close();
        assert!(gateway.stats().all_released());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let gateway = SimGateway::new();
        let info = &gateway.devices().unwrap()[0];
        let mut device = gateway.open(&info.id).await.unwrap();
        device.close();
        device.close();
        assert_eq!(gateway.stats().device_closes.load(Ordering::SeqCst), 1);
    }
}
