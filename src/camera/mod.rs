//! Camera hardware gateway boundary.
//!
//! The capture controller talks to camera hardware exclusively through the
//! traits in this module. A vendor integration implements them on top of
//! the platform camera stack; [`sim`] provides a deterministic synthetic
//! gateway for tests and the demo binary.
//!
//! All gateway operations that wait on hardware completions are async and
//! resolve on the corresponding completion: [`CameraGateway::open`] on the
//! device-opened callback, [`CameraDevice::create_stream`] on the
//! session-configured callback, [`CaptureStream::submit`] on the
//! capture-completed callback, and [`CaptureStream::next_image`] on image
//! delivery. Image delivery is independent of request completion and may
//! arrive after it.

pub mod sim;

use std::fmt;
use std::future::Future;

use crate::error::Result;

/// Stable identifier of a camera device, assigned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CameraId(pub String);

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which way a camera lens faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    Front,
    Rear,
    External,
}

/// Physical rotation of the display, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    /// Rotation in degrees.
    pub fn degrees(&self) -> i32 {
        match self {
            Rotation::R0 => 0,
            Rotation::R90 => 90,
            Rotation::R180 => 180,
            Rotation::R270 => 270,
        }
    }
}

/// Static description of one camera device.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub id: CameraId,
    pub facing: Facing,
    /// Mounting orientation of the sensor in degrees (0, 90, 180, 270).
    pub sensor_orientation: i32,
}

/// A still-image output resolution supported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StillSize {
    pub width: u32,
    pub height: u32,
}

impl StillSize {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for StillSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Parameters of one still-capture request.
#[derive(Debug, Clone, Copy)]
pub struct StillRequest {
    /// Orientation to record in the JPEG, in degrees.
    pub jpeg_orientation: i32,
}

/// Entry point to the platform camera stack.
pub trait CameraGateway: Send + Sync + 'static {
    type Device: CameraDevice;

    /// Enumerate available camera devices.
    fn devices(&self) -> Result<Vec<CameraInfo>>;

    /// Current display rotation, used for JPEG orientation.
    fn display_rotation(&self) -> Rotation {
        Rotation::R0
    }

    /// Open a device for exclusive use. Resolves once the hardware reports
    /// the device as opened; fails on open errors or disconnects.
    fn open(&self, id: &CameraId) -> impl Future<Output = Result<Self::Device>> + Send;
}

/// An exclusively owned, open camera device.
pub trait CameraDevice: Send {
    type Stream: CaptureStream;

    /// Still-image resolutions this device can produce as JPEG.
    fn still_sizes(&self) -> Result<Vec<StillSize>>;

    /// Bind an image stream at the given resolution to a capture session.
    /// Resolves when the session is configured.
    fn create_stream(&mut self, size: StillSize) -> impl Future<Output = Result<Self::Stream>> + Send;

    /// Release the device. Must be idempotent.
    fn close(&mut self);
}

/// The image-delivery side of a configured capture session.
pub trait CaptureStream: Send {
    /// Submit a still-capture request. Resolves when the gateway reports
    /// the request as completed; fails if the capture is reported failed.
    fn submit(&mut self, request: StillRequest) -> impl Future<Output = Result<()>> + Send;

    /// Wait for the next delivered image and return its encoded bytes.
    fn next_image(&mut self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Release the stream. Must be idempotent.
    fn close(&mut self);
}

/// JPEG orientation for a capture, from the sensor mounting orientation,
/// the current display rotation and the lens facing.
///
/// A front sensor is mirrored relative to the rear-camera rotation math
/// and is typically mounted 90 degrees off, hence the 270 correction.
pub fn jpeg_orientation(sensor_orientation: i32, rotation: Rotation, facing: Facing) -> i32 {
    let device = rotation.degrees();
    match facing {
        Facing::Front => (sensor_orientation + device + 270) % 360,
        _ => (sensor_orientation - device + 360) % 360,
    }
}

/// Pick the maximum-area size; the first one encountered wins ties.
pub fn largest_still_size(sizes: &[StillSize]) -> Option<StillSize> {
    let mut best: Option<StillSize> = None;
    for &size in sizes {
        match best {
            Some(b) if size.area() <= b.area() => {}
            _ => best = Some(size),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_orientation_cancels_sensor_mounting() {
        // sensorOrientation=90, display at 0, front lens
        assert_eq!(jpeg_orientation(90, Rotation::R0, Facing::Front), 0);
    }

    #[test]
    fn rear_orientation_subtracts_rotation() {
        // sensorOrientation=270, display at 90, rear lens
        assert_eq!(jpeg_orientation(270, Rotation::R90, Facing::Rear), 180);
    }

    #[test]
    fn orientation_stays_in_range() {
        for sensor in [0, 90, 180, 270] {
            for rot in [Rotation::R0, Rotation::R90, Rotation::R180, Rotation::R270] {
                for facing in [Facing::Front, Facing::Rear, Facing::External] {
                    let o = jpeg_orientation(sensor, rot, facing);
                    assert!((0..360).contains(&o), "{sensor} {rot:?} {facing:?} -> {o}");
                    assert_eq!(o % 90, 0);
                }
            }
        }
    }

    #[test]
    fn largest_size_prefers_first_at_max_area() {
        let sizes = [
            StillSize { width: 1920, height: 1080 },
            StillSize { width: 4032, height: 3024 },
            StillSize { width: 3024, height: 4032 },
            StillSize { width: 640, height: 480 },
        ];
        // 4032x3024 and 3024x4032 tie on area; the first encountered wins.
        assert_eq!(
            largest_still_size(&sizes),
            Some(StillSize { width: 4032, height: 3024 })
        );
    }

    #[test]
    fn largest_size_of_empty_is_none() {
        assert_eq!(largest_still_size(&[]), None);
    }
}
