use nalgebra as na;

pub const MPS_TO_KMH: f32 = 3.6;

#[inline]
pub fn distance(a: &na::Point2<f32>, b: &na::Point2<f32>) -> f32 {
    na::distance(a, b)
}

/// Seconds elapsed between two frame indices at the given frame rate.
/// Non-positive or non-finite results come back as `None`.
#[inline]
pub fn frame_seconds(frames: f32, fps: f32) -> Option<f32> {
    if fps <= 0.0 || !fps.is_finite() {
        return None;
    }

    let dt = frames / fps;

    if dt > 0.0 && dt.is_finite() {
        Some(dt)
    } else {
        None
    }
}

/// `pixels * mpp` meters covered in `frames / fps` seconds, in km/h.
/// A degenerate time basis yields zero rather than an infinite speed.
#[inline]
pub fn speed_kmh(pixels: f32, frames: f32, fps: f32, mpp: f32) -> f32 {
    match frame_seconds(frames, fps) {
        Some(dt) => (pixels * mpp) / dt * MPS_TO_KMH,
        None => 0.0,
    }
}
