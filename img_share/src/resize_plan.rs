//! Resize Planner
//!
//! Pure function from source dimensions and an edge cap to the output
//! dimensions. Aspect ratio is kept within one pixel of rounding.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResizePlan {
    pub target_width: u32,
    pub target_height: u32,
    /// Always `<= 1.0`; exactly `1.0` when nothing is scaled.
    pub scale_factor: f64,
    pub was_scaled: bool,
}

impl ResizePlan {
    pub fn identity(width: u32, height: u32) -> Self {
        Self {
            target_width: width,
            target_height: height,
            scale_factor: 1.0,
            was_scaled: false,
        }
    }

    pub fn longest_edge(&self) -> u32 {
        self.target_width.max(self.target_height)
    }
}

/// Plan output dimensions for a `width`x`height` source capped at `max_edge`.
///
/// Inputs are expected to be `>= 1`; zero is treated as one so the
/// function stays total.
///
/// ```
/// use img_share::resize_plan::plan;
///
/// let p = plan(4000, 2000, 1000);
/// assert_eq!((p.target_width, p.target_height), (1000, 500));
/// assert!(p.was_scaled);
/// ```
pub fn plan(width: u32, height: u32, max_edge: u32) -> ResizePlan {
    let width = width.max(1);
    let height = height.max(1);
    let max_edge = max_edge.max(1);

    // Square inputs scale against width.
    let longest = if width >= height { width } else { height };
    if longest <= max_edge {
        return ResizePlan::identity(width, height);
    }

    let scale = max_edge as f64 / longest as f64;
    let target_width = ((width as f64 * scale).round() as u32).clamp(1, max_edge);
    let target_height = ((height as f64 * scale).round() as u32).clamp(1, max_edge);

    ResizePlan {
        target_width,
        target_height,
        scale_factor: scale,
        was_scaled: true,
    }
}

/// Whether `tw`x`th` matches the `w`x`h` aspect ratio within rounding,
/// i.e. each target side is at most half a pixel off the exact scale.
pub fn preserves_aspect(w: u32, h: u32, tw: u32, th: u32) -> bool {
    let lhs = (tw as i128 * h as i128 - th as i128 * w as i128).abs() * 2;
    lhs <= w as i128 + h as i128
}
