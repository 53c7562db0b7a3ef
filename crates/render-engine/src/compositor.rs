//! Frame compositor: draws the clips visible at one timeline instant.
//!
//! Main-track clips are aspect-fit onto the full surface. Overlay clips are
//! placed through their [`TransformNode`]: translate to the node center,
//! rotate, scale the natural frame to `w`×`h`, draw centered. Opacity is a
//! per-layer alpha multiplier.

use std::collections::HashMap;

use async_trait::async_trait;
use cutline_common::error::CutlineResult;
use cutline_media_pool::Frame;
use cutline_project_model::{ClipId, EditPlan, PlannedClip, TimeMs, TransformNode};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

/// Opaque black, the surface color behind every frame.
pub const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Random-access frame provider for previews and export sampling.
#[async_trait]
pub trait FrameSampler: Send + Sync {
    /// Frame of `clip`'s asset at `source_secs`, or `None` if not available.
    async fn sample(&self, clip: &PlannedClip, source_secs: f64) -> CutlineResult<Option<Frame>>;
}

/// What happened to each visible clip during one composition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeReport {
    /// Clips drawn, in drawing order.
    pub drawn: Vec<ClipId>,
    /// Clips skipped because no frame was ready.
    pub skipped: Vec<ClipId>,
}

/// Placement of a fitted picture on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Largest rectangle with the source aspect ratio that fits the surface,
/// centered. The remainder is letterbox or pillarbox padding.
pub fn aspect_fit(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> FitRect {
    if src_w == 0 || src_h == 0 {
        return FitRect {
            x: 0,
            y: 0,
            width: dst_w,
            height: dst_h,
        };
    }
    let scale = (dst_w as f64 / src_w as f64).min(dst_h as f64 / src_h as f64);
    let width = ((src_w as f64 * scale).round() as u32).clamp(1, dst_w.max(1));
    let height = ((src_h as f64 * scale).round() as u32).clamp(1, dst_h.max(1));
    FitRect {
        x: (dst_w - width) / 2,
        y: (dst_h - height) / 2,
        width,
        height,
    }
}

/// Maps surface points back into an overlay's natural frame.
#[derive(Debug, Clone, Copy)]
pub struct OverlayAffine {
    cx: f64,
    cy: f64,
    cos: f64,
    sin: f64,
    sx: f64,
    sy: f64,
    half_w: f64,
    half_h: f64,
}

impl OverlayAffine {
    /// Affine for `node` applied to a frame of `natural_w`×`natural_h`.
    pub fn new(node: &TransformNode, natural_w: u32, natural_h: u32) -> Self {
        let center = node.center();
        let (sx, sy) = node.scale_for(natural_w, natural_h);
        let theta = node.rotation_radians();
        Self {
            cx: center.x,
            cy: center.y,
            cos: theta.cos(),
            sin: theta.sin(),
            sx,
            sy,
            half_w: natural_w as f64 / 2.0,
            half_h: natural_h as f64 / 2.0,
        }
    }

    /// Surface position of natural-frame point `(u, v)`.
    pub fn to_surface(&self, u: f64, v: f64) -> (f64, f64) {
        let dx = (u - self.half_w) * self.sx;
        let dy = (v - self.half_h) * self.sy;
        (
            self.cx + dx * self.cos - dy * self.sin,
            self.cy + dx * self.sin + dy * self.cos,
        )
    }

    /// Natural-frame position drawn at surface point `(x, y)`, if the
    /// scale is invertible.
    pub fn to_source(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if self.sx == 0.0 || self.sy == 0.0 {
            return None;
        }
        let dx = x - self.cx;
        let dy = y - self.cy;
        let rx = dx * self.cos + dy * self.sin;
        let ry = -dx * self.sin + dy * self.cos;
        Some((rx / self.sx + self.half_w, ry / self.sy + self.half_h))
    }
}

/// Draws plans onto a fixed-size surface.
#[derive(Debug, Clone)]
pub struct Compositor {
    width: u32,
    height: u32,
}

impl Compositor {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A compositor sized to the plan's canvas.
    pub fn for_plan(plan: &EditPlan) -> Self {
        Self::new(plan.canvas.width, plan.canvas.height)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// A cleared surface.
    pub fn blank(&self) -> RgbaImage {
        RgbaImage::from_pixel(self.width, self.height, BACKGROUND)
    }

    /// Compose the clips visible at `t` into `target`.
    ///
    /// `frames` is asked for each visible clip with the clip's source
    /// position at `t`; a `None` answer skips that layer for this frame.
    pub fn compose_into<F>(
        &self,
        target: &mut RgbaImage,
        plan: &EditPlan,
        t: TimeMs,
        mut frames: F,
    ) -> ComposeReport
    where
        F: FnMut(&PlannedClip, f64) -> Option<Frame>,
    {
        if target.dimensions() != (self.width, self.height) {
            *target = self.blank();
        } else {
            target.pixels_mut().for_each(|p| *p = BACKGROUND);
        }

        let mut report = ComposeReport::default();
        for clip in plan.visible_at(t) {
            let Some(frame) = frames(clip, clip.source_time_secs(t)) else {
                report.skipped.push(clip.clip_id.clone());
                continue;
            };
            match (&clip.transform, clip.is_main()) {
                (Some(node), false) => draw_overlay(target, &frame, node),
                _ => draw_fitted(target, &frame),
            }
            report.drawn.push(clip.clip_id.clone());
        }
        report
    }

    /// Compose the clips visible at `t` into a new surface.
    pub fn compose<F>(&self, plan: &EditPlan, t: TimeMs, frames: F) -> (RgbaImage, ComposeReport)
    where
        F: FnMut(&PlannedClip, f64) -> Option<Frame>,
    {
        let mut target = self.blank();
        let report = self.compose_into(&mut target, plan, t, frames);
        (target, report)
    }

    /// Render a single still at `t` using random-access frames.
    ///
    /// Sampling failures skip the layer, like a frame that is not ready.
    pub async fn render_at(
        &self,
        plan: &EditPlan,
        t: TimeMs,
        sampler: &dyn FrameSampler,
    ) -> (RgbaImage, ComposeReport) {
        let mut sampled: HashMap<ClipId, Frame> = HashMap::new();
        for clip in plan.visible_at(t) {
            match sampler.sample(clip, clip.source_time_secs(t)).await {
                Ok(Some(frame)) => {
                    sampled.insert(clip.clip_id.clone(), frame);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(clip = %clip.clip_id, error = %e, "Preview sample failed");
                }
            }
        }
        self.compose(plan, t, |clip, _| sampled.get(&clip.clip_id).cloned())
    }
}

/// Draw `frame` over the whole surface, aspect-fit.
pub fn draw_fitted(target: &mut RgbaImage, frame: &RgbaImage) {
    let (tw, th) = target.dimensions();
    let (sw, sh) = frame.dimensions();
    if sw == 0 || sh == 0 || tw == 0 || th == 0 {
        return;
    }
    if (sw, sh) == (tw, th) {
        imageops::replace(target, frame, 0, 0);
        return;
    }
    let fit = aspect_fit(sw, sh, tw, th);
    let scaled = imageops::resize(frame, fit.width, fit.height, FilterType::Triangle);
    imageops::replace(target, &scaled, fit.x as i64, fit.y as i64);
}

/// Draw `frame` through an overlay transform with layer opacity.
pub fn draw_overlay(target: &mut RgbaImage, frame: &RgbaImage, node: &TransformNode) {
    let (nw, nh) = frame.dimensions();
    if nw == 0 || nh == 0 || node.is_degenerate() || node.opacity <= 0.0 {
        return;
    }
    let affine = OverlayAffine::new(node, nw, nh);

    let corners = node.corners();
    let (tw, th) = target.dimensions();
    let min_x = corners.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
    let max_x = corners.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
    let min_y = corners.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let max_y = corners.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
    let x0 = min_x.floor().max(0.0) as u32;
    let y0 = min_y.floor().max(0.0) as u32;
    let x1 = (max_x.ceil().max(0.0) as u32).min(tw);
    let y1 = (max_y.ceil().max(0.0) as u32).min(th);

    for py in y0..y1 {
        for px in x0..x1 {
            let Some((u, v)) = affine.to_source(px as f64 + 0.5, py as f64 + 0.5) else {
                return;
            };
            if u < 0.0 || v < 0.0 || u >= nw as f64 || v >= nh as f64 {
                continue;
            }
            let src = frame.get_pixel(u as u32, v as u32);
            blend_over(target.get_pixel_mut(px, py), src, node.opacity);
        }
    }
}

/// Source-over blend of `src` scaled by `opacity` onto `dst`.
fn blend_over(dst: &mut Rgba<u8>, src: &Rgba<u8>, opacity: f64) {
    let sa = (src[3] as f64 / 255.0) * opacity.clamp(0.0, 1.0);
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f64 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    for c in 0..3 {
        let s = src[c] as f64 / 255.0;
        let d = dst[c] as f64 / 255.0;
        let out = if out_a > 0.0 {
            (s * sa + d * da * (1.0 - sa)) / out_a
        } else {
            0.0
        };
        dst[c] = (out * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}
