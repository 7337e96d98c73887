use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::marker::PhantomData;

pub trait BBoxFormat: std::fmt::Debug + Copy + PartialEq {}

/// Left-top-right-bottom format, contains left top and right bottom corners.
/// This is what detectors hand over as `[x1, y1, x2, y2]`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ltrb;
impl BBoxFormat for Ltrb {}

/// X-y-width-height format, contains coordinates of the center of bbox and width-height
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Xywh;
impl BBoxFormat for Xywh {}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[serde(from = "[f32; 4]", into = "[f32; 4]", bound = "")]
pub struct BBox<F: BBoxFormat>([f32; 4], PhantomData<F>);

impl<F: BBoxFormat> From<[f32; 4]> for BBox<F> {
    #[inline]
    fn from(slice: [f32; 4]) -> Self {
        BBox(slice, PhantomData)
    }
}

impl<F: BBoxFormat> From<BBox<F>> for [f32; 4] {
    #[inline]
    fn from(bbox: BBox<F>) -> Self {
        bbox.0
    }
}

impl<F: BBoxFormat> BBox<F> {
    #[inline]
    pub fn as_slice(&self) -> &[f32; 4] {
        &self.0
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl BBox<Ltrb> {
    #[inline]
    pub fn ltrb(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        BBox([x1, y1, x2, y2], PhantomData)
    }

    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn right(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn bottom(&self) -> f32 {
        self.0[3]
    }

    /// A box is usable when every corner is finite and it has a positive area.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.is_finite() && self.left() < self.right() && self.top() < self.bottom()
    }

    #[inline]
    pub fn center(&self) -> na::Point2<f32> {
        na::Point2::new(
            (self.left() + self.right()) * 0.5,
            (self.top() + self.bottom()) * 0.5,
        )
    }

    #[inline]
    pub fn as_xywh(&self) -> BBox<Xywh> {
        self.into()
    }
}

impl BBox<Xywh> {
    #[inline(always)]
    pub fn cx(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn cy(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.0[3]
    }

    #[inline]
    pub fn as_ltrb(&self) -> BBox<Ltrb> {
        self.into()
    }
}

impl<'a> From<&'a BBox<Ltrb>> for BBox<Xywh> {
    #[inline]
    fn from(v: &'a BBox<Ltrb>) -> Self {
        Self(
            [
                v.0[0] + (v.0[2] - v.0[0]) / 2.0,
                v.0[1] + (v.0[3] - v.0[1]) / 2.0,
                v.0[2] - v.0[0],
                v.0[3] - v.0[1],
            ],
            PhantomData,
        )
    }
}

impl<'a> From<&'a BBox<Xywh>> for BBox<Ltrb> {
    #[inline]
    fn from(v: &'a BBox<Xywh>) -> Self {
        let w2 = v.0[2] / 2.0;
        let h2 = v.0[3] / 2.0;

        Self(
            [v.0[0] - w2, v.0[1] - h2, v.0[0] + w2, v.0[1] + h2],
            PhantomData,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_of_ltrb() {
        let b = BBox::ltrb(10.0, 20.0, 30.0, 60.0);
        let c = b.center();

        assert_eq!((c.x, c.y), (20.0, 40.0));
        assert!(b.is_valid());
    }

    #[test]
    fn rejects_inverted_and_nan_boxes() {
        assert!(!BBox::ltrb(30.0, 20.0, 10.0, 60.0).is_valid());
        assert!(!BBox::ltrb(10.0, 60.0, 30.0, 60.0).is_valid());
        assert!(!BBox::ltrb(f32::NAN, 0.0, 1.0, 1.0).is_valid());
    }

    #[test]
    fn xywh_conversion_keeps_center() {
        let b = BBox::ltrb(0.0, 0.0, 40.0, 20.0);
        let x = b.as_xywh();

        assert_eq!((x.cx(), x.cy(), x.width(), x.height()), (20.0, 10.0, 40.0, 20.0));
        assert_eq!(x.as_ltrb(), b);
    }

    #[test]
    fn deserializes_from_plain_array() {
        let b: BBox<Ltrb> = serde_json::from_str("[1.0, 2.0, 3.0, 4.0]").unwrap();

        assert_eq!(b.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
    }
}
