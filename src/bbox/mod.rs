//! Axis-aligned boxes and the anchor/offset box codec.
//!
//! Boxes use `(y_min, x_min, y_max, x_max)` ordering throughout, matching
//! the row-then-column convention of the feature maps.

pub mod codec;

use crate::tensor::ImageSize;

/// Axis-aligned bounding box in `(y_min, x_min, y_max, x_max)` order.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BBox {
    pub y_min: f32,
    pub x_min: f32,
    pub y_max: f32,
    pub x_max: f32,
}

impl BBox {
    pub const fn new(y_min: f32, x_min: f32, y_max: f32, x_max: f32) -> Self {
        Self {
            y_min,
            x_min,
            y_max,
            x_max,
        }
    }

    /// Builds a box from its centre and size.
    pub fn from_center(y_c: f32, x_c: f32, height: f32, width: f32) -> Self {
        Self::new(
            y_c - 0.5 * height,
            x_c - 0.5 * width,
            y_c + 0.5 * height,
            x_c + 0.5 * width,
        )
    }

    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn center_y(&self) -> f32 {
        self.y_min + 0.5 * self.height()
    }

    pub fn center_x(&self) -> f32 {
        self.x_min + 0.5 * self.width()
    }

    /// Area, zero for inverted or degenerate boxes.
    pub fn area(&self) -> f32 {
        self.height().max(0.0) * self.width().max(0.0)
    }

    /// Intersection-over-union; zero whenever the union is empty.
    pub fn iou(&self, other: &BBox) -> f32 {
        let inter_h = (self.y_max.min(other.y_max) - self.y_min.max(other.y_min)).max(0.0);
        let inter_w = (self.x_max.min(other.x_max) - self.x_min.max(other.x_min)).max(0.0);
        let inter = inter_h * inter_w;
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }

    /// Clamps the corners into `[0, height] x [0, width]`.
    pub fn clip(&self, size: ImageSize) -> BBox {
        BBox::new(
            self.y_min.max(0.0).min(size.height),
            self.x_min.max(0.0).min(size.width),
            self.y_max.max(0.0).min(size.height),
            self.x_max.max(0.0).min(size.width),
        )
    }

    /// Divides every coordinate by `scale`.
    pub fn unscale(&self, scale: f32) -> BBox {
        BBox::new(
            self.y_min / scale,
            self.x_min / scale,
            self.y_max / scale,
            self.x_max / scale,
        )
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.y_min, self.x_min, self.y_max, self.x_max]
    }
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

/// Regression offsets `(dy, dx, dh, dw)` relative to a reference box.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Delta {
    pub dy: f32,
    pub dx: f32,
    pub dh: f32,
    pub dw: f32,
}

impl Delta {
    pub const fn new(dy: f32, dx: f32, dh: f32, dw: f32) -> Self {
        Self { dy, dx, dh, dw }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.dy, self.dx, self.dh, self.dw]
    }
}

impl From<[f32; 4]> for Delta {
    fn from(v: [f32; 4]) -> Self {
        Delta::new(v[0], v[1], v[2], v[3])
    }
}

#[cfg(test)]
mod tests {
    use super::BBox;
    use crate::tensor::ImageSize;

    #[test]
    fn iou_of_shifted_boxes() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(1.0, 1.0, 11.0, 11.0);
        let expected = 81.0 / 119.0;
        assert!((a.iou(&b) - expected).abs() < 1e-6);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_area_boxes_never_overlap() {
        let point = BBox::new(5.0, 5.0, 5.0, 5.0);
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(point.iou(&a), 0.0);
        assert_eq!(point.iou(&point), 0.0);
    }

    #[test]
    fn clip_clamps_each_axis() {
        let b = BBox::new(-3.0, 4.0, 20.0, 50.0).clip(ImageSize::new(16.0, 32.0));
        assert_eq!(b, BBox::new(0.0, 4.0, 16.0, 32.0));
    }
}
