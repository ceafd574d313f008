/// Axis-aligned bounding box in frame pixels.
///
/// Stored as top-left corner plus size. Detections arrive either as corner
/// pairs (TLBR) or as centre/size (the YOLO head layout); both are converted
/// here so the rest of the crate only ever sees one representation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    /// Top-left x coordinate
    pub x: f32,
    /// Top-left y coordinate
    pub y: f32,
    /// Width of the bounding box
    pub width: f32,
    /// Height of the bounding box
    pub height: f32,
}

impl Rect {
    /// Create a new Rect from top-left coordinates and dimensions.
    #[inline]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a Rect from corner coordinates (x_min, y_min, x_max, y_max).
    #[inline]
    pub fn from_tlbr(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    /// Create a Rect from its centre point and size.
    #[inline]
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self {
            x: cx - width / 2.0,
            y: cy - height / 2.0,
            width,
            height,
        }
    }

    /// Corner coordinates: (x_min, y_min, x_max, y_max).
    #[inline]
    pub fn to_tlbr(&self) -> [f32; 4] {
        [self.x, self.y, self.x + self.width, self.y + self.height]
    }

    #[inline]
    pub fn x_max(&self) -> f32 {
        self.x + self.width
    }

    #[inline]
    pub fn y_max(&self) -> f32 {
        self.y + self.height
    }

    /// Get the center point of the bounding box.
    #[inline]
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Scale both axes independently, e.g. from model space back to frame space.
    pub fn scale(&self, sx: f32, sy: f32) -> Rect {
        Rect::new(self.x * sx, self.y * sy, self.width * sx, self.height * sy)
    }

    /// Clip the box to a `width` x `height` frame.
    ///
    /// A box entirely outside the frame collapses to zero area on the nearest edge.
    pub fn clamp_to(&self, width: f32, height: f32) -> Rect {
        let x1 = self.x.clamp(0.0, width);
        let y1 = self.y.clamp(0.0, height);
        let x2 = self.x_max().clamp(0.0, width);
        let y2 = self.y_max().clamp(0.0, height);
        Rect::from_tlbr(x1, y1, x2.max(x1), y2.max(y1))
    }

    /// Calculate Intersection over Union (IoU) with another bounding box.
    pub fn iou(&self, other: &Rect) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.x_max().min(other.x_max());
        let y2 = self.y_max().min(other.y_max());

        let inter_width = (x2 - x1).max(0.0);
        let inter_height = (y2 - y1).max(0.0);
        let inter_area = inter_width * inter_height;

        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }
}
