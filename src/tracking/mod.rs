/// 多目标跟踪引擎 (Multi-object tracking engine)
///
/// 适配层只通过 `TrackingEngine` 与引擎交互:
/// 一帧检测框输入,当前存活的轨迹输出。
pub mod bytetrack;
pub mod kalman;

pub use bytetrack::{ByteTrackConfig, ByteTracker};

use crate::error::Result;

/// 检测框 (引擎原生表示)
#[derive(Clone, Debug, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: u32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id: 0,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite()
            && self.y1.is_finite()
            && self.x2.is_finite()
            && self.y2.is_finite()
            && self.confidence.is_finite()
    }
}

/// 跟踪结果 (引擎输出)
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedObject {
    /// 引擎分配的持久ID
    pub id: i64,
    pub bbox: BBox,
    pub score: f32,
}

/// 多目标跟踪器接口
///
/// 引擎状态随每次调用演进,必须按帧到达顺序串行调用。
pub trait TrackingEngine: Send {
    /// Feeds one frame of detections, returns the tracks alive after it.
    fn update(&mut self, detections: &[BBox]) -> Result<Vec<TrackedObject>>;
}

impl<E: TrackingEngine + ?Sized> TrackingEngine for Box<E> {
    fn update(&mut self, detections: &[BBox]) -> Result<Vec<TrackedObject>> {
        (**self).update(detections)
    }
}

/// 计算两个边界框的IOU (Intersection over Union)
pub fn compute_iou(a: &BBox, b: &BBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let union = a.width() * a.height() + b.width() * b.height() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((compute_iou(&a, &a) - 1.0).abs() < 1e-6);

        let b = BBox::new(5.0, 0.0, 15.0, 10.0, 1.0);
        assert!((compute_iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);

        let far = BBox::new(20.0, 20.0, 30.0, 30.0, 1.0);
        assert_eq!(compute_iou(&a, &far), 0.0);
    }
}
