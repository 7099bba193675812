//! 边界框卡尔曼滤波 (Box Kalman filter)
//!
//! 状态向量: [cx, cy, w, h, vx, vy, vw, vh], 协方差简化为对角阵。

use super::BBox;

#[derive(Clone, Debug)]
pub struct KalmanBoxFilter {
    state: [f32; 8],
    p: [f32; 8],
    /// 过程噪声
    q: f32,
    /// 观测噪声
    r: f32,
}

impl KalmanBoxFilter {
    pub fn new(bbox: &BBox, q: f32, r: f32) -> Self {
        let (cx, cy) = bbox.center();
        Self {
            state: [cx, cy, bbox.width(), bbox.height(), 0.0, 0.0, 0.0, 0.0],
            p: [10.0; 8],
            q,
            r,
        }
    }

    /// 匀速运动模型
    pub fn predict(&mut self) {
        for i in 0..4 {
            self.state[i] += self.state[i + 4];
        }
        for p in &mut self.p {
            *p += self.q;
        }
    }

    pub fn update(&mut self, bbox: &BBox) {
        let (cx, cy) = bbox.center();
        let residual = [
            cx - self.state[0],
            cy - self.state[1],
            bbox.width() - self.state[2],
            bbox.height() - self.state[3],
        ];

        let mut gain = [0.0f32; 8];
        for i in 0..8 {
            // 速度分量信任度更低
            let r = if i < 4 { self.r } else { self.r * 5.0 };
            gain[i] = self.p[i] / (self.p[i] + r);
        }

        for i in 0..4 {
            self.state[i] += gain[i] * residual[i];
            self.state[i + 4] += gain[i + 4] * residual[i];
        }
        for i in 0..8 {
            self.p[i] *= 1.0 - gain[i];
        }
    }

    /// 当前状态的边界框
    pub fn bbox(&self) -> BBox {
        Self::to_bbox(self.state[0], self.state[1], self.state[2], self.state[3])
    }

    fn to_bbox(cx: f32, cy: f32, w: f32, h: f32) -> BBox {
        let w = w.max(1.0);
        let h = h.max(1.0);
        BBox::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stationary_box_stays_put() {
        let bbox = BBox::new(10.0, 10.0, 50.0, 50.0, 0.9);
        let mut kf = KalmanBoxFilter::new(&bbox, 0.1, 1.0);
        for _ in 0..10 {
            kf.predict();
            kf.update(&bbox);
        }
        let out = kf.bbox();
        assert!((out.x1 - 10.0).abs() < 0.5);
        assert!((out.y2 - 50.0).abs() < 0.5);
    }

    #[test]
    fn test_learns_velocity() {
        let mut kf = KalmanBoxFilter::new(&BBox::new(0.0, 0.0, 10.0, 10.0, 1.0), 0.1, 1.0);
        for step in 1..=20 {
            kf.predict();
            let x = step as f32 * 2.0;
            kf.update(&BBox::new(x, 0.0, x + 10.0, 10.0, 1.0));
        }
        // 预测后框应沿运动方向前移
        let before = kf.bbox().x1;
        kf.predict();
        assert!(kf.bbox().x1 > before);
    }
}
