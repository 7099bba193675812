//! ByteTrack 算法实现
//! ByteTrack: Simple and effective multi-object tracking
//!
//! 核心思想:
//! 1. 高低分检测框分开处理
//! 2. 高分框优先匹配 (IOU)
//! 3. 低分框救援未匹配的轨迹
//! 4. 纯运动模型,无需外观特征

use super::kalman::KalmanBoxFilter;
use super::{compute_iou, BBox, TrackedObject, TrackingEngine};
use crate::error::{Error, Result};

/// 低分检测的下限 (低于此值直接丢弃)
const LOW_SCORE_FLOOR: f32 = 0.1;

/// 第二轮 (低分救援) 的 IOU 阈值
const LOW_MATCH_IOU: f32 = 0.5;

/// ByteTrack 参数
#[derive(Clone, Debug)]
pub struct ByteTrackConfig {
    /// 视频帧率
    pub frame_rate: u32,
    /// 轨迹保留帧数 (以30fps为基准)
    pub track_buffer: u32,
    /// 高低分检测的分界
    pub track_thresh: f32,
    /// 新建轨迹所需的最低分数
    pub high_thresh: f32,
    /// 第一轮匹配的代价阈值 (1 - IOU)
    pub match_thresh: f32,
}

impl Default for ByteTrackConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            track_buffer: 30,
            track_thresh: 0.5,
            high_thresh: 0.6,
            match_thresh: 0.8,
        }
    }
}

impl ByteTrackConfig {
    pub fn new(frame_rate: u32, track_buffer: u32) -> Self {
        Self {
            frame_rate,
            track_buffer,
            ..Default::default()
        }
    }

    /// 丢失多少帧后删除轨迹
    pub fn max_time_lost(&self) -> u32 {
        (self.frame_rate as f32 / 30.0 * self.track_buffer as f32) as u32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TrackState {
    Tracked,
    Lost,
}

/// 单条轨迹
#[derive(Clone, Debug)]
struct STrack {
    id: i64,
    bbox: BBox,
    kalman: KalmanBoxFilter,
    state: TrackState,
    frames_lost: u32,
    score: f32,
    class_id: u32,
}

impl STrack {
    fn new(id: i64, det: &BBox) -> Self {
        let kalman = KalmanBoxFilter::new(det, 0.1, 1.0);
        Self {
            id,
            bbox: kalman.bbox(),
            kalman,
            state: TrackState::Tracked,
            frames_lost: 0,
            score: det.confidence,
            class_id: det.class_id,
        }
    }

    fn predict(&mut self) {
        self.kalman.predict();
        self.bbox = self.kalman.bbox();
    }

    fn update(&mut self, det: &BBox) {
        self.kalman.update(det);
        self.bbox = self.kalman.bbox();
        self.state = TrackState::Tracked;
        self.frames_lost = 0;
        self.score = det.confidence;
        self.class_id = det.class_id;
    }

    fn mark_lost(&mut self) {
        self.state = TrackState::Lost;
        self.frames_lost += 1;
    }

    fn output(&self) -> TrackedObject {
        TrackedObject {
            id: self.id,
            bbox: BBox {
                confidence: self.score,
                class_id: self.class_id,
                ..self.bbox.clone()
            },
            score: self.score,
        }
    }
}

/// ByteTrack 追踪器
pub struct ByteTracker {
    tracks: Vec<STrack>,
    next_id: i64,
    frame_id: u64,
    max_time_lost: u32,
    config: ByteTrackConfig,
}

impl ByteTracker {
    pub fn new(config: ByteTrackConfig) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            frame_id: 0,
            max_time_lost: config.max_time_lost(),
            config,
        }
    }

    pub fn config(&self) -> &ByteTrackConfig {
        &self.config
    }

    /// 已处理的帧数
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// 内部保留的轨迹数 (含丢失中的轨迹)
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// 更新跟踪 (ByteTrack 两轮匹配)
    fn step(&mut self, detections: &[BBox]) -> Vec<TrackedObject> {
        self.frame_id += 1;

        // 1. 所有轨迹先预测
        for track in &mut self.tracks {
            track.predict();
        }

        // 2. 分离高低分检测框
        let mut high_dets = Vec::new();
        let mut low_dets = Vec::new();
        for (idx, det) in detections.iter().enumerate() {
            if det.confidence >= self.config.track_thresh {
                high_dets.push(idx);
            } else if det.confidence >= LOW_SCORE_FLOOR {
                low_dets.push(idx);
            }
        }

        let mut matched_det = vec![false; detections.len()];
        let mut matched_track = vec![false; self.tracks.len()];

        // 3. 第一轮: 高分检测 + 所有轨迹
        let all_tracks: Vec<usize> = (0..self.tracks.len()).collect();
        let first = self.associate(
            detections,
            &high_dets,
            &all_tracks,
            1.0 - self.config.match_thresh,
        );
        for (det_idx, track_idx) in first {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(&detections[det_idx]);
        }

        // 4. 第二轮: 低分检测 + 未匹配的跟踪中轨迹 (救援)
        let remaining: Vec<usize> = (0..self.tracks.len())
            .filter(|&idx| !matched_track[idx] && self.tracks[idx].state == TrackState::Tracked)
            .collect();
        let second = self.associate(detections, &low_dets, &remaining, LOW_MATCH_IOU);
        for (det_idx, track_idx) in second {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(&detections[det_idx]);
        }

        // 5. 未匹配的轨迹 → 标记丢失
        for (track, matched) in self.tracks.iter_mut().zip(&matched_track) {
            if !matched {
                track.mark_lost();
            }
        }

        // 6. 未匹配的高分检测 → 新建轨迹
        for &det_idx in &high_dets {
            let det = &detections[det_idx];
            if !matched_det[det_idx] && det.confidence >= self.config.high_thresh {
                self.tracks.push(STrack::new(self.next_id, det));
                self.next_id += 1;
            }
        }

        // 7. 删除丢失太久的轨迹
        let max_time_lost = self.max_time_lost;
        self.tracks.retain(|t| t.frames_lost <= max_time_lost);

        self.tracks
            .iter()
            .filter(|t| t.state == TrackState::Tracked)
            .map(STrack::output)
            .collect()
    }

    /// IOU 贪心匹配, 返回 (检测索引, 轨迹索引)
    fn associate(
        &self,
        detections: &[BBox],
        det_indices: &[usize],
        track_indices: &[usize],
        min_iou: f32,
    ) -> Vec<(usize, usize)> {
        if det_indices.is_empty() || track_indices.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for &det_idx in det_indices {
            for &track_idx in track_indices {
                // 轨迹框已在本帧预测过
                let iou = compute_iou(&detections[det_idx], &self.tracks[track_idx].bbox);
                if iou > min_iou {
                    candidates.push((1.0 - iou, det_idx, track_idx));
                }
            }
        }

        // 按代价排序, 相同代价保持插入顺序
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut used_det = vec![false; detections.len()];
        let mut used_track = vec![false; self.tracks.len()];
        let mut assignments = Vec::new();
        for (_, det_idx, track_idx) in candidates {
            if !used_det[det_idx] && !used_track[track_idx] {
                used_det[det_idx] = true;
                used_track[track_idx] = true;
                assignments.push((det_idx, track_idx));
            }
        }
        assignments
    }
}

impl TrackingEngine for ByteTracker {
    fn update(&mut self, detections: &[BBox]) -> Result<Vec<TrackedObject>> {
        if let Some(bad) = detections.iter().find(|d| !d.is_finite()) {
            return Err(Error::Engine(format!("non-finite detection {:?}", bad)));
        }
        Ok(self.step(detections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, score: f32) -> BBox {
        BBox::new(x, y, x + 40.0, y + 40.0, score)
    }

    #[test]
    fn test_max_time_lost_scales_with_fps() {
        assert_eq!(ByteTrackConfig::new(30, 30).max_time_lost(), 30);
        assert_eq!(ByteTrackConfig::new(60, 30).max_time_lost(), 60);
        assert_eq!(ByteTrackConfig::new(15, 30).max_time_lost(), 15);
    }

    #[test]
    fn test_keeps_id_for_moving_object() {
        let mut tracker = ByteTracker::new(ByteTrackConfig::default());
        let mut ids = Vec::new();
        for step in 0..10 {
            let out = tracker.update(&[det(10.0 + step as f32 * 2.0, 10.0, 0.9)]).unwrap();
            assert_eq!(out.len(), 1);
            ids.push(out[0].id);
        }
        assert!(ids.iter().all(|&id| id == 1));
    }

    #[test]
    fn test_two_objects_get_distinct_ids() {
        let mut tracker = ByteTracker::new(ByteTrackConfig::default());
        let out = tracker
            .update(&[det(10.0, 10.0, 0.9), det(200.0, 200.0, 0.8)])
            .unwrap();
        let ids: Vec<i64> = out.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_low_score_detection_rescues_track() {
        let mut tracker = ByteTracker::new(ByteTrackConfig::default());
        tracker.update(&[det(10.0, 10.0, 0.9)]).unwrap();
        let out = tracker.update(&[det(11.0, 10.0, 0.3)]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, 1);
        assert!((out[0].score - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_low_score_detection_never_starts_track() {
        let mut tracker = ByteTracker::new(ByteTrackConfig::default());
        assert!(tracker.update(&[det(10.0, 10.0, 0.3)]).unwrap().is_empty());
        assert_eq!(tracker.track_count(), 0);
    }

    #[test]
    fn test_lost_track_recovers_within_buffer() {
        let mut tracker = ByteTracker::new(ByteTrackConfig::default());
        tracker.update(&[det(10.0, 10.0, 0.9)]).unwrap();
        for _ in 0..5 {
            assert!(tracker.update(&[]).unwrap().is_empty());
        }
        let out = tracker.update(&[det(10.0, 10.0, 0.9)]).unwrap();
        assert_eq!(out[0].id, 1);
    }

    #[test]
    fn test_lost_track_expires_after_buffer() {
        let mut tracker = ByteTracker::new(ByteTrackConfig::new(30, 30));
        tracker.update(&[det(10.0, 10.0, 0.9)]).unwrap();
        for _ in 0..30 {
            tracker.update(&[]).unwrap();
        }
        assert_eq!(tracker.track_count(), 1);
        tracker.update(&[]).unwrap();
        assert_eq!(tracker.track_count(), 0);

        let out = tracker.update(&[det(10.0, 10.0, 0.9)]).unwrap();
        assert_eq!(out[0].id, 2);
    }

    #[test]
    fn test_deterministic_ids() {
        let frames: Vec<Vec<BBox>> = (0..20)
            .map(|i| {
                let shift = i as f32 * 3.0;
                vec![
                    det(10.0 + shift, 10.0, 0.9),
                    det(300.0 - shift, 120.0, 0.7),
                    det(150.0, 300.0 + shift, if i % 4 == 0 { 0.2 } else { 0.8 }),
                ]
            })
            .collect();

        let run = || {
            let mut tracker = ByteTracker::new(ByteTrackConfig::default());
            frames
                .iter()
                .map(|f| tracker.update(f).unwrap().iter().map(|t| t.id).collect::<Vec<_>>())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_non_finite_input_is_engine_error() {
        let mut tracker = ByteTracker::new(ByteTrackConfig::default());
        let err = tracker
            .update(&[BBox::new(f32::NAN, 0.0, 10.0, 10.0, 0.9)])
            .unwrap_err();
        assert!(matches!(err, Error::Engine(_)));
        assert_eq!(tracker.frame_id(), 0);
    }
}
