/// 跟踪节点 (ByteTrack node)
/// 职责: 订阅检测框 → 跟踪引擎 → 发布带ID的跟踪框
///
/// 每条输入消息同步产生一条输出消息; 引擎出错时丢弃该批次, 不发布。
use super::{Component, NodeComponent, NodeContext};
use crate::config::TrackerParams;
use crate::error::Result;
use crate::msgs::{BoundingBox, BoundingBoxes};
use crate::tracking::{BBox, ByteTrackConfig, ByteTracker, TrackedObject, TrackingEngine};
use crate::xbus::{Publisher, Subscription, DEFAULT_DEPTH};
use anyhow::Context;
use crossbeam_channel::select;
use std::io::{BufRead, Write};
use tracing::{debug, error, info, warn};

/// 检测框 → 引擎输入
///
/// Returns the engine objects plus the class-name table their `class_id`
/// indices refer to.
pub fn bboxes_to_objects(bboxes: &[BoundingBox]) -> (Vec<BBox>, Vec<String>) {
    let mut labels: Vec<String> = Vec::new();
    let objects = bboxes
        .iter()
        .map(|b| {
            let class_id = match labels.iter().position(|l| *l == b.class_id) {
                Some(idx) => idx,
                None => {
                    labels.push(b.class_id.clone());
                    labels.len() - 1
                }
            };
            BBox {
                x1: b.xmin as f32,
                y1: b.ymin as f32,
                x2: b.xmax as f32,
                y2: b.ymax as f32,
                confidence: b.probability as f32,
                class_id: class_id as u32,
            }
        })
        .collect();
    (objects, labels)
}

/// 引擎输出 → 跟踪框
pub fn tracks_to_bboxes(
    tracks: &[TrackedObject],
    labels: &[String],
    image_size: (i64, i64),
) -> Vec<BoundingBox> {
    tracks
        .iter()
        .map(|t| BoundingBox {
            probability: t.score as f64,
            xmin: t.bbox.x1.round() as i64,
            ymin: t.bbox.y1.round() as i64,
            xmax: t.bbox.x2.round() as i64,
            ymax: t.bbox.y2.round() as i64,
            id: t.id,
            img_width: image_size.0,
            img_height: image_size.1,
            center_dist: 0.0,
            class_id: labels
                .get(t.bbox.class_id as usize)
                .cloned()
                .unwrap_or_default(),
        })
        .collect()
}

/// 转换 + 引擎调用 (与总线无关, 便于用桩引擎测试)
pub struct TrackAdapter<E> {
    engine: E,
    processed: u64,
}

impl<E: TrackingEngine> TrackAdapter<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            processed: 0,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// One detection batch in, one tracked batch out (same headers).
    pub fn process(&mut self, msg: &BoundingBoxes) -> Result<BoundingBoxes> {
        let (objects, labels) = bboxes_to_objects(&msg.bounding_boxes);
        let tracks = self.engine.update(&objects)?;
        self.processed += 1;

        let image_size = msg
            .bounding_boxes
            .first()
            .map(|b| (b.img_width, b.img_height))
            .unwrap_or_default();

        Ok(BoundingBoxes {
            header: msg.header.clone(),
            image_header: msg.image_header.clone(),
            bounding_boxes: tracks_to_bboxes(&tracks, &labels, image_size),
        })
    }
}

/// JSON lines 转换统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// 写出的跟踪批次
    pub written: u64,
    /// 跳过的行 (格式错误或引擎失败)
    pub skipped: u64,
}

/// 逐行读取检测框批次 (JSON), 逐行写出跟踪结果
///
/// Blank lines are ignored; malformed lines and batches the engine rejects are
/// logged and skipped. Only I/O failures abort.
pub fn bridge<E, R, W>(reader: R, writer: &mut W, adapter: &mut TrackAdapter<E>) -> Result<BridgeStats>
where
    E: TrackingEngine,
    R: BufRead,
    W: Write,
{
    let mut stats = BridgeStats::default();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let batch: BoundingBoxes = match serde_json::from_str(&line) {
            Ok(batch) => batch,
            Err(e) => {
                warn!("⚠️  line {}: {}", line_no + 1, e);
                stats.skipped += 1;
                continue;
            }
        };
        match adapter.process(&batch) {
            Ok(tracked) => {
                serde_json::to_writer(&mut *writer, &tracked)?;
                writeln!(writer)?;
                stats.written += 1;
            }
            Err(e) => {
                error!("❌ line {}: batch dropped: {}", line_no + 1, e);
                stats.skipped += 1;
            }
        }
    }
    writer.flush()?;
    Ok(stats)
}

/// ByteTrack 节点
pub struct ByteTrackNode {
    ctx: NodeContext,
    params: TrackerParams,
    adapter: TrackAdapter<Box<dyn TrackingEngine>>,
    sub_bboxes: Subscription<BoundingBoxes>,
    pub_bboxes: Publisher<BoundingBoxes>,
}

impl ByteTrackNode {
    pub fn new(ctx: NodeContext, params: TrackerParams) -> Result<Self> {
        params.validate()?;
        let config = ByteTrackConfig::new(params.video_fps as u32, params.track_buffer as u32);
        info!(
            "🔍 ByteTrack: fps={} track_buffer={} (max_time_lost={})",
            config.frame_rate,
            config.track_buffer,
            config.max_time_lost()
        );
        Self::with_engine(ctx, params, Box::new(ByteTracker::new(config)))
    }

    /// Node with a caller-supplied engine.
    pub fn with_engine(
        ctx: NodeContext,
        params: TrackerParams,
        engine: Box<dyn TrackingEngine>,
    ) -> Result<Self> {
        params.validate()?;
        let sub_bboxes = ctx
            .bus()
            .subscribe::<BoundingBoxes>(&params.sub_bboxes_topic_name, DEFAULT_DEPTH)?;
        let pub_bboxes = ctx
            .bus()
            .advertise::<BoundingBoxes>(&params.pub_bboxes_topic_name)?;
        info!(
            "✅ {}: {} → {}",
            ctx.name(),
            sub_bboxes.topic(),
            pub_bboxes.topic()
        );

        Ok(Self {
            ctx,
            params,
            adapter: TrackAdapter::new(engine),
            sub_bboxes,
            pub_bboxes,
        })
    }

    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    /// 处理一批检测框
    pub fn on_bboxes(&mut self, msg: BoundingBoxes) {
        match self.adapter.process(&msg) {
            Ok(tracked) => {
                debug!(
                    "{}: {} detections → {} tracks",
                    msg.header.stamp,
                    msg.len(),
                    tracked.len()
                );
                self.pub_bboxes.publish(tracked);
            }
            Err(e) => error!("❌ {}: batch {} dropped: {}", self.ctx.name(), msg.header.stamp, e),
        }
    }
}

impl Component for ByteTrackNode {
    fn name(&self) -> &str {
        self.ctx.name()
    }

    fn spin(&mut self) -> anyhow::Result<()> {
        let shutdown = self.ctx.shutdown().receiver();
        let bboxes = self.sub_bboxes.receiver().clone();
        loop {
            select! {
                recv(bboxes) -> msg => {
                    let msg = msg.context("detection subscription closed")?;
                    self.on_bboxes(msg);
                }
                recv(shutdown) -> _ => break,
            }
        }
        info!("{}: processed {} batches", self.ctx.name(), self.adapter.processed());
        Ok(())
    }
}

impl NodeComponent for ByteTrackNode {
    const NAME: &'static str = "bytetrack_node";
    type Params = TrackerParams;

    fn create(ctx: NodeContext, params: TrackerParams) -> Result<Self> {
        Self::new(ctx, params)
    }
}
