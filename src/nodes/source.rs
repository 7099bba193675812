/// 合成数据源 (Synthetic camera + detector)
///
/// 以固定帧率发布 `rgb8` 图像和同一时间戳的检测框,
/// 目标匀速运动并在边界反弹; `dropout` 按概率漏检, 用于观察轨迹保持。
use super::{Component, NodeComponent, NodeContext};
use crate::error::{Error, Result};
use crate::msgs::{BoundingBox, BoundingBoxes, Header, Image, Time};
use crate::xbus::Publisher;
use crossbeam_channel::select;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const BACKGROUND: Rgb<u8> = Rgb([40, 40, 48]);
const FRAME_ID: &str = "camera";

/// 数据源参数
#[derive(Clone, Debug, Serialize, Deserialize, clap::Args)]
#[serde(default)]
pub struct SourceParams {
    /// 发布帧率
    #[arg(long = "source-fps", default_value_t = 30)]
    pub fps: u32,

    #[arg(long, default_value_t = 640)]
    pub width: u32,

    #[arg(long, default_value_t = 480)]
    pub height: u32,

    /// 目标数量
    #[arg(long, default_value_t = 4)]
    pub objects: usize,

    /// 随机种子
    #[arg(long, default_value_t = 7)]
    pub seed: u64,

    /// 漏检概率 (0..1)
    #[arg(long, default_value_t = 0.05)]
    pub dropout: f64,

    /// 发布帧数上限 (缺省不限)
    #[arg(long)]
    pub frames: Option<u64>,

    #[arg(long = "pub-image-topic-name", default_value = "/image_raw")]
    pub pub_image_topic_name: String,

    #[arg(long = "pub-detections-topic-name", default_value = "yolox/bounding_boxes")]
    pub pub_bboxes_topic_name: String,
}

impl Default for SourceParams {
    fn default() -> Self {
        Self {
            fps: 30,
            width: 640,
            height: 480,
            objects: 4,
            seed: 7,
            dropout: 0.05,
            frames: None,
            pub_image_topic_name: "/image_raw".to_string(),
            pub_bboxes_topic_name: "yolox/bounding_boxes".to_string(),
        }
    }
}

impl SourceParams {
    pub fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            return Err(Error::InvalidParameter {
                name: "fps",
                reason: "must be positive".to_string(),
            });
        }
        if self.width < 64 || self.height < 64 {
            return Err(Error::InvalidParameter {
                name: "width",
                reason: format!("frame {}x{} is too small", self.width, self.height),
            });
        }
        if !(0.0..=1.0).contains(&self.dropout) {
            return Err(Error::InvalidParameter {
                name: "dropout",
                reason: format!("must be within [0, 1], got {}", self.dropout),
            });
        }
        Ok(())
    }
}

/// 运动目标
#[derive(Clone, Debug)]
struct Mover {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    vx: f32,
    vy: f32,
    color: Rgb<u8>,
    class_id: &'static str,
}

impl Mover {
    fn random(rng: &mut StdRng, width: u32, height: u32) -> Self {
        let w = rng.gen_range(24.0..(width as f32 / 5.0).max(25.0));
        let h = rng.gen_range(24.0..(height as f32 / 4.0).max(25.0));
        Self {
            x: rng.gen_range(0.0..(width as f32 - w)),
            y: rng.gen_range(0.0..(height as f32 - h)),
            w,
            h,
            vx: rng.gen_range(-4.0..4.0),
            vy: rng.gen_range(-3.0..3.0),
            color: Rgb([rng.gen_range(90..255), rng.gen_range(90..255), rng.gen_range(90..255)]),
            class_id: if rng.gen_bool(0.5) { "person" } else { "car" },
        }
    }

    /// 前进一帧, 碰到边界反弹
    fn step(&mut self, width: u32, height: u32) {
        self.x += self.vx;
        self.y += self.vy;
        let max_x = width as f32 - self.w;
        let max_y = height as f32 - self.h;
        if self.x < 0.0 || self.x > max_x {
            self.vx = -self.vx;
            self.x = self.x.clamp(0.0, max_x);
        }
        if self.y < 0.0 || self.y > max_y {
            self.vy = -self.vy;
            self.y = self.y.clamp(0.0, max_y);
        }
    }

    fn to_bbox(&self, probability: f64, width: u32, height: u32) -> BoundingBox {
        BoundingBox {
            img_width: width as i64,
            img_height: height as i64,
            ..BoundingBox::new(
                self.x.round() as i64,
                self.y.round() as i64,
                (self.x + self.w).round() as i64,
                (self.y + self.h).round() as i64,
                probability,
            )
            .with_class(self.class_id)
        }
    }
}

pub struct SyntheticSource {
    ctx: NodeContext,
    params: SourceParams,
    rng: StdRng,
    movers: Vec<Mover>,
    published: u64,
    pub_image: Publisher<Image>,
    pub_bboxes: Publisher<BoundingBoxes>,
}

impl SyntheticSource {
    pub fn new(ctx: NodeContext, params: SourceParams) -> Result<Self> {
        params.validate()?;
        let mut rng = StdRng::seed_from_u64(params.seed);
        let movers = (0..params.objects)
            .map(|_| Mover::random(&mut rng, params.width, params.height))
            .collect();
        let pub_image = ctx.bus().advertise::<Image>(&params.pub_image_topic_name)?;
        let pub_bboxes = ctx
            .bus()
            .advertise::<BoundingBoxes>(&params.pub_bboxes_topic_name)?;
        info!(
            "🎥 {}: {}x{} @ {} fps, {} objects → {} + {}",
            ctx.name(),
            params.width,
            params.height,
            params.fps,
            params.objects,
            pub_image.topic(),
            pub_bboxes.topic()
        );

        Ok(Self {
            ctx,
            params,
            rng,
            movers,
            published: 0,
            pub_image,
            pub_bboxes,
        })
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    /// 生成下一帧 (图像 + 检测框, 同一时间戳)
    pub fn next_frame(&mut self, stamp: Time) -> (Image, BoundingBoxes) {
        let (width, height) = (self.params.width, self.params.height);
        let mut frame = RgbImage::from_pixel(width, height, BACKGROUND);
        let mut detections = Vec::with_capacity(self.movers.len());

        for mover in &mut self.movers {
            mover.step(width, height);
            let rect = Rect::at(mover.x.round() as i32, mover.y.round() as i32)
                .of_size(mover.w.round() as u32, mover.h.round() as u32);
            draw_filled_rect_mut(&mut frame, rect, mover.color);

            if self.rng.gen_bool(self.params.dropout) {
                continue;
            }
            let probability = self.rng.gen_range(0.55..0.98);
            detections.push(mover.to_bbox(probability, width, height));
        }

        let header = Header::new(stamp, FRAME_ID);
        let image = Image::from_rgb(header.clone(), &frame);
        let bboxes = BoundingBoxes {
            header: header.clone(),
            image_header: header,
            bounding_boxes: detections,
        };
        (image, bboxes)
    }

    fn publish_next(&mut self) {
        let (image, bboxes) = self.next_frame(Time::now());
        debug!("frame {} with {} detections", self.published, bboxes.len());
        self.pub_image.publish(image);
        self.pub_bboxes.publish(bboxes);
        self.published += 1;
    }
}

impl Component for SyntheticSource {
    fn name(&self) -> &str {
        self.ctx.name()
    }

    fn spin(&mut self) -> anyhow::Result<()> {
        let shutdown = self.ctx.shutdown().receiver();
        let period = Duration::from_secs_f64(1.0 / self.params.fps as f64);
        loop {
            if self.params.frames.is_some_and(|limit| self.published >= limit) {
                info!("{}: published {} frames, idle", self.ctx.name(), self.published);
                let _ = shutdown.recv();
                break;
            }
            select! {
                recv(shutdown) -> _ => break,
                default(period) => self.publish_next(),
            }
        }
        Ok(())
    }
}

impl NodeComponent for SyntheticSource {
    const NAME: &'static str = "synthetic_source";
    type Params = SourceParams;

    fn create(ctx: NodeContext, params: SourceParams) -> Result<Self> {
        Self::new(ctx, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::Shutdown;
    use crate::xbus::Bus;

    fn source(params: SourceParams) -> SyntheticSource {
        let ctx = NodeContext::new("synthetic_source", Bus::new(), Shutdown::new());
        SyntheticSource::new(ctx, params).unwrap()
    }

    #[test]
    fn test_frames_share_stamp_and_size() {
        let mut src = source(SourceParams {
            dropout: 0.0,
            ..Default::default()
        });
        let stamp = Time::new(5, 0);
        let (image, bboxes) = src.next_frame(stamp);
        assert_eq!(image.header.stamp, stamp);
        assert_eq!(bboxes.header.stamp, stamp);
        assert_eq!((image.width, image.height), (640, 480));
        assert_eq!(image.data.len(), 640 * 480 * 3);
        assert_eq!(bboxes.len(), 4);
        for b in &bboxes.bounding_boxes {
            assert!(b.xmin >= 0 && b.xmax <= 640 && b.ymin >= 0 && b.ymax <= 480);
            assert_eq!((b.img_width, b.img_height), (640, 480));
        }
    }

    #[test]
    fn test_seed_is_reproducible() {
        let mut a = source(SourceParams::default());
        let mut b = source(SourceParams::default());
        for i in 0..20 {
            let stamp = Time::from_millis(i * 33);
            assert_eq!(a.next_frame(stamp).1, b.next_frame(stamp).1);
        }
    }

    #[test]
    fn test_full_dropout_publishes_empty_batches() {
        let mut src = source(SourceParams {
            dropout: 1.0,
            ..Default::default()
        });
        let (_, bboxes) = src.next_frame(Time::default());
        assert!(bboxes.is_empty());
    }

    #[test]
    fn test_frame_limit_then_idle() {
        let bus = Bus::new();
        let shutdown = Shutdown::new();
        let ctx = NodeContext::new("synthetic_source", bus.clone(), shutdown.clone());
        let images = bus.subscribe::<Image>("/image_raw", 8).unwrap();
        let src = SyntheticSource::new(
            ctx,
            SourceParams {
                fps: 200,
                frames: Some(3),
                ..Default::default()
            },
        )
        .unwrap();
        let handle = crate::nodes::spawn(Box::new(src), shutdown.clone()).unwrap();

        for _ in 0..3 {
            images.receiver().recv_timeout(Duration::from_secs(2)).unwrap();
        }
        assert!(images.receiver().recv_timeout(Duration::from_millis(100)).is_err());
        shutdown.trigger();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_invalid_dropout() {
        let ctx = NodeContext::new("synthetic_source", Bus::new(), Shutdown::new());
        let err = SyntheticSource::new(ctx, SourceParams {
            dropout: 1.5,
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, Error::InvalidParameter { name: "dropout", .. }));
    }
}
