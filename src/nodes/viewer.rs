/// 跟踪可视化节点 (ByteTrack viewer)
/// 职责: 图像 + 跟踪框 → 时间同步 → 叠加绘制 → 显示
///
/// 按 Esc 触发全局关闭。
use super::{Component, NodeComponent, NodeContext};
use crate::config::ViewerParams;
use crate::display::{Display, HeadlessDisplay, Key};
use crate::error::Result;
use crate::msgs::{BoundingBoxes, Image};
use crate::overlay::Overlay;
use crate::sync::{SyncPolicy, Synchronizer};
use crate::xbus::Subscription;
use anyhow::Context;
use crossbeam_channel::{select, Receiver};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info};

/// 无消息时的最长等待, 之后检查按键
const KEY_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct Connection {
    image: Subscription<Image>,
    bboxes: Subscription<BoundingBoxes>,
}

pub struct ByteTrackViewer {
    ctx: NodeContext,
    params: ViewerParams,
    connection: Mutex<Option<Connection>>,
    sync: Synchronizer<Image, BoundingBoxes>,
    overlay: Overlay,
    display: Box<dyn Display>,
    rendered: u64,
}

impl ByteTrackViewer {
    /// Viewer drawing into `display`; subscriptions are set up immediately.
    pub fn with_display(
        ctx: NodeContext,
        params: ViewerParams,
        display: Box<dyn Display>,
    ) -> Result<Self> {
        params.validate()?;
        let overlay = Overlay::with_font_search(params.font_path.as_deref())?;
        let policy = SyncPolicy::from_params(params.exact_sync, params.sync_tolerance_ms);
        info!(
            "🖼️  {}: {:?}, queue_size={}",
            ctx.name(),
            policy,
            params.queue_size
        );

        let viewer = Self {
            sync: Synchronizer::new(policy, params.queue_size),
            ctx,
            params,
            connection: Mutex::new(None),
            overlay,
            display,
            rendered: 0,
        };
        viewer.connect()?;
        Ok(viewer)
    }

    /// 建立订阅 (只建立一次), 返回两路接收端
    pub fn connect(&self) -> Result<(Receiver<Image>, Receiver<BoundingBoxes>)> {
        let mut connection = self.connection.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(c) = connection.as_ref() {
            return Ok((c.image.receiver().clone(), c.bboxes.receiver().clone()));
        }
        let bus = self.ctx.bus();
        let image = bus.subscribe::<Image>(&self.params.sub_image_topic_name, self.params.queue_size)?;
        let bboxes = bus.subscribe::<BoundingBoxes>(
            &self.params.sub_bboxes_topic_name,
            self.params.queue_size,
        )?;
        info!("✅ {}: {} + {}", self.ctx.name(), image.topic(), bboxes.topic());
        let receivers = (image.receiver().clone(), bboxes.receiver().clone());
        *connection = Some(Connection { image, bboxes });
        Ok(receivers)
    }

    pub fn rendered(&self) -> u64 {
        self.rendered
    }

    pub fn on_image(&mut self, msg: Image) -> anyhow::Result<()> {
        match self.sync.add_first(msg) {
            Some((image, tracks)) => self.on_pair(&image, &tracks),
            None => Ok(()),
        }
    }

    pub fn on_bboxes(&mut self, msg: BoundingBoxes) -> anyhow::Result<()> {
        match self.sync.add_second(msg) {
            Some((image, tracks)) => self.on_pair(&image, &tracks),
            None => Ok(()),
        }
    }

    /// 绘制并显示一对同步消息
    fn on_pair(&mut self, image: &Image, tracks: &BoundingBoxes) -> anyhow::Result<()> {
        let frame = match self.overlay.render(image, tracks) {
            Ok(frame) => frame,
            Err(e) => {
                error!("❌ {}: frame {} dropped: {}", self.ctx.name(), image.header.stamp, e);
                return Ok(());
            }
        };
        self.display.show(&frame).context("display")?;
        self.rendered += 1;
        debug!(
            "rendered {} with {} tracks",
            image.header.stamp,
            tracks.len()
        );
        self.handle_keys();
        Ok(())
    }

    fn handle_keys(&mut self) {
        while let Some(key) = self.display.poll_key() {
            if key == Key::Escape {
                info!("{}: escape pressed", self.ctx.name());
                self.ctx.shutdown().trigger();
            }
        }
    }
}

impl Component for ByteTrackViewer {
    fn name(&self) -> &str {
        self.ctx.name()
    }

    fn spin(&mut self) -> anyhow::Result<()> {
        let (images, bboxes) = self.connect()?;
        let shutdown = self.ctx.shutdown().receiver();
        loop {
            select! {
                recv(images) -> msg => self.on_image(msg.context("image subscription closed")?)?,
                recv(bboxes) -> msg => self.on_bboxes(msg.context("track subscription closed")?)?,
                recv(shutdown) -> _ => break,
                default(KEY_POLL_INTERVAL) => {}
            }
            // 消息持续到达但始终未配对时也要响应按键
            self.handle_keys();
        }
        info!(
            "{}: rendered {} frames, {} unmatched messages dropped",
            self.ctx.name(),
            self.rendered,
            self.sync.dropped_count()
        );
        Ok(())
    }
}

impl NodeComponent for ByteTrackViewer {
    const NAME: &'static str = "bytetrack_viewer";
    type Params = ViewerParams;

    /// Registry instances render headless; the viewer binary passes a window.
    fn create(ctx: NodeContext, params: ViewerParams) -> Result<Self> {
        if let Some(dir) = &params.save_frames_dir {
            std::fs::create_dir_all(dir)?;
            info!("💾 {}: frames → {}", ctx.name(), dir.display());
        }
        let display = HeadlessDisplay::new(params.save_frames_dir.clone());
        Self::with_display(ctx, params, Box::new(display))
    }
}
