//! 节点参数 - 命令行或JSON参数文件

use crate::error::{Error, Result};
use crate::xbus::resolve_topic_name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// 跟踪节点参数 (bytetrack_node)
#[derive(Clone, Debug, Serialize, Deserialize, clap::Args)]
#[serde(default)]
pub struct TrackerParams {
    /// 视频帧率 (决定轨迹保留时长)
    #[arg(long, default_value_t = 30)]
    pub video_fps: i32,

    /// 轨迹保留帧数
    #[arg(long, default_value_t = 30)]
    pub track_buffer: i32,

    /// 订阅的检测框主题
    #[arg(long = "sub-bboxes-topic-name", default_value = "yolox/bounding_boxes")]
    pub sub_bboxes_topic_name: String,

    /// 发布的跟踪框主题
    #[arg(long = "pub-bboxes-topic-name", default_value = "bytetrack/bounding_boxes")]
    pub pub_bboxes_topic_name: String,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            video_fps: 30,
            track_buffer: 30,
            sub_bboxes_topic_name: "yolox/bounding_boxes".to_string(),
            pub_bboxes_topic_name: "bytetrack/bounding_boxes".to_string(),
        }
    }
}

impl TrackerParams {
    pub fn validate(&self) -> Result<()> {
        if self.video_fps <= 0 {
            return Err(Error::InvalidParameter {
                name: "video_fps",
                reason: format!("must be positive, got {}", self.video_fps),
            });
        }
        if self.track_buffer <= 0 {
            return Err(Error::InvalidParameter {
                name: "track_buffer",
                reason: format!("must be positive, got {}", self.track_buffer),
            });
        }
        resolve_topic_name(&self.sub_bboxes_topic_name)?;
        resolve_topic_name(&self.pub_bboxes_topic_name)?;
        Ok(())
    }
}

/// 可视化节点参数 (bytetrack_viewer)
#[derive(Clone, Debug, Serialize, Deserialize, clap::Args)]
#[serde(default)]
pub struct ViewerParams {
    /// 时间同步队列长度
    #[arg(long, default_value_t = 5)]
    pub queue_size: usize,

    /// 严格时间戳同步 (默认近似同步)
    #[arg(long)]
    pub exact_sync: bool,

    /// 近似同步的时间容差 (毫秒)
    #[arg(long, default_value_t = 50)]
    pub sync_tolerance_ms: u64,

    /// 订阅的图像主题
    #[arg(long = "sub-image-topic-name", default_value = "/image_raw")]
    pub sub_image_topic_name: String,

    /// 订阅的跟踪框主题
    #[arg(long = "sub-bboxes-topic-name", default_value = "/bytetrack/bounding_boxes")]
    pub sub_bboxes_topic_name: String,

    /// 标签字体 (TTF/OTF),缺省时在系统字体目录中查找
    #[arg(long)]
    pub font_path: Option<PathBuf>,

    /// 无窗口运行时把合成帧保存为PNG的目录
    #[arg(long)]
    pub save_frames_dir: Option<PathBuf>,
}

impl Default for ViewerParams {
    fn default() -> Self {
        Self {
            queue_size: 5,
            exact_sync: false,
            sync_tolerance_ms: 50,
            sub_image_topic_name: "/image_raw".to_string(),
            sub_bboxes_topic_name: "/bytetrack/bounding_boxes".to_string(),
            font_path: None,
            save_frames_dir: None,
        }
    }
}

impl ViewerParams {
    pub fn validate(&self) -> Result<()> {
        if self.queue_size == 0 {
            return Err(Error::InvalidParameter {
                name: "queue_size",
                reason: "must be positive".to_string(),
            });
        }
        resolve_topic_name(&self.sub_image_topic_name)?;
        resolve_topic_name(&self.sub_bboxes_topic_name)?;
        Ok(())
    }
}

/// 参数文件: 节点名 → 参数对象
///
/// ```json
/// { "bytetrack_node": { "track_buffer": 60 }, "bytetrack_viewer": { "exact_sync": true } }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamsFile {
    pub nodes: BTreeMap<String, serde_json::Value>,
}

impl ParamsFile {
    /// 从JSON文件加载参数
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        let params: Self = serde_json::from_str(&json)?;
        info!("✅ 参数已从 {} 加载 ({} 个节点)", path.display(), params.nodes.len());
        Ok(params)
    }

    /// 保存参数到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("💾 参数已保存到 {}", path.display());
        Ok(())
    }

    /// Overrides for `node`, or an empty object when the file has none.
    pub fn node(&self, node: &str) -> serde_json::Value {
        self.nodes
            .get(node)
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()))
    }

    pub fn insert<P: Serialize>(&mut self, node: &str, params: &P) -> Result<()> {
        self.nodes
            .insert(node.to_string(), serde_json::to_value(params)?);
        Ok(())
    }

    /// Typed parameters for `node`; keys the file leaves out keep their defaults.
    pub fn get<P>(&self, node: &str) -> Result<P>
    where
        P: serde::de::DeserializeOwned,
    {
        Ok(serde_json::from_value(self.node(node))?)
    }
}
