// bytetrack-nodes 🚀 Apache-2.0 License - https://www.apache.org/licenses/LICENSE-2.0
//! ByteTrack 节点 (ByteTrack nodes)
//!
//! 检测框 → 多目标跟踪 → 带ID的跟踪框, 以及图像与跟踪框的同步叠加显示。
//! 节点之间通过进程内消息总线 (`xbus`) 通信。
pub mod config; // 节点参数
pub mod display; // 显示输出
pub mod error; // 错误类型
pub mod msgs; // 消息定义
pub mod nodes; // 节点组件
pub mod overlay; // 叠加绘制
pub mod sync; // 时间同步
pub mod tracking; // 跟踪引擎
pub mod xbus; // 消息总线

pub use crate::config::{ParamsFile, TrackerParams, ViewerParams};
pub use crate::error::{Error, Result};
pub use crate::msgs::{BoundingBox, BoundingBoxes, Header, Image, Time};
pub use crate::nodes::{load_component, ByteTrackNode, ByteTrackViewer, NodeContext, Shutdown};
pub use crate::tracking::{ByteTrackConfig, ByteTracker, TrackingEngine};
pub use crate::xbus::Bus;

use tracing_subscriber::EnvFilter;

/// 初始化日志 (`RUST_LOG` 优先, 默认 info)
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 重复初始化时忽略
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
