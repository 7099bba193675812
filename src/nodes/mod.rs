/// 节点组件 (Node components)
///
/// 每个节点在自己的线程上串行处理订阅消息,通过 XBus 通信:
/// - SyntheticSource: 合成相机 + 检测框 (演示数据源)
/// - ByteTrackNode:   检测框 → 跟踪框
/// - ByteTrackViewer: 图像 + 跟踪框 → 叠加显示
///
/// 组件通过 `register_components!` 注册,可按名称加载。
pub mod bytetrack_node;
pub mod source;
pub mod viewer;

pub use bytetrack_node::{ByteTrackNode, TrackAdapter};
pub use source::{SourceParams, SyntheticSource};
pub use viewer::ByteTrackViewer;

use crate::error::{Error, Result};
use crate::xbus::Bus;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{error, info};

// ========== 关闭信号 ==========

struct ShutdownInner {
    triggered: AtomicBool,
    // 发送端被丢弃后,所有接收端立即就绪
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

/// 进程级关闭信号 (可克隆,重复触发无副作用)
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(ShutdownInner {
                triggered: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
                rx,
            }),
        }
    }

    pub fn trigger(&self) {
        if !self.inner.triggered.swap(true, Ordering::SeqCst) {
            info!("🛑 shutdown requested");
        }
        let mut tx = self.inner.tx.lock().unwrap_or_else(|e| e.into_inner());
        tx.take();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Becomes ready (disconnected) once shutdown is triggered; use in `select!`.
    pub fn receiver(&self) -> Receiver<()> {
        self.inner.rx.clone()
    }
}

// ========== 节点上下文 ==========

/// 节点运行环境: 名称、总线、关闭信号
#[derive(Clone)]
pub struct NodeContext {
    name: String,
    bus: Bus,
    shutdown: Shutdown,
}

impl NodeContext {
    pub fn new(name: impl Into<String>, bus: Bus, shutdown: Shutdown) -> Self {
        Self {
            name: name.into(),
            bus,
            shutdown,
        }
    }

    /// Same bus and shutdown signal, different node name.
    pub fn child(&self, name: impl Into<String>) -> Self {
        Self::new(name, self.bus.clone(), self.shutdown.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }
}

// ========== 组件接口 ==========

/// 可运行的节点
pub trait Component: Send {
    fn name(&self) -> &str;

    /// Processes messages until shutdown.
    fn spin(&mut self) -> anyhow::Result<()>;
}

/// 可按名称加载的节点
pub trait NodeComponent: Component + Sized + 'static {
    const NAME: &'static str;
    type Params: serde::de::DeserializeOwned;

    fn create(ctx: NodeContext, params: Self::Params) -> Result<Self>;
}

/// 注册表条目
pub struct ComponentFactory {
    pub name: &'static str,
    pub create: fn(NodeContext, serde_json::Value) -> Result<Box<dyn Component>>,
}

/// 注册组件 (生成静态注册表 `COMPONENTS`)
#[macro_export]
macro_rules! register_components {
    ($($component:ty),* $(,)?) => {
        pub static COMPONENTS: &[$crate::nodes::ComponentFactory] = &[
            $($crate::nodes::ComponentFactory {
                name: <$component as $crate::nodes::NodeComponent>::NAME,
                create: $crate::nodes::factory::<$component>,
            }),*
        ];
    };
}

#[doc(hidden)]
pub fn factory<C: NodeComponent>(
    ctx: NodeContext,
    params: serde_json::Value,
) -> Result<Box<dyn Component>> {
    let params: C::Params = serde_json::from_value(params)?;
    Ok(Box::new(C::create(ctx, params)?))
}

register_components!(SyntheticSource, ByteTrackNode, ByteTrackViewer);

/// 按名称加载组件; `params` 中缺省的键使用默认值
pub fn load_component(
    name: &str,
    ctx: NodeContext,
    params: serde_json::Value,
) -> Result<Box<dyn Component>> {
    let factory = COMPONENTS
        .iter()
        .find(|f| f.name == name)
        .ok_or_else(|| Error::UnknownComponent(name.to_string()))?;
    info!("📦 loading component {}", factory.name);
    (factory.create)(ctx, params)
}

/// 在独立线程上运行组件; 组件出错时触发全局关闭
pub fn spawn(
    mut component: Box<dyn Component>,
    shutdown: Shutdown,
) -> Result<JoinHandle<anyhow::Result<()>>> {
    let handle = std::thread::Builder::new()
        .name(component.name().to_string())
        .spawn(move || {
            let result = component.spin();
            if let Err(e) = &result {
                error!("❌ {} exited: {:#}", component.name(), e);
                shutdown.trigger();
            }
            result
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_shutdown_wakes_receivers() {
        let shutdown = Shutdown::new();
        let rx = shutdown.receiver();
        assert!(rx.recv_timeout(Duration::from_millis(10)).is_err());
        assert!(!shutdown.is_triggered());

        shutdown.trigger();
        shutdown.trigger();
        assert!(shutdown.is_triggered());
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(1)),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn test_registry_names() {
        let names: Vec<&str> = COMPONENTS.iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["synthetic_source", "bytetrack_node", "bytetrack_viewer"]);
    }

    #[test]
    fn test_unknown_component() {
        let ctx = NodeContext::new("x", Bus::new(), Shutdown::new());
        let err = load_component("nope", ctx, serde_json::json!({})).err().unwrap();
        assert!(matches!(err, Error::UnknownComponent(_)));
    }

    #[test]
    fn test_load_component_with_overrides() {
        let bus = Bus::new();
        let ctx = NodeContext::new("bytetrack_node", bus.clone(), Shutdown::new());
        let node = load_component(
            "bytetrack_node",
            ctx,
            serde_json::json!({ "sub_bboxes_topic_name": "/detections" }),
        )
        .unwrap();
        assert_eq!(node.name(), "bytetrack_node");
        assert_eq!(bus.subscriber_count("/detections"), 1);
    }

    #[test]
    fn test_invalid_params_fail_at_startup() {
        let ctx = NodeContext::new("bytetrack_node", Bus::new(), Shutdown::new());
        let err = load_component("bytetrack_node", ctx, serde_json::json!({ "video_fps": 0 }))
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidParameter { name: "video_fps", .. }));
    }
}
