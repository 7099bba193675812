/// 显示输出 (Display)
///
/// `WindowDisplay` 把合成后的帧送到主线程的窗口 (macroquad 事件循环),
/// 并把窗口中的按键回传; `HeadlessDisplay` 用于无窗口运行与测试。
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use image::RgbImage;
use std::path::PathBuf;
use tracing::debug;

/// 窗口名称
pub const WINDOW_NAME: &str = "ByteTrackViewer";

/// 按键
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Escape,
    Char(char),
}

/// 显示接口: 显示一帧, 并非阻塞地读取一次按键
pub trait Display: Send {
    fn show(&mut self, frame: &RgbImage) -> Result<()>;

    fn poll_key(&mut self) -> Option<Key>;
}

// ========== 窗口显示 ==========

/// 视图节点一侧的窗口句柄
pub struct WindowDisplay {
    frames: Sender<RgbImage>,
    keys: Receiver<Key>,
}

/// 主线程一侧: 事件循环从这里取帧、送按键
pub struct WindowEvents {
    pub name: String,
    frames: Receiver<RgbImage>,
    keys: Sender<Key>,
    closed: bool,
}

impl WindowDisplay {
    /// Creates the window channel pair; the binary's event loop owns `WindowEvents`.
    pub fn new(name: &str) -> (Self, WindowEvents) {
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(2);
        let (key_tx, key_rx) = crossbeam_channel::bounded(16);
        (
            Self {
                frames: frame_tx,
                keys: key_rx,
            },
            WindowEvents {
                name: name.to_string(),
                frames: frame_rx,
                keys: key_tx,
                closed: false,
            },
        )
    }
}

impl Display for WindowDisplay {
    fn show(&mut self, frame: &RgbImage) -> Result<()> {
        match self.frames.try_send(frame.clone()) {
            Ok(()) => Ok(()),
            // 窗口来不及刷新时丢帧
            Err(TrySendError::Full(_)) => {
                debug!("window busy, frame skipped");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(Error::DisplayClosed),
        }
    }

    fn poll_key(&mut self) -> Option<Key> {
        self.keys.try_recv().ok()
    }
}

impl WindowEvents {
    /// Latest frame queued since the last call, if any.
    pub fn latest_frame(&mut self) -> Option<RgbImage> {
        let mut latest = None;
        loop {
            match self.frames.try_recv() {
                Ok(frame) => latest = Some(frame),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
        latest
    }

    pub fn send_key(&self, key: Key) {
        let _ = self.keys.try_send(key);
    }

    /// True once `latest_frame` has seen the viewer side dropped.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

// ========== 无窗口显示 ==========

/// 无窗口显示: 统计帧数, 可选逐帧保存为PNG
///
/// 没有键盘, `poll_key` 始终为空; 此时由关闭信号结束运行。
pub struct HeadlessDisplay {
    shown: u64,
    output_dir: Option<PathBuf>,
}

impl Default for HeadlessDisplay {
    fn default() -> Self {
        Self::new(None)
    }
}

impl HeadlessDisplay {
    pub fn new(output_dir: Option<PathBuf>) -> Self {
        Self {
            shown: 0,
            output_dir,
        }
    }

    pub fn frames_shown(&self) -> u64 {
        self.shown
    }
}

impl Display for HeadlessDisplay {
    fn show(&mut self, frame: &RgbImage) -> Result<()> {
        if let Some(dir) = &self.output_dir {
            let path = dir.join(format!("frame_{:06}.png", self.shown + 1));
            frame.save(&path)?;
        }
        self.shown += 1;
        Ok(())
    }

    fn poll_key(&mut self) -> Option<Key> {
        None
    }
}
