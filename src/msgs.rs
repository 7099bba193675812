/// 消息定义 (Message definitions)
///
/// 与 bboxes_ex_msgs / sensor_msgs 相同的字段布局,
/// 在总线上按值传递,跨进程时序列化为 JSON。
use serde::{Deserialize, Serialize};
use std::fmt;

const NANOS_PER_SEC: i64 = 1_000_000_000;

// ========== 时间戳 ==========

/// 消息时间戳 (sec + nanosec)
///
/// Always normalized (`nanosec < 1e9`), so the derived ordering agrees with
/// `as_nanos`. Deserialization normalizes too.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(from = "RawTime")]
pub struct Time {
    pub sec: i32,
    pub nanosec: u32,
}

/// 未规范化的时间戳 (反序列化用)
#[derive(Default, Deserialize)]
#[serde(default)]
struct RawTime {
    sec: i32,
    nanosec: u32,
}

impl From<RawTime> for Time {
    fn from(raw: RawTime) -> Self {
        Time::new(raw.sec, raw.nanosec)
    }
}

impl Time {
    pub fn new(sec: i32, nanosec: u32) -> Self {
        Self::from_nanos(sec as i64 * NANOS_PER_SEC + nanosec as i64)
    }

    pub fn from_nanos(nanos: i64) -> Self {
        Self {
            sec: nanos.div_euclid(NANOS_PER_SEC) as i32,
            nanosec: nanos.rem_euclid(NANOS_PER_SEC) as u32,
        }
    }

    pub fn from_millis(millis: i64) -> Self {
        Self::from_nanos(millis * 1_000_000)
    }

    pub fn as_nanos(&self) -> i64 {
        self.sec as i64 * NANOS_PER_SEC + self.nanosec as i64
    }

    /// Absolute distance between two stamps in nanoseconds.
    pub fn abs_diff_nanos(&self, other: &Time) -> u64 {
        self.as_nanos().abs_diff(other.as_nanos())
    }

    /// Wall-clock time.
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            sec: now.timestamp() as i32,
            nanosec: now.timestamp_subsec_nanos().min(NANOS_PER_SEC as u32 - 1),
        }
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nanosec)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Header {
    pub stamp: Time,
    pub frame_id: String,
}

impl Header {
    pub fn new(stamp: Time, frame_id: impl Into<String>) -> Self {
        Self {
            stamp,
            frame_id: frame_id.into(),
        }
    }
}

// ========== 检测框 ==========

/// 检测框 / 跟踪框
///
/// `id` stays 0 on detections; the tracker node fills it in.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundingBox {
    pub probability: f64,
    pub xmin: i64,
    pub ymin: i64,
    pub xmax: i64,
    pub ymax: i64,
    pub id: i64,
    pub img_width: i64,
    pub img_height: i64,
    pub center_dist: f64,
    pub class_id: String,
}

impl BoundingBox {
    pub fn new(xmin: i64, ymin: i64, xmax: i64, ymax: i64, probability: f64) -> Self {
        Self {
            probability,
            xmin,
            ymin,
            xmax,
            ymax,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    pub fn with_class(mut self, class_id: impl Into<String>) -> Self {
        self.class_id = class_id.into();
        self
    }

    pub fn width(&self) -> i64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> i64 {
        self.ymax - self.ymin
    }
}

/// 一帧的检测框 / 跟踪框批次
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundingBoxes {
    pub header: Header,
    pub image_header: Header,
    pub bounding_boxes: Vec<BoundingBox>,
}

impl BoundingBoxes {
    pub fn new(stamp: Time, bounding_boxes: Vec<BoundingBox>) -> Self {
        Self {
            header: Header::new(stamp, ""),
            image_header: Header::new(stamp, ""),
            bounding_boxes,
        }
    }

    pub fn len(&self) -> usize {
        self.bounding_boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounding_boxes.is_empty()
    }
}

// ========== 图像 ==========

/// 原始图像帧 (sensor_msgs/Image)
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Image {
    pub header: Header,
    pub height: u32,
    pub width: u32,
    pub encoding: String,
    pub is_bigendian: u8,
    pub step: u32,
    pub data: Vec<u8>,
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("header", &self.header)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("encoding", &self.encoding)
            .field("step", &self.step)
            .field("data", &format_args!("[{} bytes]", self.data.len()))
            .finish()
    }
}

impl Image {
    /// Packs an RGB buffer into an `rgb8` message.
    pub fn from_rgb(header: Header, frame: &image::RgbImage) -> Self {
        Self {
            header,
            height: frame.height(),
            width: frame.width(),
            encoding: "rgb8".to_string(),
            is_bigendian: 0,
            step: frame.width() * 3,
            data: frame.as_raw().clone(),
        }
    }
}

/// 带时间戳的消息 (用于时间同步)
pub trait Stamped {
    fn stamp(&self) -> Time;
}

impl Stamped for Image {
    fn stamp(&self) -> Time {
        self.header.stamp
    }
}

impl Stamped for BoundingBoxes {
    fn stamp(&self) -> Time {
        self.header.stamp
    }
}
