/// XBus 消息总线 (Message bus)
///
/// 按主题名发布/订阅,每个主题只承载一种消息类型。
/// 每个订阅者拥有独立的有界队列,队列满时丢弃最旧的消息 (KEEP_LAST)。
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use once_cell::sync::Lazy;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, warn};

/// Default per-subscription queue depth.
pub const DEFAULT_DEPTH: usize = 10;

static GLOBAL_BUS: Lazy<Bus> = Lazy::new(Bus::new);

/// 进程级总线
pub fn global() -> &'static Bus {
    &GLOBAL_BUS
}

/// Resolves a topic name to its absolute form.
///
/// Relative names are anchored at the root namespace, so
/// `bytetrack/bounding_boxes` and `/bytetrack/bounding_boxes` name the same topic.
pub fn resolve_topic_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty()
        || name == "/"
        || name.contains(char::is_whitespace)
        || name.contains("//")
        || name.ends_with('/')
    {
        return Err(Error::InvalidTopicName(name.to_string()));
    }
    if name.starts_with('/') {
        Ok(name.to_string())
    } else {
        Ok(format!("/{}", name))
    }
}

/// 单个订阅者的投递端
struct SubscriberSink<T> {
    tx: Sender<T>,
    // 保留一个接收端,队列满时弹出最旧消息
    overflow: Receiver<T>,
}

struct SubscriberSlot {
    id: u64,
    sink: Box<dyn Any + Send>,
}

struct TopicEntry {
    type_id: TypeId,
    type_name: &'static str,
    subscribers: Vec<SubscriberSlot>,
    dropped: u64,
}

#[derive(Default)]
struct BusInner {
    topics: Mutex<HashMap<String, TopicEntry>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, TopicEntry>> {
        // 回调不会在持锁期间执行,中毒的锁仍可安全使用
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn entry<'a, T: 'static>(
        topics: &'a mut HashMap<String, TopicEntry>,
        topic: &str,
    ) -> Result<&'a mut TopicEntry> {
        let requested = std::any::type_name::<T>();
        let entry = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicEntry {
                type_id: TypeId::of::<T>(),
                type_name: requested,
                subscribers: Vec::new(),
                dropped: 0,
            });
        if entry.type_id != TypeId::of::<T>() {
            return Err(Error::TopicTypeMismatch {
                topic: topic.to_string(),
                existing: entry.type_name,
                requested,
            });
        }
        Ok(entry)
    }

    fn unsubscribe(&self, topic: &str, id: u64) {
        let mut topics = self.topics();
        if let Some(entry) = topics.get_mut(topic) {
            entry.subscribers.retain(|slot| slot.id != id);
        }
    }
}

/// 消息总线句柄 (可克隆,共享同一组主题)
#[derive(Clone, Default)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a publisher on `topic`.
    pub fn advertise<T>(&self, topic: &str) -> Result<Publisher<T>>
    where
        T: Clone + Send + 'static,
    {
        let topic = resolve_topic_name(topic)?;
        BusInner::entry::<T>(&mut self.inner.topics(), &topic)?;
        debug!("advertised {} [{}]", topic, std::any::type_name::<T>());
        Ok(Publisher {
            bus: self.clone(),
            topic,
            _marker: std::marker::PhantomData,
        })
    }

    /// Subscribes to `topic` with a queue of `depth` messages.
    pub fn subscribe<T>(&self, topic: &str, depth: usize) -> Result<Subscription<T>>
    where
        T: Clone + Send + 'static,
    {
        if depth == 0 {
            return Err(Error::InvalidParameter {
                name: "depth",
                reason: "subscription queue depth must be positive".to_string(),
            });
        }
        let topic = resolve_topic_name(topic)?;
        let (tx, rx) = crossbeam_channel::bounded(depth);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut topics = self.inner.topics();
        let entry = BusInner::entry::<T>(&mut topics, &topic)?;
        entry.subscribers.push(SubscriberSlot {
            id,
            sink: Box::new(SubscriberSink {
                tx,
                overflow: rx.clone(),
            }),
        });
        debug!("subscribed {} [{}] depth={}", topic, std::any::type_name::<T>(), depth);

        Ok(Subscription {
            id,
            topic,
            bus: Arc::downgrade(&self.inner),
            rx,
        })
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let Ok(topic) = resolve_topic_name(topic) else {
            return 0;
        };
        self.inner
            .topics()
            .get(&topic)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    /// Messages dropped on `topic` because a subscriber queue was full.
    pub fn dropped_count(&self, topic: &str) -> u64 {
        let Ok(topic) = resolve_topic_name(topic) else {
            return 0;
        };
        self.inner
            .topics()
            .get(&topic)
            .map(|entry| entry.dropped)
            .unwrap_or(0)
    }

    fn post<T>(&self, topic: &str, msg: T) -> usize
    where
        T: Clone + Send + 'static,
    {
        let mut topics = self.inner.topics();
        let Some(entry) = topics.get_mut(topic) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dropped = 0;
        for slot in &entry.subscribers {
            let Some(sink) = slot.sink.downcast_ref::<SubscriberSink<T>>() else {
                continue;
            };
            let mut pending = msg.clone();
            loop {
                match sink.tx.try_send(pending) {
                    Ok(()) => {
                        delivered += 1;
                        break;
                    }
                    Err(TrySendError::Full(back)) => {
                        // KEEP_LAST: 丢弃最旧的一条再重试
                        if sink.overflow.try_recv().is_ok() {
                            dropped += 1;
                        }
                        pending = back;
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        }

        if dropped > 0 {
            entry.dropped += dropped;
            warn!("{}: subscriber queue full, dropped {} oldest message(s)", topic, dropped);
        }
        delivered
    }
}

/// 发布者
pub struct Publisher<T> {
    bus: Bus,
    topic: String,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> Publisher<T>
where
    T: Clone + Send + 'static,
{
    /// Posts a value copy to every subscriber; returns how many received it.
    pub fn publish(&self, msg: T) -> usize {
        self.bus.post(&self.topic, msg)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count(&self.topic)
    }
}

/// 订阅凭证 (drop 即取消订阅)
pub struct Subscription<T> {
    id: u64,
    topic: String,
    bus: Weak<BusInner>,
    rx: Receiver<T>,
}

impl<T> Subscription<T> {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn receiver(&self) -> &Receiver<T> {
        &self.rx
    }

    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(&self.topic, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_and_absolute_names_alias() {
        assert_eq!(resolve_topic_name("bytetrack/bounding_boxes").unwrap(), "/bytetrack/bounding_boxes");
        assert_eq!(resolve_topic_name("/image_raw").unwrap(), "/image_raw");
        assert!(resolve_topic_name("").is_err());
        assert!(resolve_topic_name("bad topic").is_err());
        assert!(resolve_topic_name("a//b").is_err());

        let bus = Bus::new();
        let sub = bus.subscribe::<u32>("/bytetrack/bounding_boxes", 4).unwrap();
        let publisher = bus.advertise::<u32>("bytetrack/bounding_boxes").unwrap();
        assert_eq!(publisher.publish(7), 1);
        assert_eq!(sub.try_recv(), Some(7));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let bus = Bus::new();
        let _publisher = bus.advertise::<String>("/chatter").unwrap();
        let err = bus.subscribe::<u64>("/chatter", 1).err().unwrap();
        assert!(matches!(err, Error::TopicTypeMismatch { .. }));
    }

    #[test]
    fn test_keep_last_drops_oldest() {
        let bus = Bus::new();
        let sub = bus.subscribe::<u32>("/numbers", 2).unwrap();
        let publisher = bus.advertise::<u32>("/numbers").unwrap();
        for i in 0..5 {
            publisher.publish(i);
        }
        assert_eq!(sub.try_recv(), Some(3));
        assert_eq!(sub.try_recv(), Some(4));
        assert_eq!(sub.try_recv(), None);
        assert_eq!(bus.dropped_count("/numbers"), 3);
    }

    #[test]
    fn test_every_subscriber_gets_a_copy() {
        let bus = Bus::new();
        let a = bus.subscribe::<Vec<u8>>("/frames", 1).unwrap();
        let b = bus.subscribe::<Vec<u8>>("/frames", 1).unwrap();
        let publisher = bus.advertise::<Vec<u8>>("/frames").unwrap();
        assert_eq!(publisher.publish(vec![1, 2, 3]), 2);
        assert_eq!(a.try_recv(), Some(vec![1, 2, 3]));
        assert_eq!(b.try_recv(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = Bus::new();
        let publisher = bus.advertise::<u8>("/ticks").unwrap();
        let sub = bus.subscribe::<u8>("/ticks", 1).unwrap();
        assert_eq!(publisher.subscriber_count(), 1);
        drop(sub);
        assert_eq!(publisher.subscriber_count(), 0);
        assert_eq!(publisher.publish(1), 0);
    }
}
