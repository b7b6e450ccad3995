//! Retained-message store
//!
//! One entry per topic, shared by every session of a broker.

use alloc::collections::BTreeMap;

use bytes::Bytes;

use crate::protocol::packets::PublishPacket;
use crate::protocol::QoS;
use crate::topics::TopicName;

/// Last retained publication seen on a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedPublication {
    pub topic: TopicName,
    pub payload: Bytes,
    pub qos: QoS,
    pub dup: bool,
    pub retain: bool,
    /// Present only when `qos > 0`
    pub identifier: Option<u16>,
}

impl RetainedPublication {
    pub fn from_publish(publish: &PublishPacket) -> Self {
        RetainedPublication {
            topic: publish.topic_name.clone(),
            payload: publish.payload.clone(),
            qos: publish.qos,
            dup: publish.dup,
            retain: publish.retain,
            identifier: publish.packet_id,
        }
    }

    /// PUBLISH used to hand the entry to a new subscriber
    pub fn to_publish(&self) -> PublishPacket {
        PublishPacket {
            topic_name: self.topic.clone(),
            packet_id: self.identifier,
            payload: self.payload.clone(),
            qos: self.qos,
            dup: self.dup,
            retain: self.retain,
        }
    }
}

/// Outcome of [`RetainedStore::apply`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetainedChange {
    Stored,
    Cleared,
    Unchanged,
}

#[derive(Debug, Default)]
pub struct RetainedStore {
    entries: BTreeMap<TopicName, RetainedPublication>,
}

impl RetainedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the store from an inbound publication.
    ///
    /// Non-retained publications are ignored. A retained publication with an
    /// empty payload deletes the entry for its topic.
    pub fn apply(&mut self, publish: &PublishPacket) -> RetainedChange {
        if !publish.retain {
            return RetainedChange::Unchanged;
        }
        if publish.payload.is_empty() {
            return match self.entries.remove(publish.topic_name.as_str()) {
                Some(_) => RetainedChange::Cleared,
                None => RetainedChange::Unchanged,
            };
        }
        self.entries.insert(
            publish.topic_name.clone(),
            RetainedPublication::from_publish(publish),
        );
        RetainedChange::Stored
    }

    pub fn get(&self, topic: &str) -> Option<&RetainedPublication> {
        self.entries.get(topic)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
