use std::collections::HashMap;

use crate::broker::message::Message;
use crate::broker::topic::TopicPattern;

/// Bounded store of the last retained message per topic.
///
/// Each topic keeps at most one retained message: a later retained publish
/// overwrites the earlier one, and a retained publish with a `null` payload
/// clears the slot. When the store is full, inserting a new topic evicts
/// the least recently used entry, where both writes and replays count as
/// use.
#[derive(Debug)]
pub struct RetainedStore {
    capacity: usize,
    entries: HashMap<String, RetainedEntry>,
    touch_seq: u64,
    evictions: u64,
}

#[derive(Debug)]
struct RetainedEntry {
    message: Message,
    touched: u64,
}

impl RetainedStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            touch_seq: 0,
            evictions: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries evicted to make room since the store was created.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Stores the message as its topic's retained value.
    ///
    /// A `null` payload clears the topic instead. Returns `true` when the
    /// store now holds a value for the topic.
    pub fn store(&mut self, msg: &Message) -> bool {
        if msg.data.is_null() {
            self.entries.remove(&msg.topic);
            return false;
        }

        if self.capacity == 0 {
            return false;
        }

        let is_new = !self.entries.contains_key(&msg.topic);
        if is_new && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        self.touch_seq += 1;
        self.entries.insert(
            msg.topic.clone(),
            RetainedEntry {
                message: msg.clone(),
                touched: self.touch_seq,
            },
        );
        true
    }

    /// Removes the retained value for a topic. Returns whether one existed.
    pub fn remove(&mut self, topic: &str) -> bool {
        self.entries.remove(topic).is_some()
    }

    /// Removes every entry, or only entries whose topic matches a pattern.
    /// Returns how many were removed.
    pub fn clear(&mut self, pattern: Option<&TopicPattern>) -> usize {
        match pattern {
            None => {
                let removed = self.entries.len();
                self.entries.clear();
                removed
            }
            Some(pattern) => {
                let before = self.entries.len();
                self.entries.retain(|topic, _| !pattern.matches(topic));
                before - self.entries.len()
            }
        }
    }

    /// Returns the retained message for an exact topic, marking it used.
    pub fn get(&mut self, topic: &str) -> Option<Message> {
        self.touch_seq += 1;
        let entry = self.entries.get_mut(topic)?;
        entry.touched = self.touch_seq;
        Some(entry.message.clone())
    }

    /// Returns retained messages whose topics match the pattern, marking
    /// each one used. Results are ordered by topic name so replay order is
    /// stable.
    pub fn matching(&mut self, pattern: &TopicPattern) -> Vec<Message> {
        let mut topics: Vec<String> = self
            .entries
            .keys()
            .filter(|t| pattern.matches(t))
            .cloned()
            .collect();
        topics.sort();

        let mut found = Vec::with_capacity(topics.len());
        for topic in topics {
            if let Some(entry) = self.entries.get_mut(&topic) {
                self.touch_seq += 1;
                entry.touched = self.touch_seq;
                found.push(entry.message.clone());
            }
        }
        found
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.touched)
            .map(|(t, _)| t.clone());
        if let Some(topic) = oldest {
            self.entries.remove(&topic);
            self.evictions += 1;
        }
    }
}
