use std::collections::BTreeMap;

/// Identifier of a scheduled playback buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub u64);

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buf-{}", self.0)
    }
}

/// A buffer handed to the output and not yet finished
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    /// Output clock time playback starts at (seconds)
    pub start: f64,
    /// Playback duration (seconds)
    pub duration: f64,
}

impl ScheduledBuffer {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// The set of in-flight scheduled buffers
///
/// Every buffer inserted leaves exactly once: through `complete` when the
/// output reports it finished, or through `drain` when playback is cut.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    next_id: u64,
    in_flight: BTreeMap<BufferId, ScheduledBuffer>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for the next buffer
    pub fn next_id(&mut self) -> BufferId {
        let id = BufferId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, buffer: ScheduledBuffer) {
        self.in_flight.insert(buffer.id, buffer);
    }

    /// Remove a naturally finished buffer. Returns false for unknown or
    /// already removed ids.
    pub fn complete(&mut self, id: BufferId) -> bool {
        self.in_flight.remove(&id).is_some()
    }

    /// Remove every buffer, in start order
    pub fn drain(&mut self) -> Vec<ScheduledBuffer> {
        std::mem::take(&mut self.in_flight).into_values().collect()
    }

    pub fn get(&self, id: BufferId) -> Option<&ScheduledBuffer> {
        self.in_flight.get(&id)
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Scheduled buffers in id (and therefore start) order
    pub fn iter(&self) -> impl Iterator<Item = &ScheduledBuffer> {
        self.in_flight.values()
    }
}
