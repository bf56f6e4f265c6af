//! Bounded priority queue for commands parked while their account is offline.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{CommandPriority, TradeCommand};

/// A command awaiting transmission
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub command: TradeCommand,
    pub attempt_count: u32,
    pub next_attempt_time: Instant,
    pub priority: CommandPriority,
    pub created_at: DateTime<Utc>,
    pub expires_at: Instant,
}

impl QueuedCommand {
    pub fn new(command: TradeCommand, attempt_count: u32, expires_at: Instant) -> Self {
        Self {
            priority: command.priority,
            command,
            attempt_count,
            next_attempt_time: Instant::now(),
            created_at: Utc::now(),
            expires_at,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.next_attempt_time = Instant::now() + delay;
        self
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub fn correlation_id(&self) -> &str {
        &self.command.correlation_id
    }
}

#[derive(Debug)]
struct Prioritized {
    item: QueuedCommand,
    sequence: u64,
}

impl PartialEq for Prioritized {
    fn eq(&self, other: &Self) -> bool {
        self.item.priority == other.item.priority && self.sequence == other.sequence
    }
}

impl Eq for Prioritized {}

impl PartialOrd for Prioritized {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Prioritized {
    fn cmp(&self, other: &Self) -> Ordering {
        // Lower priority value first, then FIFO
        match other.item.priority.cmp(&self.item.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ord => ord,
        }
    }
}

/// Outcome of an enqueue that did not simply succeed
#[derive(Debug)]
pub enum Rejected {
    /// Queue full and nothing of lower priority to displace
    Full(QueuedCommand),
    Expired(QueuedCommand),
}

pub struct CommandQueue {
    heap: BinaryHeap<Prioritized>,
    sequence: u64,
    max_size: usize,
    enqueued_total: u64,
    dequeued_total: u64,
    expired_total: u64,
}

impl CommandQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            sequence: 0,
            max_size,
            enqueued_total: 0,
            dequeued_total: 0,
            expired_total: 0,
        }
    }

    /// Park a command. When full, a strictly lower-priority entry (the newest
    /// among the lowest) is displaced and returned.
    pub fn enqueue(&mut self, item: QueuedCommand) -> Result<Option<QueuedCommand>, Rejected> {
        if item.is_expired() {
            return Err(Rejected::Expired(item));
        }

        let mut displaced = None;
        if self.heap.len() >= self.max_size {
            match self.weakest_below(item.priority) {
                Some(victim) => {
                    warn!(
                        correlation_id = %victim.correlation_id(),
                        incoming = ?item.priority,
                        "queue full, displacing lower priority command"
                    );
                    displaced = Some(victim);
                }
                None => return Err(Rejected::Full(item)),
            }
        }

        let sequence = self.sequence;
        self.sequence += 1;
        debug!(
            correlation_id = %item.correlation_id(),
            priority = ?item.priority,
            "parking command"
        );
        self.heap.push(Prioritized { item, sequence });
        self.enqueued_total += 1;
        Ok(displaced)
    }

    /// Next command ready for transmission, skipping expired entries.
    pub fn dequeue(&mut self) -> Option<QueuedCommand> {
        while let Some(top) = self.heap.pop() {
            if top.item.is_expired() {
                self.expired_total += 1;
                debug!(correlation_id = %top.item.correlation_id(), "dropping expired parked command");
                continue;
            }
            self.dequeued_total += 1;
            return Some(top.item);
        }
        None
    }

    /// Remove every entry, expired or not.
    pub fn drain(&mut self) -> Vec<QueuedCommand> {
        std::mem::take(&mut self.heap)
            .into_sorted_vec()
            .into_iter()
            .rev()
            .map(|p| p.item)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            current_size: self.heap.len(),
            max_size: self.max_size,
            enqueued_total: self.enqueued_total,
            dequeued_total: self.dequeued_total,
            expired_total: self.expired_total,
        }
    }

    fn weakest_below(&mut self, priority: CommandPriority) -> Option<QueuedCommand> {
        let weakest = self.heap.iter().min()?;
        if weakest.item.priority <= priority {
            return None;
        }
        let target = weakest.sequence;
        let mut items = std::mem::take(&mut self.heap).into_vec();
        let idx = items.iter().position(|p| p.sequence == target)?;
        let victim = items.swap_remove(idx);
        self.heap = items.into();
        Some(victim.item)
    }
}

#[derive(Debug, Clone)]
pub struct QueueStats {
    pub current_size: usize,
    pub max_size: usize,
    pub enqueued_total: u64,
    pub dequeued_total: u64,
    pub expired_total: u64,
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Queue[{}/{}, enq={}, deq={}, exp={}]",
            self.current_size, self.max_size, self.enqueued_total, self.dequeued_total, self.expired_total
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CommandAction;
    use rust_decimal_macros::dec;

    fn parked(id: &str, priority: CommandPriority) -> QueuedCommand {
        let cmd = TradeCommand::market("acc", "EUR_USD", CommandAction::Buy, dec!(0.1), 5000)
            .with_correlation_id(id)
            .with_priority(priority);
        QueuedCommand::new(cmd, 0, Instant::now() + Duration::from_secs(60))
    }

    #[test]
    fn priority_then_fifo() {
        let mut queue = CommandQueue::new(10);
        queue.enqueue(parked("n1", CommandPriority::Normal)).unwrap();
        queue.enqueue(parked("low", CommandPriority::Low)).unwrap();
        queue.enqueue(parked("crit", CommandPriority::Critical)).unwrap();
        queue.enqueue(parked("n2", CommandPriority::Normal)).unwrap();

        let order: Vec<String> = std::iter::from_fn(|| queue.dequeue())
            .map(|q| q.command.correlation_id)
            .collect();
        assert_eq!(order, vec!["crit", "n1", "n2", "low"]);
    }

    #[test]
    fn full_queue_displaces_lowest_priority() {
        let mut queue = CommandQueue::new(2);
        queue.enqueue(parked("a", CommandPriority::Normal)).unwrap();
        queue.enqueue(parked("b", CommandPriority::Low)).unwrap();

        assert!(matches!(
            queue.enqueue(parked("c", CommandPriority::Low)),
            Err(Rejected::Full(_))
        ));

        let displaced = queue.enqueue(parked("d", CommandPriority::High)).unwrap();
        assert_eq!(displaced.unwrap().command.correlation_id, "b");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue().unwrap().command.correlation_id, "d");
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_skipped() {
        let mut queue = CommandQueue::new(4);
        let cmd = TradeCommand::market("acc", "EUR_USD", CommandAction::Sell, dec!(0.1), 5000)
            .with_correlation_id("short");
        queue
            .enqueue(QueuedCommand::new(cmd, 0, Instant::now() + Duration::from_millis(10)))
            .unwrap();
        queue.enqueue(parked("long", CommandPriority::Low)).unwrap();

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(queue.dequeue().unwrap().command.correlation_id, "long");
        assert_eq!(queue.stats().expired_total, 1);
    }
}
