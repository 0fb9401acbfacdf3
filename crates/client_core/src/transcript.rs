//! Client-side display model of one open conversation.
//!
//! Messages are grouped into display blocks: consecutive messages from the
//! same side that start within [`COALESCE_WINDOW`] of a block's first
//! message are shown as one unit. Blocks stay ordered by timestamp even
//! when history and live pushes interleave.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Local, Utc};
use shared::{
    domain::{AccountSummary, ChatMessage, MessageId},
    protocol::{COALESCE_WINDOW, TRANSCRIPT_CAPACITY},
};

/// Slack, in pixels, within which the viewport still counts as at the bottom.
pub const STICK_TOLERANCE_PX: f64 = 32.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Written by the local account.
    Sent,
    /// Written by the conversation peer.
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayBlock {
    pub side: Side,
    /// Creation time of the first message in the block.
    pub started_at: DateTime<Utc>,
    pub message_ids: Vec<MessageId>,
    pub contents: Vec<String>,
}

impl DisplayBlock {
    fn new(side: Side, started_at: DateTime<Utc>, message: &ChatMessage) -> Self {
        Self {
            side,
            started_at,
            message_ids: vec![message.id],
            contents: vec![message.content.clone()],
        }
    }

    fn absorbs(&self, side: Side, at: DateTime<Utc>) -> bool {
        let window = chrono::Duration::from_std(COALESCE_WINDOW).unwrap_or(chrono::Duration::MAX);
        self.side == side && at - self.started_at < window
    }

    /// Wall-clock label: time only for today, full date and time otherwise.
    pub fn label(&self, now: DateTime<Local>) -> String {
        let local = self.started_at.with_timezone(&Local);
        if local.date_naive() == now.date_naive() {
            local.format("%H:%M:%S").to_string()
        } else {
            local.format("%Y-%m-%d %H:%M:%S").to_string()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Coalesced { block: usize },
    Inserted { block: usize },
    /// The message id is already displayed.
    Duplicate,
}

#[derive(Debug)]
pub struct Transcript {
    peer: AccountSummary,
    blocks: VecDeque<DisplayBlock>,
    seen: HashSet<MessageId>,
    capacity: usize,
    sticks: bool,
    scroll_requested: bool,
}

impl Transcript {
    pub fn new(peer: AccountSummary) -> Self {
        Self::with_capacity(peer, TRANSCRIPT_CAPACITY)
    }

    pub fn with_capacity(peer: AccountSummary, capacity: usize) -> Self {
        Self {
            peer,
            blocks: VecDeque::new(),
            seen: HashSet::new(),
            capacity: capacity.max(1),
            sticks: true,
            scroll_requested: false,
        }
    }

    pub fn peer(&self) -> &AccountSummary {
        &self.peer
    }

    pub fn blocks(&self) -> impl Iterator<Item = &DisplayBlock> {
        self.blocks.iter()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    /// Loads a fetched history, oldest first. Already shown messages are skipped.
    pub fn seed(&mut self, history: impl IntoIterator<Item = ChatMessage>) {
        for message in history {
            self.push_message(&message, false);
        }
        self.scroll_requested = self.sticks;
    }

    /// Places `message` in timestamp order, coalescing with the preceding
    /// block when it is on the same side and within the window.
    pub fn push_message(&mut self, message: &ChatMessage, should_auto_scroll: bool) -> PushOutcome {
        if !self.seen.insert(message.id) {
            return PushOutcome::Duplicate;
        }

        let side = if message.from == self.peer.id {
            Side::Received
        } else {
            Side::Sent
        };
        let at = message.created_at().unwrap_or_else(Utc::now);

        // `<=` rather than `<`: a message stamped equal to a block's start
        // coalesces into or follows that block, keeping arrival order.
        let previous = self.blocks.iter().rposition(|block| block.started_at <= at);

        let outcome = match previous {
            Some(index) if self.blocks[index].absorbs(side, at) => {
                let block = &mut self.blocks[index];
                block.message_ids.push(message.id);
                block.contents.push(message.content.clone());
                PushOutcome::Coalesced { block: index }
            }
            _ => {
                let index = previous.map_or(0, |i| i + 1);
                self.blocks.insert(index, DisplayBlock::new(side, at, message));
                let evicted = self.evict_overflow();
                PushOutcome::Inserted {
                    block: index.saturating_sub(evicted),
                }
            }
        };

        if should_auto_scroll && self.sticks {
            self.scroll_requested = true;
        }
        outcome
    }

    fn evict_overflow(&mut self) -> usize {
        let mut evicted = 0;
        while self.blocks.len() > self.capacity {
            if let Some(oldest) = self.blocks.pop_front() {
                for id in &oldest.message_ids {
                    self.seen.remove(id);
                }
                evicted += 1;
            }
        }
        evicted
    }

    /// Records the viewport geometry after the user scrolls.
    pub fn on_scroll(&mut self, client_height: f64, scroll_top: f64, scroll_height: f64) {
        self.sticks = client_height + scroll_top + STICK_TOLERANCE_PX >= scroll_height;
    }

    pub fn sticks_to_bottom(&self) -> bool {
        self.sticks
    }

    /// Whether new content arrived that should scroll the view to the
    /// bottom. Reading the flag clears it.
    pub fn take_scroll_request(&mut self) -> bool {
        std::mem::take(&mut self.scroll_requested)
    }
}

#[cfg(test)]
#[path = "tests/transcript_tests.rs"]
mod tests;
