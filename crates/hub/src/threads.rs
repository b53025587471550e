//! Thread context buffering for orgs in `mention` mode.
//!
//! Thread messages that do not mention the agent are held per (org, thread)
//! and handed back as context once a message does.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

/// A thread message held while waiting for a mention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedMessage {
    pub sender: String,
    pub content: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ThreadOutcome {
    /// Held as context; nothing to deliver yet.
    Buffered,
    /// The agent was mentioned; `context` holds the messages that preceded it.
    Mentioned { context: Vec<BufferedMessage> },
}

#[derive(Debug, Default)]
struct ThreadBuffer {
    messages: VecDeque<BufferedMessage>,
    /// Value of the context clock when the thread last saw a message.
    touched: u64,
}

/// Bounded per-thread buffers. The oldest message is evicted past
/// `limit`; past `max_threads` threads the least recently active thread is
/// dropped whole.
#[derive(Debug)]
pub struct ThreadContext {
    limit: usize,
    max_threads: usize,
    clock: u64,
    buffers: HashMap<(String, String), ThreadBuffer>,
}

impl ThreadContext {
    pub fn new(limit: usize, max_threads: usize) -> Self {
        Self {
            limit,
            max_threads,
            clock: 0,
            buffers: HashMap::new(),
        }
    }

    /// Record a thread message. A mention drains the thread's buffer.
    pub fn observe(
        &mut self,
        org: &str,
        thread_id: &str,
        message: BufferedMessage,
        mentioned: bool,
    ) -> ThreadOutcome {
        let key = (org.to_string(), thread_id.to_string());
        if mentioned {
            let context = self
                .buffers
                .remove(&key)
                .map(|buffer| Vec::from(buffer.messages))
                .unwrap_or_default();
            return ThreadOutcome::Mentioned { context };
        }

        if self.limit == 0 || self.max_threads == 0 {
            return ThreadOutcome::Buffered;
        }
        if !self.buffers.contains_key(&key) && self.buffers.len() >= self.max_threads {
            self.evict_idlest();
        }
        self.clock += 1;
        let buffer = self.buffers.entry(key).or_default();
        buffer.touched = self.clock;
        buffer.messages.push_back(message);
        while buffer.messages.len() > self.limit {
            buffer.messages.pop_front();
        }
        ThreadOutcome::Buffered
    }

    pub fn buffered(&self, org: &str, thread_id: &str) -> usize {
        self.buffers
            .get(&(org.to_string(), thread_id.to_string()))
            .map_or(0, |buffer| buffer.messages.len())
    }

    pub fn threads(&self) -> usize {
        self.buffers.len()
    }

    /// Drop every buffer. Returns how many messages were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.buffers.values().map(|b| b.messages.len()).sum();
        self.buffers.clear();
        dropped
    }

    fn evict_idlest(&mut self) {
        let Some(key) = self
            .buffers
            .iter()
            .min_by_key(|(_, buffer)| buffer.touched)
            .map(|(key, _)| key.clone())
        else {
            return;
        };
        if let Some(buffer) = self.buffers.remove(&key) {
            debug!(
                org = %key.0,
                thread = %key.1,
                dropped = buffer.messages.len(),
                "evicted idle thread context"
            );
        }
    }
}

/// Whether `content` addresses the agent as `@<name>` (case-insensitive) or
/// `@<id>`.
pub fn mentions_agent(content: &str, agent_name: &str, agent_id: Option<&str>) -> bool {
    let lowered = content.to_lowercase();
    let name = format!("@{}", agent_name.to_lowercase());
    if !agent_name.is_empty() && contains_handle(&lowered, &name) {
        return true;
    }
    agent_id
        .filter(|id| !id.is_empty())
        .is_some_and(|id| contains_handle(content, &format!("@{id}")))
}

/// Substring match that refuses to stop inside a longer handle
/// (`@bot` does not match `@bothelper`).
fn contains_handle(haystack: &str, handle: &str) -> bool {
    haystack.match_indices(handle).any(|(idx, _)| {
        haystack[idx + handle.len()..]
            .chars()
            .next()
            .is_none_or(|c| !(c.is_alphanumeric() || c == '_' || c == '-'))
    })
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn msg(sender: &str, content: &str) -> BufferedMessage {
        BufferedMessage {
            sender: sender.into(),
            content: content.into(),
        }
    }

    #[rstest]
    #[case("@relay-bot what now?", true)]
    #[case("hey @Relay-Bot", true)]
    #[case("ping @relay-bot.", true)]
    #[case("@relay-bothelper", false)]
    #[case("relay-bot without at", false)]
    #[case("cc @a-1", true)]
    #[case("cc @a-10", false)]
    fn mention_detection(#[case] content: &str, #[case] expected: bool) {
        assert_eq!(mentions_agent(content, "relay-bot", Some("a-1")), expected);
    }

    #[test]
    fn mention_returns_context_in_order_and_clears() {
        let mut ctx = ThreadContext::new(50, 10);
        assert_eq!(
            ctx.observe("acme", "t-1", msg("alice", "one"), false),
            ThreadOutcome::Buffered
        );
        ctx.observe("acme", "t-1", msg("bob", "two"), false);
        ctx.observe("acme", "t-2", msg("bob", "elsewhere"), false);

        assert_eq!(
            ctx.observe("acme", "t-1", msg("carol", "@bot?"), true),
            ThreadOutcome::Mentioned {
                context: vec![msg("alice", "one"), msg("bob", "two")],
            }
        );
        assert_eq!(ctx.buffered("acme", "t-1"), 0);
        assert_eq!(ctx.buffered("acme", "t-2"), 1);
    }

    #[test]
    fn buffers_are_bounded() {
        let mut ctx = ThreadContext::new(3, 10);
        for i in 0..5 {
            ctx.observe("acme", "t-1", msg("alice", &i.to_string()), false);
        }
        assert_eq!(ctx.buffered("acme", "t-1"), 3);
        let ThreadOutcome::Mentioned { context } = ctx.observe("acme", "t-1", msg("bob", "@bot"), true)
        else {
            panic!("expected mention");
        };
        let contents: Vec<_> = context.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["2", "3", "4"]);
    }

    #[test]
    fn orgs_do_not_share_buffers() {
        let mut ctx = ThreadContext::new(10, 10);
        ctx.observe("acme", "t-1", msg("alice", "a"), false);
        ctx.observe("beta", "t-1", msg("alice", "b"), false);
        assert_eq!(ctx.buffered("acme", "t-1"), 1);
        assert_eq!(ctx.clear(), 2);
        assert_eq!(ctx.buffered("beta", "t-1"), 0);
    }

    #[test]
    fn least_recently_active_thread_is_dropped_past_the_thread_cap() {
        let mut ctx = ThreadContext::new(10, 2);
        ctx.observe("acme", "t-1", msg("alice", "a"), false);
        ctx.observe("acme", "t-2", msg("alice", "b"), false);
        ctx.observe("acme", "t-1", msg("bob", "c"), false);
        ctx.observe("acme", "t-3", msg("alice", "d"), false);

        assert_eq!(ctx.threads(), 2);
        assert_eq!(ctx.buffered("acme", "t-1"), 2);
        assert_eq!(ctx.buffered("acme", "t-2"), 0);
        assert_eq!(ctx.buffered("acme", "t-3"), 1);
    }
}
