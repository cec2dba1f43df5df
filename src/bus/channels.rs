use std::collections::HashMap;

use super::message::ChatMessage;

/// Canonical key for a DM channel: the unordered pair of agent ids, stored
/// lexicographically so both directions resolve to the same channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DmKey(String, String);

impl DmKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self(a.to_string(), b.to_string())
        } else {
            Self(b.to_string(), a.to_string())
        }
    }

    pub fn contains(&self, agent: &str) -> bool {
        self.0 == agent || self.1 == agent
    }

    pub fn label(&self) -> String {
        format!("{}<->{}", self.0, self.1)
    }
}

/// One ordered message log with a cursor per reader.
///
/// Readers never see their own posts; a drain advances the cursor to the
/// end of the log regardless, so nothing is delivered twice.
#[derive(Debug, Default)]
pub struct Channel {
    messages: Vec<ChatMessage>,
    cursors: HashMap<String, usize>,
}

impl Channel {
    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn unread_for(&self, reader: &str) -> usize {
        let cursor = self.cursors.get(reader).copied().unwrap_or(0);
        self.messages[cursor..]
            .iter()
            .filter(|m| m.from != reader)
            .count()
    }

    pub fn drain_for(&mut self, reader: &str) -> Vec<ChatMessage> {
        let cursor = self.cursors.get(reader).copied().unwrap_or(0);
        let unread: Vec<ChatMessage> = self.messages[cursor..]
            .iter()
            .filter(|m| m.from != reader)
            .cloned()
            .collect();
        self.cursors.insert(reader.to_string(), self.messages.len());
        unread
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    pub fn forget_reader(&mut self, reader: &str) {
        self.cursors.remove(reader);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dm_key_canonical_order() {
        assert_eq!(DmKey::new("b", "a"), DmKey::new("a", "b"));
        assert!(DmKey::new("a", "b").contains("a"));
        assert!(DmKey::new("a", "b").contains("b"));
        assert!(!DmKey::new("a", "b").contains("c"));
        assert_eq!(DmKey::new("z", "a").label(), "a<->z");
    }

    #[test]
    fn test_drain_skips_own_but_advances_fully() {
        let mut channel = Channel::default();
        channel.append(ChatMessage::new("a", "dev", "mine"));
        channel.append(ChatMessage::new("b", "dev", "theirs"));

        let drained = channel.drain_for("a");
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].from, "b");

        // Cursor is at the end; nothing left even after another own post.
        channel.append(ChatMessage::new("a", "dev", "mine again"));
        assert_eq!(channel.unread_for("a"), 0);
        assert!(channel.drain_for("a").is_empty());
    }

    #[test]
    fn test_independent_cursors() {
        let mut channel = Channel::default();
        channel.append(ChatMessage::new("a", "dev", "one"));

        assert_eq!(channel.drain_for("b").len(), 1);
        assert_eq!(channel.drain_for("c").len(), 1);
        assert_eq!(channel.unread_for("b"), 0);
    }
}
