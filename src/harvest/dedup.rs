use std::collections::HashSet;

use crate::harvest::message::{Fingerprint, Message};

/// Filters re-observations of the same logical message. The seen-set only
/// grows; it lives exactly as long as one harvest session.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<Fingerprint>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` and records the fingerprint the first time a message is
    /// seen. Rejection leaves the set untouched.
    pub fn accept(&mut self, candidate: &Message) -> bool {
        self.seen.insert(candidate.fingerprint())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_observed_message_is_accepted_once_across_polls() {
        let mut dedup = Deduplicator::new();
        let polls = [
            vec![("0:01", "ana", "1:00", "hi"), ("0:01", "bo", "1:00", "yo")],
            vec![("0:02", "ana", "1:00", "hi"), ("0:02", "bo", "1:00", "yo")],
            vec![("0:03", "bo", "1:00", "yo"), ("0:03", "cy", "1:01", "hey")],
        ];

        let mut accepted = Vec::new();
        for poll in polls {
            for (pos, author, ts, body) in poll {
                let message = Message::new(pos, author, ts, body);
                if dedup.accept(&message) {
                    accepted.push(message);
                }
            }
        }

        let authors: Vec<&str> = accepted.iter().map(|m| m.csv_row()[1]).collect();
        assert_eq!(authors, ["ana", "bo", "cy"]);
        assert_eq!(accepted[0].csv_row()[0], "0:01");
        assert_eq!(dedup.len(), 3);
    }

    #[test]
    fn same_body_from_different_minute_is_a_new_message() {
        let mut dedup = Deduplicator::new();
        assert!(dedup.is_empty());
        assert!(dedup.accept(&Message::new("0:01", "ana", "1:00", "gg")));
        assert!(dedup.accept(&Message::new("1:01", "ana", "1:01", "gg")));
        assert!(!dedup.accept(&Message::new("1:02", "ana", "1:01", "gg")));
        assert!(!dedup.is_empty());
    }
}
