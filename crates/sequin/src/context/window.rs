//! Bounded context window with FIFO eviction.
//!
//! [`ContextWindow`] is the sequence the backend actually sees. It keeps
//! `offset + count(sequence) <= upper_bound` after every enqueue by evicting
//! the oldest non-system message (always index 1) until the new message fits.
//! The system message at index 0 is never evicted. If it alone already
//! exhausts the budget the new message is appended anyway and a warning is
//! logged. Until a system message sits at index 0 only a system message is
//! admitted.

use crate::Message;
use crate::context::archive::Archive;
use crate::context::budget::{Budget, BudgetUsage};
use crate::context::oracle::TokenOracle;
use crate::error::StoreError;
use crate::sequence::store::SequenceStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of offering a message to the context window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The message was appended after evicting `evicted` older messages.
    Appended { evicted: usize, tokens: usize },
    /// The message alone exceeds the upper bound. The sequence is unchanged.
    Rejected { tokens: usize, upper_bound: usize },
    /// There is no system message at index 0 to anchor a non-system message.
    /// The sequence is unchanged.
    Unanchored { tokens: usize },
}

impl Admission {
    pub fn is_appended(&self) -> bool {
        matches!(self, Admission::Appended { .. })
    }

    /// The message was not appended, for whatever reason.
    pub fn is_rejected(&self) -> bool {
        !self.is_appended()
    }

    /// Token cost of the offered message.
    pub fn tokens(&self) -> usize {
        match *self {
            Admission::Appended { tokens, .. }
            | Admission::Rejected { tokens, .. }
            | Admission::Unanchored { tokens } => tokens,
        }
    }
}

/// The token-bounded working context of a session.
pub struct ContextWindow {
    store: SequenceStore,
    budget: Budget,
    oracle: Arc<dyn TokenOracle>,
    archive: Option<Box<dyn Archive>>,
}

impl ContextWindow {
    pub fn new(path: impl Into<PathBuf>, budget: Budget, oracle: Arc<dyn TokenOracle>) -> Self {
        Self {
            store: SequenceStore::new(path),
            budget,
            oracle,
            archive: None,
        }
    }

    /// Hand evicted messages to `archive`.
    pub fn with_archive(mut self, archive: Box<dyn Archive>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Offer a message, evicting from the front until it fits.
    pub fn enqueue(&mut self, message: Message) -> Admission {
        let tokens = self.oracle.count_message(&message);
        if self.system_message().is_none() && !message.is_system() {
            debug!("Refused {} message: no system message at index 0", message.role());
            return Admission::Unanchored { tokens };
        }
        let upper_bound = self.budget.upper_bound();
        if tokens > upper_bound {
            debug!("Rejected {} message of {tokens} tokens (upper bound {upper_bound})", message.role());
            return Admission::Rejected {
                tokens,
                upper_bound,
            };
        }

        let mut total = self.token_count();
        let mut evicted = 0;
        while !self.budget.fits(tokens + total) && self.store.len() > 1 {
            let Some(old) = self.store.pop(1) else {
                break;
            };
            total = total.saturating_sub(self.oracle.count_message(&old));
            self.hand_off(&old);
            evicted += 1;
        }

        if !self.budget.fits(tokens + total) {
            warn!(
                "Context over budget with only the system message left ({} + {tokens} tokens, offset {}, upper bound {upper_bound}); appending anyway",
                total,
                self.budget.offset()
            );
        }
        if evicted > 0 {
            debug!("Evicted {evicted} message(s) to admit {tokens} tokens");
        }

        self.store.append(message);
        Admission::Appended { evicted, tokens }
    }

    /// Evict the oldest non-system message by hand.
    pub fn dequeue(&mut self) -> Option<Message> {
        if self.store.len() < 2 {
            return None;
        }
        let old = self.store.pop(1)?;
        self.hand_off(&old);
        Some(old)
    }

    fn hand_off(&mut self, message: &Message) {
        if let Some(archive) = self.archive.as_mut()
            && let Err(e) = archive.archive(message)
        {
            warn!("Failed to archive evicted {} message: {e}", message.role());
        }
    }

    /// Tokens in the current sequence (offset not included).
    pub fn token_count(&self) -> usize {
        self.oracle.count_messages(self.store.messages())
    }

    pub fn usage(&self) -> BudgetUsage {
        self.budget.usage(self.token_count())
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    pub fn system_message(&self) -> Option<&Message> {
        self.store.get(0).filter(|m| m.is_system())
    }

    /// Replace the system message, or put one in front if there is none.
    pub fn set_system_message(&mut self, message: Message) {
        if self.system_message().is_some() {
            self.store.update(0, message);
        } else {
            self.store.insert(0, message);
        }
    }

    /// Discard everything and start over from `system`.
    pub fn reset(&mut self, system: Message) {
        self.store.clear();
        self.store.append(system);
    }

    /// Load the persisted sequence.
    ///
    /// Fails without touching memory if the file is missing or malformed, or
    /// if it does not start with a system message. The loaded sequence may
    /// exceed the current budget; see [`ContextWindow::trim_to_budget`].
    pub fn load(&mut self) -> bool {
        let mut loaded = SequenceStore::new(self.store.path());
        if !loaded.load() {
            return false;
        }
        if !loaded.get(0).is_some_and(Message::is_system) {
            warn!(
                "Sequence at {} does not start with a system message",
                loaded.path().display()
            );
            return false;
        }
        self.store = loaded;
        true
    }

    /// Evict from the front until the sequence fits the budget, archiving
    /// what goes. Returns the number of messages removed.
    pub fn trim_to_budget(&mut self) -> usize {
        let mut total = self.token_count();
        let mut trimmed = 0;
        while !self.budget.fits(total) && self.store.len() > 1 {
            let Some(old) = self.store.pop(1) else {
                break;
            };
            total = total.saturating_sub(self.oracle.count_message(&old));
            self.hand_off(&old);
            trimmed += 1;
        }
        if trimmed > 0 {
            debug!("Trimmed {trimmed} message(s) from the context to fit the budget");
        }
        trimmed
    }

    pub fn save(&self) -> Result<(), StoreError> {
        self.store.save()
    }

    /// The sequence as the backend sees it.
    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn store(&self) -> &SequenceStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::oracle::WordOracle;
    use crate::error::ArchiveError;
    use std::sync::Mutex;

    /// A user message costing exactly `n` word-oracle tokens (`n >= 4`).
    fn user(n: usize, tag: &str) -> Message {
        let mut words = vec![tag.to_string()];
        words.extend(std::iter::repeat_n("w".to_string(), n - 4));
        Message::user(words.join(" "))
    }

    fn system(n: usize) -> Message {
        Message::system(vec!["s"; n - 3].join(" "))
    }

    #[derive(Clone, Default)]
    struct MemoryArchive(Arc<Mutex<Vec<Message>>>);

    impl Archive for MemoryArchive {
        fn archive(&mut self, message: &Message) -> Result<(), ArchiveError> {
            self.0.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct BrokenArchive;

    impl Archive for BrokenArchive {
        fn archive(&mut self, _: &Message) -> Result<(), ArchiveError> {
            Err(ArchiveError::Unavailable("offline".into()))
        }
    }

    fn window(dir: &std::path::Path, budget: Budget) -> ContextWindow {
        ContextWindow::new(dir.join("w_context.json"), budget, Arc::new(WordOracle))
    }

    fn tags(w: &ContextWindow) -> Vec<String> {
        w.messages()
            .iter()
            .skip(1)
            .filter_map(|m| m.content())
            .map(|c| c.split_whitespace().next().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn helpers_produce_exact_costs() {
        assert_eq!(WordOracle.count_message(&user(10, "a")), 10);
        assert_eq!(WordOracle.count_message(&system(10)), 10);
    }

    #[test]
    fn scenario_fill_then_evict_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = window(dir.path(), Budget::new(100, 20, 5, 0.1).unwrap());
        assert_eq!(w.budget().upper_bound(), 80);
        w.reset(system(10));

        for i in 0..6 {
            let adm = w.enqueue(user(10, &format!("m{i}")));
            assert_eq!(adm, Admission::Appended { evicted: 0, tokens: 10 });
        }
        assert_eq!(w.token_count(), 70);

        let adm = w.enqueue(user(20, "big"));
        assert_eq!(adm, Admission::Appended { evicted: 2, tokens: 20 });
        assert_eq!(tags(&w), ["m2", "m3", "m4", "m5", "big"]);
        assert!(w.messages()[0].is_system());
        assert!(w.budget().fits(w.token_count()));
    }

    #[test]
    fn unanchored_window_refuses_non_system_messages() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = window(dir.path(), Budget::new(100, 20, 0, 0.0).unwrap());
        for i in 0..30 {
            let adm = w.enqueue(user(10, &format!("m{i}")));
            assert_eq!(adm, Admission::Unanchored { tokens: 10 });
            assert!(adm.is_rejected());
        }
        assert!(w.is_empty());

        assert!(w.enqueue(system(10)).is_appended());
        for i in 0..30 {
            assert!(w.enqueue(user(10, &format!("m{i}"))).is_appended());
            assert!(w.messages()[0].is_system());
            assert!(w.budget().fits(w.token_count()));
        }
    }

    #[test]
    fn set_system_message_anchors_empty_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = window(dir.path(), Budget::new(100, 20, 0, 0.0).unwrap());
        w.set_system_message(system(10));
        assert!(w.enqueue(user(10, "a")).is_appended());
        assert_eq!(w.len(), 2);
        assert!(w.messages()[0].is_system());
    }

    #[test]
    fn fifo_evicts_exactly_the_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = window(dir.path(), Budget::new(100, 20, 0, 0.1).unwrap());
        w.reset(system(20));
        w.enqueue(user(20, "m1"));
        w.enqueue(user(20, "m2"));
        w.enqueue(user(20, "m3"));
        assert_eq!(w.token_count(), 80);

        let adm = w.enqueue(user(20, "m4"));
        assert_eq!(adm, Admission::Appended { evicted: 1, tokens: 20 });
        assert_eq!(tags(&w), ["m2", "m3", "m4"]);
    }

    #[test]
    fn oversized_message_is_rejected_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = window(dir.path(), Budget::new(100, 20, 5, 0.1).unwrap());
        w.reset(system(10));
        w.enqueue(user(10, "keep"));
        let before = w.messages().to_vec();

        let adm = w.enqueue(user(90, "huge"));
        assert_eq!(
            adm,
            Admission::Rejected {
                tokens: 90,
                upper_bound: 80
            }
        );
        assert!(adm.is_rejected());
        assert_eq!(w.messages(), before.as_slice());
    }

    #[test]
    fn message_exactly_at_upper_bound_is_admitted() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = window(dir.path(), Budget::new(100, 20, 0, 0.1).unwrap());
        w.reset(system(10));
        w.enqueue(user(10, "a"));
        let adm = w.enqueue(user(80, "full"));
        assert!(adm.is_appended());
        // Everything but the system message had to go, and that still isn't enough.
        assert_eq!(w.len(), 2);
        assert_eq!(tags(&w), ["full"]);
    }

    #[test]
    fn best_effort_when_only_system_remains() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = window(dir.path(), Budget::new(100, 20, 0, 0.1).unwrap());
        w.reset(system(70));
        let adm = w.enqueue(user(20, "over"));
        assert_eq!(adm, Admission::Appended { evicted: 0, tokens: 20 });
        assert_eq!(w.len(), 2);
        assert!(!w.budget().fits(w.token_count()));

        // The next message evicts the overflow and the bound holds again.
        let adm = w.enqueue(user(5, "small"));
        assert_eq!(adm, Admission::Appended { evicted: 1, tokens: 5 });
        assert!(w.budget().fits(w.token_count()));
    }

    #[test]
    fn system_survives_any_number_of_evictions() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = window(dir.path(), Budget::new(60, 10, 3, 0.0).unwrap());
        w.reset(system(8));
        for i in 0..200 {
            w.enqueue(user(4 + i % 13, &format!("m{i}")));
            assert!(w.messages()[0].is_system());
            assert!(w.budget().fits(w.token_count()) || w.len() == 1);
        }
    }

    #[test]
    fn archive_receives_evictions_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let archive = MemoryArchive::default();
        let seen = archive.0.clone();
        let mut w = window(dir.path(), Budget::new(100, 20, 5, 0.1).unwrap())
            .with_archive(Box::new(archive));
        w.reset(system(10));
        for i in 0..6 {
            w.enqueue(user(10, &format!("m{i}")));
        }
        w.enqueue(user(20, "big"));

        let archived = seen.lock().unwrap();
        assert_eq!(archived.len(), 2);
        assert!(archived[0].content().unwrap().starts_with("m0"));
        assert!(archived[1].content().unwrap().starts_with("m1"));
    }

    #[test]
    fn archive_failure_does_not_block_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = window(dir.path(), Budget::new(100, 20, 0, 0.1).unwrap())
            .with_archive(Box::new(BrokenArchive));
        w.reset(system(20));
        for i in 0..3 {
            w.enqueue(user(20, &format!("m{i}")));
        }
        let adm = w.enqueue(user(20, "m3"));
        assert_eq!(adm, Admission::Appended { evicted: 1, tokens: 20 });
        assert_eq!(tags(&w), ["m1", "m2", "m3"]);
    }

    #[test]
    fn dequeue_removes_oldest_non_system() {
        let dir = tempfile::tempdir().unwrap();
        let archive = MemoryArchive::default();
        let seen = archive.0.clone();
        let mut w = window(dir.path(), Budget::new(100, 20, 0, 0.1).unwrap())
            .with_archive(Box::new(archive));
        w.reset(system(10));
        assert!(w.dequeue().is_none());

        w.enqueue(user(5, "a"));
        w.enqueue(user(5, "b"));
        let gone = w.dequeue().unwrap();
        assert!(gone.content().unwrap().starts_with('a'));
        assert_eq!(tags(&w), ["b"]);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn load_trims_to_current_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut big = window(dir.path(), Budget::new(1000, 20, 0, 0.1).unwrap());
        big.reset(system(10));
        for i in 0..6 {
            big.enqueue(user(20, &format!("m{i}")));
        }
        big.save().unwrap();

        let archive = MemoryArchive::default();
        let seen = archive.0.clone();
        let mut small = window(dir.path(), Budget::new(100, 20, 0, 0.1).unwrap())
            .with_archive(Box::new(archive));
        assert!(small.load());
        assert_eq!(small.len(), 7);
        assert!(seen.lock().unwrap().is_empty());

        assert_eq!(small.trim_to_budget(), 3);
        assert!(small.budget().fits(small.token_count()));
        assert_eq!(tags(&small), ["m3", "m4", "m5"]);
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert_eq!(small.trim_to_budget(), 0);
    }

    #[test]
    fn load_requires_leading_system_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w_context.json");
        std::fs::write(&path, r#"[{"role": "user", "content": "no system"}]"#).unwrap();

        let mut w = window(dir.path(), Budget::new(100, 20, 0, 0.1).unwrap());
        w.reset(system(10));
        assert!(!w.load());
        assert_eq!(w.len(), 1);
        assert!(w.messages()[0].is_system());
    }

    #[test]
    fn set_system_message_replaces_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = window(dir.path(), Budget::new(100, 20, 0, 0.1).unwrap());
        w.reset(Message::system("old"));
        w.enqueue(user(5, "a"));
        w.set_system_message(Message::system("new"));
        assert_eq!(w.len(), 2);
        assert_eq!(w.system_message().and_then(|m| m.content()), Some("new"));
    }

    #[test]
    fn usage_reflects_offset() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = window(dir.path(), Budget::new(100, 20, 8, 0.1).unwrap());
        w.reset(system(32));
        let usage = w.usage();
        assert_eq!(usage.tokens, 32);
        assert!((usage.usage_pct - 0.5).abs() < f64::EPSILON);
    }
}
