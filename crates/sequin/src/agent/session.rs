//! Named sessions: a bounded context window and an unbounded transcript
//! persisted side by side.
//!
//! Directory layout:
//! ```text
//! sessions_dir/
//!   default_context.json
//!   default_transcript.json
//!   default_archive.jsonl      (only with an archive)
//!   default_memory.json        (only with memory functions)
//!   research_context.json
//!   research_transcript.json
//! ```

use crate::config::Config;
use crate::context::archive::Archive;
use crate::context::budget::{Budget, BudgetUsage};
use crate::context::oracle::TokenOracle;
use crate::context::window::{Admission, ContextWindow};
use crate::error::{ConfigError, SessionError};
use crate::sequence::transcript::Transcript;
use crate::{Message, Role};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CONTEXT_SUFFIX: &str = "_context.json";
const TRANSCRIPT_SUFFIX: &str = "_transcript.json";
const ARCHIVE_SUFFIX: &str = "_archive.jsonl";
const MEMORY_SUFFIX: &str = "_memory.json";

// ── SessionDirectory ───────────────────────────────────────────────

/// The directory holding every session's files.
#[derive(Debug, Clone)]
pub struct SessionDirectory {
    dir: PathBuf,
}

impl SessionDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Session names become file name prefixes, so path separators and
    /// `..` are refused.
    pub fn validate_name(name: &str) -> Result<(), ConfigError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(ConfigError::SessionName(name.to_string()));
        }
        Ok(())
    }

    pub fn context_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{CONTEXT_SUFFIX}"))
    }

    pub fn transcript_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{TRANSCRIPT_SUFFIX}"))
    }

    pub fn archive_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{ARCHIVE_SUFFIX}"))
    }

    /// Key-value store behind the memory functions.
    pub fn memory_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{MEMORY_SUFFIX}"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.context_path(name).exists() || self.transcript_path(name).exists()
    }

    /// Names of every session with a context file, sorted.
    pub fn list(&self) -> Result<Vec<String>, SessionError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SessionError::List {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_ok_and(|ft| ft.is_file()))
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .strip_suffix(CONTEXT_SUFFIX)
                    .filter(|name| !name.is_empty() && !name.starts_with('.'))
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// Remove a session's files. Returns `false` if there was nothing to remove.
    pub fn delete(&self, name: &str) -> Result<bool, SessionError> {
        Self::validate_name(name)?;
        let mut removed = false;
        for path in [
            self.context_path(name),
            self.transcript_path(name),
            self.archive_path(name),
            self.memory_path(name),
        ] {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Removed {}", path.display());
                    removed = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(SessionError::Delete { path, source }),
            }
        }
        Ok(removed)
    }
}

// ── Session ────────────────────────────────────────────────────────

/// How [`Session::load`] started the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStart {
    /// Both files loaded; the conversation continues.
    Resumed { context: usize, transcript: usize },
    /// Fresh start from the system prompt.
    Created,
}

/// One conversation: the context the backend sees plus the full transcript.
///
/// ```ignore
/// let oracle = config.context.tokenizer.build(&config.provider.model);
/// let mut session = Session::open("default", &config, oracle, None)?;
/// session.load(Message::system(&config.system_prompt))?;
/// session.enqueue(Message::user("hello"));
/// session.save()?;
/// ```
pub struct Session {
    name: String,
    context: ContextWindow,
    transcript: Transcript,
}

impl Session {
    /// Prepare a session. Nothing is read from disk until [`load`](Self::load).
    ///
    /// Fails if the name is unusable or the configured budget is invalid.
    pub fn open(
        name: &str,
        config: &Config,
        oracle: Arc<dyn TokenOracle>,
        archive: Option<Box<dyn Archive>>,
    ) -> Result<Self, SessionError> {
        SessionDirectory::validate_name(name)?;
        let budget = Budget::from_config(config)?;
        let dir = SessionDirectory::new(&config.sessions_dir);
        Ok(Self::with_budget(name, &dir, budget, oracle, archive))
    }

    /// Prepare a session with an explicit budget.
    pub fn with_budget(
        name: &str,
        dir: &SessionDirectory,
        budget: Budget,
        oracle: Arc<dyn TokenOracle>,
        archive: Option<Box<dyn Archive>>,
    ) -> Self {
        let mut context = ContextWindow::new(dir.context_path(name), budget, oracle.clone());
        if let Some(archive) = archive {
            context = context.with_archive(archive);
        }
        Self {
            name: name.to_string(),
            context,
            transcript: Transcript::new(dir.transcript_path(name), oracle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resume from disk, or start over from `system` and persist at once.
    ///
    /// When starting over fails to persist, the in-memory session is still
    /// initialized and usable; the error reports the failed write.
    pub fn load(&mut self, system: Message) -> Result<SessionStart, SessionError> {
        let context_loaded = self.context.load();
        let transcript_loaded = self.transcript.load();

        if context_loaded && transcript_loaded {
            self.context.trim_to_budget();
            info!(
                "Resumed session {} ({} context / {} transcript messages)",
                self.name,
                self.context.len(),
                self.transcript.len()
            );
            debug!("{}", self.context.usage().to_log_string());
            return Ok(SessionStart::Resumed {
                context: self.context.len(),
                transcript: self.transcript.len(),
            });
        }

        if context_loaded != transcript_loaded {
            warn!(
                "Session {} is incomplete on disk (context loaded: {context_loaded}, transcript loaded: {transcript_loaded}); starting over",
                self.name
            );
        }
        info!("Starting session {}", self.name);
        self.context.reset(system.clone());
        self.transcript.reset(system);
        self.save()?;
        Ok(SessionStart::Created)
    }

    /// Offer a message to the context and record it in the transcript.
    ///
    /// The transcript records the message even when it is too large for the
    /// context. Before [`Session::load`] nothing is recorded anywhere.
    pub fn enqueue(&mut self, message: Message) -> Admission {
        let admission = self.context.enqueue(message.clone());
        if !matches!(admission, Admission::Unanchored { .. }) {
            self.transcript.enqueue(message);
        }
        admission
    }

    /// Evict the oldest non-system message from the context by hand.
    pub fn dequeue(&mut self) -> Option<Message> {
        self.context.dequeue()
    }

    /// Persist both sequences. Both writes are always attempted.
    pub fn save(&self) -> Result<(), SessionError> {
        let context = self.context.save();
        let transcript = self.transcript.save();
        match (context, transcript) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(source), Ok(())) => Err(SessionError::Persist {
                which: "context",
                source,
            }),
            (Ok(()), Err(source)) => Err(SessionError::Persist {
                which: "transcript",
                source,
            }),
            (Err(context), Err(transcript)) => Err(SessionError::PersistBoth {
                context,
                transcript,
            }),
        }
    }

    /// The context sequence: what the backend sees.
    pub fn messages(&self) -> &[Message] {
        self.context.messages()
    }

    /// Every message ever recorded.
    pub fn history(&self) -> &[Message] {
        self.transcript.messages()
    }

    /// Transcript messages whose role is in `roles`.
    pub fn output(&self, roles: &[Role]) -> Vec<&Message> {
        self.transcript
            .messages()
            .iter()
            .filter(|m| roles.contains(&m.role()))
            .collect()
    }

    pub fn system_message(&self) -> Option<&Message> {
        self.context.system_message()
    }

    /// Replace the system prompt in both sequences.
    pub fn set_system_message(&mut self, content: impl Into<String>) {
        let system = Message::system(content);
        self.context.set_system_message(system.clone());
        self.transcript.set_system_message(system);
    }

    /// `(context tokens, transcript tokens)`.
    pub fn token_counts(&self) -> (usize, usize) {
        (self.context.token_count(), self.transcript.token_count())
    }

    pub fn usage(&self) -> BudgetUsage {
        self.context.usage()
    }

    pub fn budget(&self) -> &Budget {
        self.context.budget()
    }

    pub fn context(&self) -> &ContextWindow {
        &self.context
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::oracle::WordOracle;

    fn config(dir: &Path) -> Config {
        let mut config = Config::default().with_sessions_dir(dir);
        config.context.length = 100;
        config.context.offset = 0;
        config.chat_completions.max_tokens = 20;
        config
    }

    fn open(dir: &Path, name: &str) -> Session {
        Session::open(name, &config(dir), Arc::new(WordOracle), None).unwrap()
    }

    #[test]
    fn fresh_session_persists_system_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(dir.path(), "chat");
        let start = session.load(Message::system("be brief")).unwrap();
        assert_eq!(start, SessionStart::Created);
        assert_eq!(session.messages(), &[Message::system("be brief")]);

        let sessions = SessionDirectory::new(dir.path());
        assert!(sessions.context_path("chat").exists());
        assert!(sessions.transcript_path("chat").exists());
    }

    #[test]
    fn save_then_load_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(dir.path(), "chat");
        session.load(Message::system("sys")).unwrap();
        session.enqueue(Message::user("hello"));
        session.enqueue(Message::assistant("hi"));
        session.save().unwrap();

        let mut again = open(dir.path(), "chat");
        let start = again.load(Message::system("ignored")).unwrap();
        assert_eq!(
            start,
            SessionStart::Resumed {
                context: 3,
                transcript: 3
            }
        );
        assert_eq!(again.messages(), session.messages());
        assert_eq!(again.history(), session.history());
    }

    #[test]
    fn rejected_message_still_reaches_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(dir.path(), "chat");
        session.load(Message::system("sys")).unwrap();
        let huge = vec!["w"; 200].join(" ");
        let adm = session.enqueue(Message::user(huge));
        assert!(adm.is_rejected());
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.history().len(), 2);
    }

    #[test]
    fn enqueue_before_load_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(dir.path(), "chat");
        let adm = session.enqueue(Message::user("too early"));
        assert_eq!(adm, Admission::Unanchored { tokens: 5 });
        assert!(session.messages().is_empty());
        assert!(session.history().is_empty());

        session.load(Message::system("sys")).unwrap();
        assert!(session.enqueue(Message::user("on time")).is_appended());
        assert!(session.messages()[0].is_system());
    }

    #[test]
    fn oversized_context_is_archived_only_when_resumed() {
        use crate::context::archive::JsonlArchive;

        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionDirectory::new(dir.path());
        let mut roomy = config(dir.path());
        roomy.context.length = 1000;
        let mut big = Session::open("chat", &roomy, Arc::new(WordOracle), None).unwrap();
        big.load(Message::system("sys")).unwrap();
        for i in 0..6 {
            big.enqueue(Message::user(format!("m{i} {}", vec!["w"; 16].join(" "))));
        }
        big.save().unwrap();
        let archive = || JsonlArchive::new(sessions.archive_path("chat"), "chat");

        // Transcript gone: the session starts over and nothing is archived.
        let transcript = std::fs::read(sessions.transcript_path("chat")).unwrap();
        std::fs::remove_file(sessions.transcript_path("chat")).unwrap();
        let mut partial = Session::open(
            "chat",
            &config(dir.path()),
            Arc::new(WordOracle),
            Some(Box::new(archive())),
        )
        .unwrap();
        assert_eq!(partial.load(Message::system("sys")).unwrap(), SessionStart::Created);
        assert!(archive().records().unwrap().is_empty());

        // Both files present: the context is trimmed and the overflow archived.
        big.save().unwrap();
        std::fs::write(sessions.transcript_path("chat"), transcript).unwrap();
        let mut resumed = Session::open(
            "chat",
            &config(dir.path()),
            Arc::new(WordOracle),
            Some(Box::new(archive())),
        )
        .unwrap();
        assert!(matches!(
            resumed.load(Message::system("sys")).unwrap(),
            SessionStart::Resumed { transcript: 7, .. }
        ));
        assert!(resumed.budget().fits(resumed.token_counts().0));
        assert_eq!(archive().records().unwrap().len(), 7 - resumed.messages().len());
    }

    #[test]
    fn output_filters_by_role() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(dir.path(), "chat");
        session.load(Message::system("sys")).unwrap();
        session.enqueue(Message::user("q"));
        session.enqueue(Message::assistant("a"));
        let replies = session.output(&[Role::Assistant]);
        assert_eq!(replies, [&Message::assistant("a")]);
        assert_eq!(session.output(&[Role::User, Role::Assistant]).len(), 2);
    }

    #[test]
    fn set_system_message_updates_both() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(dir.path(), "chat");
        session.load(Message::system("old")).unwrap();
        session.enqueue(Message::user("q"));
        session.set_system_message("new");
        assert_eq!(session.messages()[0], Message::system("new"));
        assert_eq!(session.history()[0], Message::system("new"));
        assert_eq!(session.system_message(), Some(&Message::system("new")));
    }

    #[test]
    fn token_counts_cover_both_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(dir.path(), "chat");
        session.load(Message::system("sys")).unwrap();
        session.enqueue(Message::user("one two"));
        assert_eq!(session.token_counts(), (4 + 5, 4 + 5));
        session.dequeue();
        assert_eq!(session.token_counts(), (4, 9));
    }

    #[test]
    fn open_rejects_invalid_budget_and_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = config(dir.path());
        bad.chat_completions.max_tokens = 100;
        assert!(matches!(
            Session::open("chat", &bad, Arc::new(WordOracle), None),
            Err(SessionError::Config(ConfigError::NonPositiveUpperBound { .. }))
        ));
        for name in ["", "../escape", "a/b"] {
            assert!(Session::open(name, &config(dir.path()), Arc::new(WordOracle), None).is_err());
        }
    }

    #[test]
    fn malformed_context_file_starts_over() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionDirectory::new(dir.path());
        std::fs::write(sessions.context_path("chat"), "{broken").unwrap();
        std::fs::write(sessions.transcript_path("chat"), "[]").unwrap();

        let mut session = open(dir.path(), "chat");
        let start = session.load(Message::system("sys")).unwrap();
        assert_eq!(start, SessionStart::Created);
        assert_eq!(session.history(), &[Message::system("sys")]);
    }

    #[test]
    fn failed_initial_persist_is_reported_but_usable() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the sessions directory should be.
        let blocker = dir.path().join("sessions");
        std::fs::write(&blocker, "").unwrap();

        let mut session = open(&blocker, "chat");
        let err = session.load(Message::system("sys")).unwrap_err();
        assert!(matches!(err, SessionError::PersistBoth { .. }));
        assert_eq!(session.messages().len(), 1);
        assert!(session.enqueue(Message::user("still works")).is_appended());
    }

    #[test]
    fn directory_lists_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["beta", "alpha"] {
            open(dir.path(), name).load(Message::system("s")).unwrap();
        }
        let sessions = SessionDirectory::new(dir.path());
        assert_eq!(sessions.list().unwrap(), ["alpha", "beta"]);

        std::fs::write(sessions.memory_path("alpha"), "{}").unwrap();
        assert!(sessions.delete("alpha").unwrap());
        assert!(!sessions.exists("alpha"));
        assert!(!sessions.memory_path("alpha").exists());
        assert_eq!(sessions.list().unwrap(), ["beta"]);
        assert!(!sessions.delete("alpha").unwrap());
        assert!(sessions.delete("../x").is_err());
    }

    #[test]
    fn listing_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionDirectory::new(dir.path().join("nope"));
        assert!(sessions.list().unwrap().is_empty());
    }
}
