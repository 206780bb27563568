//! # Mutation Stacks
//!
//! Every field of a row is a [`MutationStack`]: the value read from the
//! database at the bottom, followed by the tentative edits of one or more
//! editing sessions.
//!
//! ```text
//!   top ─►  ("Zed",  session 7)     ← current value
//!           ("Zoe",  session 5)
//!   [0] ─►  ("Anna", session 0)     ← original, as read
//! ```
//!
//! ## Why Stacks?
//!
//! Several logical callers may edit the same in-memory dataset without
//! knowing about each other. Instead of locking, every edit is tagged with the
//! session that made it. When a session synchronizes, the stacks tell exactly
//! whose edits a row carries:
//!
//! - only mine: safe to write
//! - only others': not my business, skip the row
//! - both: writing would publish someone else's tentative edit, refuse
//!
//! ## Invariants
//!
//! - A stack is never empty
//! - Entry 0 always carries [`SessionId::ORIGINAL`]

use std::fmt;

use crate::value::Value;

// =============================================================================
// Session Identification
// =============================================================================

/// Identifies the logical editing session that produced an edit.
///
/// Session 0 ([`SessionId::ORIGINAL`]) is the unconditioned session: it owns
/// the original values and may also edit directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SessionId(u32);

impl SessionId {
    /// The session that owns original values.
    pub const ORIGINAL: SessionId = SessionId(0);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SessionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

// =============================================================================
// Mutation Classification
// =============================================================================

/// Whose edits a field or row carries, seen from one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MixedMutation {
    /// No edits at all.
    NoMutation,
    /// Only edits of the asking session.
    MyMutation,
    /// Only edits of other sessions.
    OnlyOthers,
    /// Edits of the asking session and of others.
    Mixed,
}

impl MixedMutation {
    /// Folds another classification into this one.
    pub fn combine(self, other: MixedMutation) -> MixedMutation {
        use MixedMutation::*;
        match (self, other) {
            (Mixed, _) | (_, Mixed) => Mixed,
            (MyMutation, OnlyOthers) | (OnlyOthers, MyMutation) => Mixed,
            (NoMutation, x) | (x, NoMutation) => x,
            (x, _) => x,
        }
    }
}

// =============================================================================
// Mutation Stack
// =============================================================================

/// One entry of a [`MutationStack`].
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub value: Value,
    pub session: SessionId,
}

/// The edit history of one field.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationStack {
    entries: Vec<Mutation>,
}

impl MutationStack {
    /// Creates a stack holding only the original value.
    pub fn new(original: Value) -> Self {
        Self {
            entries: vec![Mutation {
                value: original,
                session: SessionId::ORIGINAL,
            }],
        }
    }

    /// The current (top-of-stack) value.
    pub fn current(&self) -> &Value {
        &self.top().value
    }

    /// The value as originally read.
    pub fn original(&self) -> &Value {
        &self.entries[0].value
    }

    /// Whether the field carries any edit above its original.
    pub fn is_modified(&self) -> bool {
        self.entries.len() > 1
    }

    pub fn entries(&self) -> &[Mutation] {
        &self.entries
    }

    /// Records `value` as an edit by `session`.
    ///
    /// Returns `false` when `value` equals the current value and nothing
    /// changed. A session editing a field it already holds the top of replaces
    /// its own edit; otherwise the edit is pushed on top.
    pub fn mutate(&mut self, value: Value, session: SessionId) -> bool {
        if *self.current() == value {
            return false;
        }
        if self.entries.len() > 1 && self.top().session == session {
            self.top_mut().value = value;
        } else {
            self.entries.push(Mutation { value, session });
        }
        true
    }

    /// Classifies the edits of this field as seen from `session`.
    pub fn mixed_mutations(&self, session: SessionId) -> MixedMutation {
        let mut mine = false;
        let mut others = false;
        for entry in &self.entries[1..] {
            if entry.session == session {
                mine = true;
            } else {
                others = true;
            }
            if mine && others {
                return MixedMutation::Mixed;
            }
        }
        match (mine, others) {
            (true, _) => MixedMutation::MyMutation,
            (false, true) => MixedMutation::OnlyOthers,
            (false, false) => MixedMutation::NoMutation,
        }
    }

    /// Removes every edit made by `session`. The original is never removed.
    ///
    /// Returns the number of entries removed.
    pub fn cancel(&mut self, session: SessionId) -> usize {
        let before = self.entries.len();
        let mut index = 0;
        self.entries.retain(|entry| {
            let keep = index == 0 || entry.session != session;
            index += 1;
            keep
        });
        before - self.entries.len()
    }

    /// Collapses the stack to its current value, relabelled as the original.
    pub fn reduce(&mut self) {
        if let Some(top) = self.entries.pop() {
            self.entries.clear();
            self.entries.push(Mutation {
                value: top.value,
                session: SessionId::ORIGINAL,
            });
        }
    }

    /// Replaces the whole history with a single original value.
    pub fn reset(&mut self, original: Value) {
        self.entries.clear();
        self.entries.push(Mutation {
            value: original,
            session: SessionId::ORIGINAL,
        });
    }

    fn top(&self) -> &Mutation {
        self.entries.last().expect("mutation stack is never empty")
    }

    fn top_mut(&mut self) -> &mut Mutation {
        self.entries.last_mut().expect("mutation stack is never empty")
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn s(id: u32) -> SessionId {
        SessionId::new(id)
    }

    #[test]
    fn test_equal_value_is_no_change() {
        let mut stack = MutationStack::new(Value::from("A"));
        assert!(!stack.mutate(Value::from("A"), s(5)));
        assert!(!stack.is_modified());
    }

    #[test]
    fn test_same_session_overwrites_in_place() {
        let mut stack = MutationStack::new(Value::from("A"));
        assert!(stack.mutate(Value::from("B"), s(5)));
        assert!(stack.mutate(Value::from("C"), s(5)));
        assert_eq!(stack.entries().len(), 2);
        assert_eq!(stack.current(), &Value::from("C"));
        assert_eq!(stack.original(), &Value::from("A"));
    }

    #[test]
    fn test_original_session_pushes_over_original() {
        // With only the original present, even session 0 pushes a new entry.
        let mut stack = MutationStack::new(Value::Integer(1));
        assert!(stack.mutate(Value::Integer(2), SessionId::ORIGINAL));
        assert_eq!(stack.entries().len(), 2);
    }

    #[test]
    fn test_distinct_sessions_stack_up() {
        let mut stack = MutationStack::new(Value::from("A"));
        stack.mutate(Value::from("B"), s(5));
        stack.mutate(Value::from("C"), s(7));
        stack.mutate(Value::from("D"), s(5));
        assert_eq!(stack.entries().len(), 4);
        assert_eq!(stack.mixed_mutations(s(5)), MixedMutation::Mixed);
        assert_eq!(stack.mixed_mutations(s(7)), MixedMutation::Mixed);
        assert_eq!(stack.mixed_mutations(s(9)), MixedMutation::OnlyOthers);
    }

    #[test]
    fn test_cancel_keeps_original() {
        let mut stack = MutationStack::new(Value::from("A"));
        stack.mutate(Value::from("B"), s(5));
        stack.mutate(Value::from("C"), s(7));
        assert_eq!(stack.cancel(s(5)), 1);
        assert_eq!(stack.current(), &Value::from("C"));
        assert_eq!(stack.cancel(s(7)), 1);
        assert_eq!(stack.current(), &Value::from("A"));
        assert_eq!(stack.cancel(SessionId::ORIGINAL), 0);
        assert_eq!(stack.entries().len(), 1);
    }

    #[test]
    fn test_reduce_is_idempotent() {
        let mut stack = MutationStack::new(Value::from("A"));
        stack.mutate(Value::from("B"), s(5));
        stack.reduce();
        let once = stack.clone();
        stack.reduce();
        assert_eq!(stack, once);
        assert_eq!(stack.original(), &Value::from("B"));
        assert_eq!(stack.entries()[0].session, SessionId::ORIGINAL);
    }

    #[test]
    fn test_combine() {
        use MixedMutation::*;
        assert_eq!(NoMutation.combine(MyMutation), MyMutation);
        assert_eq!(OnlyOthers.combine(NoMutation), OnlyOthers);
        assert_eq!(MyMutation.combine(OnlyOthers), Mixed);
        assert_eq!(MyMutation.combine(MyMutation), MyMutation);
    }
}
