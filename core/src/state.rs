//! Hypothesis states and their attachments.
//!
//! A [`RobotState`] is one hypothesis of the full world configuration stored as a real vector. States
//! are shared between particles through [`StateHandle`] (an `Arc`), so once a state has been wrapped
//! in a handle it is never mutated again. Anything the filter needs to record on a state (the
//! provenance back-reference) is written while the state is still owned, before it is shared.
//!
//! Problem-specific logic can stash auxiliary data on a state through its [`StateAttachment`]. The
//! filter copies attachments wholesale and only ever reads or writes the previous-state link.
use nalgebra::DVector;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::{self, Debug, Display};
use std::sync::{Arc, Weak};

/// Action applied to the system, e.g. a control vector.
pub type Action = DVector<f64>;

/// Observation received after applying an action.
pub type Observation = DVector<f64>;

/// Shared, immutable handle to a hypothesis state.
pub type StateHandle = Arc<RobotState>;

/// Extensible payload carried by a state.
///
/// Holds a non-owning link to the state this one was propagated from and a set of keyed,
/// type-erased metadata entries. Cloning an attachment aliases the entries rather than copying
/// them.
#[derive(Clone, Default)]
pub struct StateAttachment {
    previous_state: Option<Weak<RobotState>>,
    entries: HashMap<String, Arc<dyn Any + Send + Sync>>,
}
impl Debug for StateAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();
        f.debug_struct("StateAttachment")
            .field("has_previous_state", &self.previous_state().is_some())
            .field("entries", &keys)
            .finish()
    }
}
impl StateAttachment {
    pub fn new() -> Self {
        Self::default()
    }
    /// The state this one was propagated from, if it is still alive.
    pub fn previous_state(&self) -> Option<StateHandle> {
        self.previous_state.as_ref().and_then(Weak::upgrade)
    }
    /// Record the state this one was propagated from without taking ownership of it.
    pub fn set_previous_state(&mut self, state: &StateHandle) {
        self.previous_state = Some(Arc::downgrade(state));
    }
    pub fn clear_previous_state(&mut self) {
        self.previous_state = None;
    }
    /// Store a metadata entry, replacing any previous value under the same key.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), Arc::new(value));
    }
    /// Typed access to a metadata entry. Returns `None` when the key is missing or holds a value
    /// of another type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.entries.get(key).and_then(|v| v.downcast_ref::<T>())
    }
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One hypothesis of the world configuration.
#[derive(Clone, Debug, Default)]
pub struct RobotState {
    vector: DVector<f64>,
    attachment: Option<StateAttachment>,
}
impl Display for RobotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RobotState[")?;
        for (i, value) in self.vector.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.4}", value)?;
        }
        write!(f, "]")
    }
}
impl From<DVector<f64>> for RobotState {
    fn from(vector: DVector<f64>) -> Self {
        RobotState::new(vector)
    }
}
impl From<Vec<f64>> for RobotState {
    fn from(values: Vec<f64>) -> Self {
        RobotState::new(DVector::from_vec(values))
    }
}
impl RobotState {
    pub fn new(vector: DVector<f64>) -> Self {
        RobotState {
            vector,
            attachment: None,
        }
    }
    pub fn with_attachment(vector: DVector<f64>, attachment: StateAttachment) -> Self {
        RobotState {
            vector,
            attachment: Some(attachment),
        }
    }
    pub fn vector(&self) -> &DVector<f64> {
        &self.vector
    }
    pub fn dim(&self) -> usize {
        self.vector.len()
    }
    pub fn attachment(&self) -> Option<&StateAttachment> {
        self.attachment.as_ref()
    }
    /// Mutable access to the attachment, creating an empty one first if the state has none.
    pub fn attachment_mut(&mut self) -> &mut StateAttachment {
        self.attachment.get_or_insert_with(StateAttachment::default)
    }
    pub fn set_attachment(&mut self, attachment: Option<StateAttachment>) {
        self.attachment = attachment;
    }
    /// Shortcut for the provenance link stored in the attachment.
    pub fn previous_state(&self) -> Option<StateHandle> {
        self.attachment.as_ref().and_then(StateAttachment::previous_state)
    }
    pub fn into_handle(self) -> StateHandle {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_is_created_on_demand() {
        let mut state = RobotState::from(vec![1.0, 2.0]);
        assert!(state.attachment().is_none());
        state.attachment_mut().insert("visit", 3usize);
        assert_eq!(state.attachment().unwrap().get::<usize>("visit"), Some(&3));
    }

    #[test]
    fn typed_accessor_rejects_wrong_type() {
        let mut attachment = StateAttachment::new();
        attachment.insert("label", String::from("pedestrian"));
        assert!(attachment.get::<f64>("label").is_none());
        assert_eq!(
            attachment.get::<String>("label").map(String::as_str),
            Some("pedestrian")
        );
        assert!(attachment.get::<String>("missing").is_none());
    }

    #[test]
    fn previous_state_link_does_not_own() {
        let parent = RobotState::from(vec![0.0]).into_handle();
        let mut child = RobotState::from(vec![1.0]);
        child.attachment_mut().set_previous_state(&parent);
        assert_eq!(Arc::strong_count(&parent), 1);
        assert!(Arc::ptr_eq(&child.previous_state().unwrap(), &parent));

        drop(parent);
        assert!(child.previous_state().is_none());
    }

    #[test]
    fn cloned_attachment_aliases_entries() {
        let mut original = StateAttachment::new();
        original.insert("trajectory", vec![1.0_f64, 2.0, 3.0]);
        let copy = original.clone();
        let a = original.get::<Vec<f64>>("trajectory").unwrap();
        let b = copy.get::<Vec<f64>>("trajectory").unwrap();
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn display_lists_vector_values() {
        let state = RobotState::from(vec![1.0, -0.5]);
        assert_eq!(state.to_string(), "RobotState[1.0000, -0.5000]");
    }
}
