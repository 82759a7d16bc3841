//! Lightweight synchronous event dispatch
//!
//! Components expose `Event<T>` fields (view updates, fragment loads/deletes,
//! disposal). Handlers run on the thread that triggers the event, which is
//! always the tick thread.

use std::fmt;

/// Handle returned by [`Event::add`], used to unsubscribe a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Event handler callback type
pub type EventHandler<T> = Box<dyn FnMut(&T) + Send>;

pub struct Event<T> {
    handlers: Vec<(HandlerId, EventHandler<T>)>,
    next_id: u64,
}

impl<T> Event<T> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            next_id: 0,
        }
    }

    /// Subscribe a handler; handlers fire in subscription order
    pub fn add<F>(&mut self, handler: F) -> HandlerId
    where
        F: FnMut(&T) + Send + 'static,
    {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, Box::new(handler)));
        id
    }

    pub fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(handler_id, _)| *handler_id != id);
        self.handlers.len() != before
    }

    pub fn trigger(&mut self, data: &T) {
        for (_, handler) in self.handlers.iter_mut() {
            handler(data);
        }
    }

    /// Drop every handler
    pub fn reset(&mut self) {
        self.handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_trigger_runs_handlers_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut event = Event::<u32>::new();

        let first = Arc::clone(&log);
        event.add(move |value| first.lock().unwrap().push(("first", *value)));
        let second = Arc::clone(&log);
        event.add(move |value| second.lock().unwrap().push(("second", *value)));

        event.trigger(&7);
        assert_eq!(*log.lock().unwrap(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn test_remove_and_reset() {
        let hits = Arc::new(Mutex::new(0));
        let mut event = Event::<()>::new();

        let counter = Arc::clone(&hits);
        let id = event.add(move |_| *counter.lock().unwrap() += 1);
        assert!(event.remove(id));
        assert!(!event.remove(id));
        event.trigger(&());
        assert_eq!(*hits.lock().unwrap(), 0);

        let counter = Arc::clone(&hits);
        event.add(move |_| *counter.lock().unwrap() += 1);
        event.reset();
        event.trigger(&());
        assert!(event.is_empty());
        assert_eq!(*hits.lock().unwrap(), 0);
    }
}
