use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Handle returned by [`Event::subscribe`], used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handlers<F> = Rc<Vec<(SubscriptionId, Rc<F>)>>;

/// An ordered subscription table for handlers of type `F`.
///
/// Emitting walks a shared snapshot of the table, so a handler may subscribe
/// or unsubscribe (itself included) while an emit is in flight. Such changes
/// take effect from the next emit. Emitting never allocates.
pub struct Event<F: ?Sized> {
    handlers: RefCell<Handlers<F>>,
    next_id: Cell<u64>,
}

impl<F: ?Sized> Event<F> {
    pub fn new() -> Self {
        Self {
            handlers: RefCell::new(Rc::new(Vec::new())),
            next_id: Cell::new(0),
        }
    }

    /// Append a handler. Handlers run in subscription order.
    pub fn subscribe(&self, handler: Rc<F>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        Rc::make_mut(&mut *self.handlers.borrow_mut()).push((id, handler));
        id
    }

    /// Remove a handler. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let Some(pos) = handlers.iter().position(|(sub, _)| *sub == id) else {
            return false;
        };
        Rc::make_mut(&mut *handlers).remove(pos);
        true
    }

    /// Drop every handler.
    pub fn clear(&self) {
        let mut handlers = self.handlers.borrow_mut();
        if !handlers.is_empty() {
            *handlers = Rc::new(Vec::new());
        }
    }

    /// Number of subscribed handlers
    pub fn len(&self) -> usize {
        self.handlers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.borrow().is_empty()
    }

    /// Invoke `call` once per handler, in subscription order.
    pub fn emit_with(&self, mut call: impl FnMut(&F)) {
        let snapshot = Rc::clone(&self.handlers.borrow());
        for (_, handler) in snapshot.iter() {
            call(handler);
        }
    }
}

impl<F: ?Sized> Default for Event<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ?Sized> fmt::Debug for Event<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("handlers", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Handler = dyn Fn(&mut Vec<u32>);

    #[test]
    fn handlers_run_in_order() {
        let event: Event<Handler> = Event::new();
        event.subscribe(Rc::new(|log: &mut Vec<u32>| log.push(1)));
        event.subscribe(Rc::new(|log: &mut Vec<u32>| log.push(2)));

        let mut log = Vec::new();
        event.emit_with(|h| h(&mut log));
        assert_eq!(log, vec![1, 2]);
    }

    #[test]
    fn unsubscribe_removes_handler() {
        let event: Event<Handler> = Event::new();
        let first = event.subscribe(Rc::new(|log: &mut Vec<u32>| log.push(1)));
        event.subscribe(Rc::new(|log: &mut Vec<u32>| log.push(2)));
        assert!(event.unsubscribe(first));
        assert!(!event.unsubscribe(first));

        let mut log = Vec::new();
        event.emit_with(|h| h(&mut log));
        assert_eq!(log, vec![2]);
        assert_eq!(event.len(), 1);
    }

    #[test]
    fn subscribe_during_emit_applies_next_time() {
        let event: Rc<Event<dyn Fn(&Cell<u32>)>> = Rc::new(Event::new());
        let inner = Rc::downgrade(&event);
        event.subscribe(Rc::new(move |hits: &Cell<u32>| {
            hits.set(hits.get() + 1);
            if let Some(event) = inner.upgrade() {
                event.subscribe(Rc::new(|hits: &Cell<u32>| hits.set(hits.get() + 100)));
            }
        }));

        let hits = Cell::new(0);
        event.emit_with(|h| h(&hits));
        assert_eq!(hits.get(), 1);
        assert_eq!(event.len(), 2);
    }

    #[test]
    fn clear_empties_table() {
        let event: Event<Handler> = Event::new();
        event.subscribe(Rc::new(|_: &mut Vec<u32>| {}));
        event.clear();
        assert!(event.is_empty());
    }
}
