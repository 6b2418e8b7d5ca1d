//! Single-threaded observables.
//!
//! [`Signal`] holds one value and notifies subscribers when it changes;
//! only the latest value is observable. [`Slot`] is a plain event channel.
//! Both hand out [`Subscription`]s that unregister on drop, and
//! [`DisposableGroup`] collects them so an owner can release everything at
//! once.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

type Listener<T> = Rc<dyn Fn(&T)>;

struct Listeners<T> {
    entries: RefCell<Vec<(u64, Listener<T>)>>,
    next_id: Cell<u64>,
}

impl<T: 'static> Listeners<T> {
    fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }

    fn add(self: &Rc<Self>, listener: impl Fn(&T) + 'static) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let listener: Listener<T> = Rc::new(listener);
        self.entries.borrow_mut().push((id, listener));
        let weak: Weak<Self> = Rc::downgrade(self);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                if let Ok(mut entries) = listeners.entries.try_borrow_mut() {
                    entries.retain(|(i, _)| *i != id);
                }
            }
        })
    }

    fn notify(&self, value: &T) {
        // Listeners may subscribe or unsubscribe while being notified.
        let snapshot: Vec<Listener<T>> = self
            .entries
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in snapshot {
            listener(value);
        }
    }

    fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

/// Unregisters a listener when dropped.
#[must_use = "dropping a subscription unregisters it"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

struct SignalInner<T> {
    value: RefCell<T>,
    listeners: Rc<Listeners<T>>,
}

/// A value cell with change notification. Clones share the cell.
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                value: RefCell::new(value),
                listeners: Rc::new(Listeners::new()),
            }),
        }
    }

    /// Current value without subscribing.
    pub fn peek(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Replace the value. Subscribers run only if it changed.
    pub fn set(&self, value: T) {
        {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                return;
            }
            *current = value.clone();
        }
        self.inner.listeners.notify(&value);
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Subscription {
        self.inner.listeners.add(listener)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

/// A discrete event channel.
pub struct Slot<T> {
    listeners: Rc<Listeners<T>>,
}

impl<T: 'static> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Slot<T> {
    pub fn new() -> Self {
        Self {
            listeners: Rc::new(Listeners::new()),
        }
    }

    pub fn emit(&self, value: T) {
        self.listeners.notify(&value);
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Subscription {
        self.listeners.add(listener)
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }
}

/// Owns listeners and subscriptions until disposed.
#[derive(Default)]
pub struct DisposableGroup {
    items: Vec<Box<dyn Any>>,
}

impl DisposableGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `disposable` alive until [`dispose`](Self::dispose).
    pub fn add<D: 'static>(&mut self, disposable: D) {
        self.items.push(Box::new(disposable));
    }

    /// Drop everything, newest first.
    pub fn dispose(&mut self) {
        while let Some(item) = self.items.pop() {
            drop(item);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_notifies_on_change_only() {
        let signal = Signal::new(1);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let _sub = signal.subscribe(move |v| sink.borrow_mut().push(*v));

        signal.set(1);
        signal.set(2);
        signal.set(3);
        assert_eq!(*seen.borrow(), vec![2, 3]);
        assert_eq!(signal.peek(), 3);
    }

    #[test]
    fn test_subscription_drop_unsubscribes() {
        let slot: Slot<&'static str> = Slot::new();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let sub = slot.subscribe(move |_| c.set(c.get() + 1));
        slot.emit("a");
        drop(sub);
        slot.emit("b");
        assert_eq!(count.get(), 1);
        assert_eq!(slot.subscriber_count(), 0);
    }

    #[test]
    fn test_listener_can_read_signal() {
        let signal = Signal::new(0);
        let seen = Rc::new(Cell::new(0));
        let (s, out) = (signal.clone(), seen.clone());
        let _sub = signal.subscribe(move |_| out.set(s.peek()));
        signal.set(5);
        assert_eq!(seen.get(), 5);
    }

    #[test]
    fn test_disposable_group() {
        let slot: Slot<()> = Slot::new();
        let mut group = DisposableGroup::new();
        group.add(slot.subscribe(|_| {}));
        group.add(slot.subscribe(|_| {}));
        assert_eq!(slot.subscriber_count(), 2);
        group.dispose();
        assert!(group.is_empty());
        assert_eq!(slot.subscriber_count(), 0);
    }
}
