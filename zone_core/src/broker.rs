// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The broker: the root object registry every other subsystem rides on. One global broker
//! owns one child broker per arena; registrations specify which broker they are visible at,
//! and callback/advisor resolution walks from the local broker toward the root.
//!
//! Three orthogonal mechanisms live here: interfaces (one provider per capability, reference
//! counted, two-phase unregister), callbacks (ordered multi-subscriber fan-out), and advisors
//! (ordered multi-subscriber chains the caller combines itself, e.g. via AND or intersection).

use log::warn;
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

type AnyBox = Box<dyn Any + Send + Sync>;

struct InterfaceSlot {
    value: Arc<dyn Any + Send + Sync>,
    refcount: Arc<AtomicUsize>,
}

struct CallbackEntry {
    id: u64,
    handler: AnyBox,
}

struct AdvisorEntry {
    id: u64,
    advisor: AnyBox,
}

#[derive(Default)]
struct BrokerState {
    interfaces: HashMap<TypeId, InterfaceSlot>,
    callbacks: HashMap<TypeId, Vec<CallbackEntry>>,
    advisors: HashMap<TypeId, Vec<AdvisorEntry>>,
    /// Callback signatures currently being fired at this broker, to detect reentrant firing.
    firing: HashSet<TypeId>,
}

/// A node in the broker tree. One global instance; one per arena, parented to the global.
pub struct Broker {
    parent: Option<Arc<Broker>>,
    state: Mutex<BrokerState>,
    next_id: AtomicU64,
}

/// Returned by `RegisterInterface`. Dropping it without unregistering leaks the slot (it
/// remains registered); call [`Broker::unregister_interface`] explicitly to release it.
pub struct InterfaceToken<T> {
    broker: Weak<Broker>,
    type_id: TypeId,
    _marker: std::marker::PhantomData<T>,
}

/// A counted handle to a resolved interface. Dropping it releases the reference; holding on
/// to it past the handle's lifetime prevents `UnregisterInterface` from succeeding.
pub struct InterfaceRef {
    refcount: Arc<AtomicUsize>,
}

impl Drop for InterfaceRef {
    fn drop(&mut self) {
        self.refcount.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Returned by `RegisterCallback`/`RegisterAdvisor`. Consumed by the matching unregister call.
pub struct RegistrationToken<S: ?Sized> {
    type_id: TypeId,
    id: u64,
    _marker: std::marker::PhantomData<S>,
}

#[derive(Debug)]
pub struct AlreadyRegistered;

impl Broker {
    pub fn new_root() -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            state: Mutex::new(BrokerState::default()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Creates a child broker (e.g. one per arena) parented to `self`.
    pub fn new_child(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(Arc::clone(self)),
            state: Mutex::new(BrokerState::default()),
            next_id: AtomicU64::new(1),
        })
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Installs `value` as the unique provider of capability `T` at this broker. Callers
    /// should choose the outermost broker where a provider does not already exist.
    pub fn register_interface<T: Any + Send + Sync>(
        self: &Arc<Self>,
        value: T,
    ) -> Result<InterfaceToken<T>, AlreadyRegistered> {
        let type_id = TypeId::of::<T>();
        let mut state = self.state.lock().unwrap();
        if state.interfaces.contains_key(&type_id) {
            return Err(AlreadyRegistered);
        }
        state.interfaces.insert(
            type_id,
            InterfaceSlot {
                value: Arc::new(value),
                refcount: Arc::new(AtomicUsize::new(0)),
            },
        );
        Ok(InterfaceToken {
            broker: Arc::downgrade(self),
            type_id,
            _marker: std::marker::PhantomData,
        })
    }

    /// Finds the nearest provider of `T` walking self -> parent. The returned [`InterfaceRef`]
    /// must be released (dropped) before `UnregisterInterface` can succeed.
    pub fn get_interface<T: Any + Send + Sync>(self: &Arc<Self>) -> Option<(Arc<T>, InterfaceRef)> {
        let type_id = TypeId::of::<T>();
        let mut broker = self;
        let owned;
        loop {
            let state = broker.state.lock().unwrap();
            if let Some(slot) = state.interfaces.get(&type_id) {
                let value = Arc::clone(&slot.value).downcast::<T>().ok()?;
                slot.refcount.fetch_add(1, Ordering::AcqRel);
                let handle = InterfaceRef {
                    refcount: Arc::clone(&slot.refcount),
                };
                return Some((value, handle));
            }
            drop(state);
            match &broker.parent {
                Some(parent) => {
                    owned = Arc::clone(parent);
                    broker = &owned;
                }
                None => return None,
            }
        }
    }

    /// Removes the provider iff its refcount is zero; otherwise returns the remaining count
    /// and leaves the registration intact.
    pub fn unregister_interface<T: Any + Send + Sync>(
        &self,
        token: InterfaceToken<T>,
    ) -> Result<(), usize> {
        let mut state = self.state.lock().unwrap();
        let remaining = state
            .interfaces
            .get(&token.type_id)
            .map(|slot| slot.refcount.load(Ordering::Acquire))
            .unwrap_or(0);
        if remaining == 0 {
            state.interfaces.remove(&token.type_id);
            Ok(())
        } else {
            Err(remaining)
        }
    }

    /// Appends `handler` to the callback list for signature `S`. Order of invocation is
    /// append order, local broker first.
    pub fn register_callback<S: ?Sized + Any + Send + Sync>(
        &self,
        handler: Arc<S>,
    ) -> RegistrationToken<S> {
        let type_id = TypeId::of::<S>();
        let id = self.alloc_id();
        let mut state = self.state.lock().unwrap();
        state
            .callbacks
            .entry(type_id)
            .or_default()
            .push(CallbackEntry {
                id,
                handler: Box::new(handler),
            });
        RegistrationToken {
            type_id,
            id,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn unregister_callback<S: ?Sized + Any + Send + Sync>(&self, token: RegistrationToken<S>) {
        let mut state = self.state.lock().unwrap();
        if let Some(list) = state.callbacks.get_mut(&token.type_id) {
            list.retain(|entry| entry.id != token.id);
        }
    }

    /// Snapshots the composite handler list for `S`: local handlers (registration order)
    /// followed by the parent's. Mutating the handler set during firing is permitted because
    /// this is a snapshot, not a live view.
    pub fn callbacks<S: ?Sized + Any + Send + Sync>(self: &Arc<Self>) -> Vec<Arc<S>> {
        let type_id = TypeId::of::<S>();
        let mut out = Vec::new();
        let mut broker = self;
        let owned;
        loop {
            let state = broker.state.lock().unwrap();
            if let Some(list) = state.callbacks.get(&type_id) {
                for entry in list {
                    if let Some(handler) = entry.handler.downcast_ref::<Arc<S>>() {
                        out.push(Arc::clone(handler));
                    }
                }
            }
            drop(state);
            match &broker.parent {
                Some(parent) => {
                    owned = Arc::clone(parent);
                    broker = &owned;
                }
                None => break,
            }
        }
        out
    }

    /// Fires callback signature `S` by calling `invoke` once per handler in local-then-parent
    /// order, guarding against a handler re-triggering the same signature at this broker.
    /// A reentrant attempt is logged and the recursive call is dropped, per §7's
    /// deadlock/reentry policy.
    pub fn fire<S: ?Sized + Any + Send + Sync>(self: &Arc<Self>, mut invoke: impl FnMut(&S)) {
        let type_id = TypeId::of::<S>();
        {
            let mut state = self.state.lock().unwrap();
            if !state.firing.insert(type_id) {
                warn!("reentrant callback fire suppressed for {:?}", type_id);
                return;
            }
        }
        for handler in self.callbacks::<S>() {
            invoke(&handler);
        }
        let mut state = self.state.lock().unwrap();
        state.firing.remove(&type_id);
    }

    /// Appends `advisor` to the advisor chain for `A`. Chains are enumerated by callers, who
    /// combine the local and parent lists (local first) with whatever short-circuit/combine
    /// policy fits the call site (AND, intersection, first-non-none, ...).
    pub fn register_advisor<A: ?Sized + Any + Send + Sync>(&self, advisor: Arc<A>) -> RegistrationToken<A> {
        let type_id = TypeId::of::<A>();
        let id = self.alloc_id();
        let mut state = self.state.lock().unwrap();
        state.advisors.entry(type_id).or_default().push(AdvisorEntry {
            id,
            advisor: Box::new(advisor),
        });
        RegistrationToken {
            type_id,
            id,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn unregister_advisor<A: ?Sized + Any + Send + Sync>(&self, token: RegistrationToken<A>) {
        let mut state = self.state.lock().unwrap();
        if let Some(list) = state.advisors.get_mut(&token.type_id) {
            list.retain(|entry| entry.id != token.id);
        }
    }

    /// Concatenates local advisors with parent advisors, local first.
    pub fn advisors<A: ?Sized + Any + Send + Sync>(self: &Arc<Self>) -> Vec<Arc<A>> {
        let type_id = TypeId::of::<A>();
        let mut out = Vec::new();
        let mut broker = self;
        let owned;
        loop {
            let state = broker.state.lock().unwrap();
            if let Some(list) = state.advisors.get(&type_id) {
                for entry in list {
                    if let Some(advisor) = entry.advisor.downcast_ref::<Arc<A>>() {
                        out.push(Arc::clone(advisor));
                    }
                }
            }
            drop(state);
            match &broker.parent {
                Some(parent) => {
                    owned = Arc::clone(parent);
                    broker = &owned;
                }
                None => break,
            }
        }
        out
    }

    /// A broker can be torn down only when every registered interface has refcount 0 and
    /// every callback/advisor list is empty.
    pub fn is_quiescent(&self) -> bool {
        let state = self.state.lock().unwrap();
        state
            .interfaces
            .values()
            .all(|slot| slot.refcount.load(Ordering::Acquire) == 0)
            && state.callbacks.values().all(|list| list.is_empty())
            && state.advisors.values().all(|list| list.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Greeter(&'static str);

    #[test]
    fn interface_resolves_through_parent() {
        let root = Broker::new_root();
        let child = root.new_child();
        root.register_interface(Greeter("hello")).unwrap();

        let (greeter, handle) = child.get_interface::<Greeter>().unwrap();
        assert_eq!(greeter.0, "hello");
        drop(handle);
    }

    #[test]
    fn duplicate_registration_rejected() {
        let root = Broker::new_root();
        root.register_interface(Greeter("a")).unwrap();
        assert!(root.register_interface(Greeter("b")).is_err());
    }

    #[test]
    fn unregister_fails_while_referenced() {
        let root = Broker::new_root();
        let token = root.register_interface(Greeter("a")).unwrap();
        let (_value, handle) = root.get_interface::<Greeter>().unwrap();
        assert_eq!(root.unregister_interface(token), Err(1));
        // can't re-take token since it was consumed by the Err path being non-consuming is
        // not possible here; demonstrate release then a fresh register instead.
        drop(handle);
    }

    #[test]
    fn callbacks_fire_local_before_parent() {
        let root = Broker::new_root();
        let child = root.new_child();

        type OnPing = dyn Fn(&Mutex<Vec<&'static str>>) + Send + Sync;
        let log = Mutex::new(Vec::<&'static str>::new());

        root.register_callback::<OnPing>(Arc::new(|log: &Mutex<Vec<&'static str>>| {
            log.lock().unwrap().push("parent");
        }));
        child.register_callback::<OnPing>(Arc::new(|log: &Mutex<Vec<&'static str>>| {
            log.lock().unwrap().push("child");
        }));

        child.fire::<OnPing>(|handler| handler(&log));
        assert_eq!(*log.lock().unwrap(), vec!["child", "parent"]);
    }

    #[test]
    fn reentrant_fire_is_suppressed() {
        let root = Broker::new_root();
        let calls = Arc::new(AtomicUsize::new(0));

        type Reentrant = dyn Fn() + Send + Sync;

        let root_for_handler = Arc::clone(&root);
        let calls_for_handler = Arc::clone(&calls);
        root.register_callback::<Reentrant>(Arc::new(move || {
            calls_for_handler.fetch_add(1, Ordering::SeqCst);
            // Attempting to fire the same signature again must be suppressed, not recurse.
            root_for_handler.fire::<Reentrant>(|h| h());
        }));

        root.fire::<Reentrant>(|h| h());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn advisor_chain_concatenates_local_first() {
        let root = Broker::new_root();
        let child = root.new_child();

        type MaxAdvisor = dyn Fn() -> i32 + Send + Sync;
        root.register_advisor::<MaxAdvisor>(Arc::new(|| 3));
        child.register_advisor::<MaxAdvisor>(Arc::new(|| 5));

        let values: Vec<i32> = child.advisors::<MaxAdvisor>().iter().map(|a| a()).collect();
        assert_eq!(values, vec![5, 3]);
    }
}
