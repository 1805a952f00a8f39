//! Active effect handles and the handle → owner directory.
//!
//! A handle never owns anything. Resolving it goes through a per-thread
//! directory of weak owner references, so a destroyed owner simply resolves
//! to `None`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::aggregator::AggregatorRef;
use crate::tags::TagContainer;

/// Opaque identifier for one active effect instance.
///
/// `EffectHandle::INVALID` (id 0) is used by modifiers that are not tied to
/// an active effect, e.g. instant or scoped modifiers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EffectHandle(pub(crate) u32);

impl EffectHandle {
    pub const INVALID: Self = Self(0);

    /// Allocates a fresh handle owned by `owner`.
    pub fn generate(owner: Weak<dyn EffectOwner>) -> Self {
        DIRECTORY.with(|dir| {
            let mut dir = dir.borrow_mut();
            dir.next_id = dir.next_id.wrapping_add(1).max(1);
            let handle = Self(dir.next_id);
            dir.owners.insert(handle.0, owner);
            handle
        })
    }

    pub const fn id(self) -> u32 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Resolves the component that owns this handle's effect.
    ///
    /// Returns `None` for invalid, released and stale handles.
    pub fn owning_component(self) -> Option<Rc<dyn EffectOwner>> {
        if !self.is_valid() {
            return None;
        }
        DIRECTORY.with(|dir| dir.borrow().owners.get(&self.0).and_then(Weak::upgrade))
    }

    /// Removes the handle from the directory. Releasing twice is a no-op.
    pub fn release(self) {
        if !self.is_valid() {
            return;
        }
        // Owners dropped during thread teardown may outlive the directory.
        let _ = DIRECTORY.try_with(|dir| {
            dir.borrow_mut().owners.remove(&self.0);
        });
    }
}

#[cfg(test)]
pub(crate) fn registered_handle_count() -> usize {
    DIRECTORY.with(|dir| dir.borrow().owners.len())
}

impl fmt::Display for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "effect#{}", self.0)
        } else {
            f.write_str("effect#invalid")
        }
    }
}

#[derive(Default)]
struct HandleDirectory {
    next_id: u32,
    owners: BTreeMap<u32, Weak<dyn EffectOwner>>,
}

thread_local! {
    static DIRECTORY: RefCell<HandleDirectory> = RefCell::new(HandleDirectory::default());
}

/// Tags captured by an effect spec at application time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EffectTags {
    pub source: TagContainer,
    pub target: TagContainer,
}

/// The component side of a handle: whatever owns active effects.
///
/// Implementations are called back synchronously from dirty broadcasts and
/// must not hold internal borrows across calls back into aggregators.
pub trait EffectOwner {
    /// An aggregator that one of `handle`'s magnitudes reads has changed.
    fn on_attribute_dependency_changed(&self, handle: EffectHandle, changed: &AggregatorRef);

    /// Captured tags of the active effect behind `handle`, if it is still active.
    fn captured_effect_tags(&self, handle: EffectHandle) -> Option<EffectTags>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullOwner;

    impl EffectOwner for NullOwner {
        fn on_attribute_dependency_changed(&self, _: EffectHandle, _: &AggregatorRef) {}

        fn captured_effect_tags(&self, _: EffectHandle) -> Option<EffectTags> {
            None
        }
    }

    #[test]
    fn handles_resolve_while_owner_lives() {
        let owner: Rc<dyn EffectOwner> = Rc::new(NullOwner);
        let handle = EffectHandle::generate(Rc::downgrade(&owner));
        assert!(handle.is_valid());
        assert!(handle.owning_component().is_some());

        drop(owner);
        assert!(handle.owning_component().is_none());
    }

    #[test]
    fn released_and_invalid_handles_resolve_to_none() {
        let owner: Rc<dyn EffectOwner> = Rc::new(NullOwner);
        let handle = EffectHandle::generate(Rc::downgrade(&owner));
        handle.release();
        handle.release();
        assert!(handle.owning_component().is_none());
        assert!(EffectHandle::INVALID.owning_component().is_none());
    }

    #[test]
    fn generated_handles_are_unique() {
        let owner: Rc<dyn EffectOwner> = Rc::new(NullOwner);
        let a = EffectHandle::generate(Rc::downgrade(&owner));
        let b = EffectHandle::generate(Rc::downgrade(&owner));
        assert_ne!(a, b);
    }
}
