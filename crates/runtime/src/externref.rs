//! Host references.

use std::any::Any;
use std::sync::Arc;

/// An opaque, reference-counted host value, the runtime representation of
/// `externref`.
#[derive(Clone)]
pub struct ExternRef {
    // Boxed so the `Arc` stays a thin pointer and can round-trip through
    // `into_raw`.
    inner: Arc<Box<dyn Any + Send + Sync>>,
}

impl ExternRef {
    /// Wraps a host value.
    pub fn new<T>(value: T) -> ExternRef
    where
        T: Any + Send + Sync,
    {
        ExternRef { inner: Arc::new(Box::new(value)) }
    }

    /// The wrapped value.
    pub fn data(&self) -> &(dyn Any + Send + Sync) {
        &**self.inner
    }

    /// Whether two references point at the same host value.
    pub fn ptr_eq(&self, other: &ExternRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The current reference count, exposed for diagnostics.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Converts this reference into an owned raw pointer, transferring one
    /// strong count to the caller. Must be paired with [`ExternRef::from_raw`]
    /// or the count is leaked.
    pub fn into_raw(self) -> *const () {
        Arc::into_raw(self.inner) as *const ()
    }

    /// Reconstructs a reference from a pointer produced by
    /// [`ExternRef::into_raw`], taking back the strong count that was
    /// transferred.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `into_raw` and must not be consumed twice.
    pub unsafe fn from_raw(ptr: *const ()) -> ExternRef {
        ExternRef { inner: Arc::from_raw(ptr as *const Box<dyn Any + Send + Sync>) }
    }

    /// Clones a reference out of a pointer produced by
    /// [`ExternRef::into_raw`] without consuming the transferred count.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `into_raw` and not yet been consumed.
    pub unsafe fn clone_from_raw(ptr: *const ()) -> ExternRef {
        let raw = ExternRef { inner: Arc::from_raw(ptr as *const Box<dyn Any + Send + Sync>) };
        let clone = raw.clone();
        std::mem::forget(raw);
        clone
    }
}

impl std::fmt::Debug for ExternRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternRef").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity() {
        let a = ExternRef::new(42u32);
        let b = a.clone();
        let c = ExternRef::new(42u32);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a.data().downcast_ref::<u32>(), Some(&42));
    }
}
