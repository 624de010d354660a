use std::any;
use std::cell::{Cell as StdCell, RefCell};
use std::fmt;

use crate::tag::{Revision, Runtime, Tag};
use crate::{Error, Result};

/// A memoized computation that is recomputed only when something it read
/// has changed.
pub struct Cache<T> {
    rt: Runtime,
    f: Box<dyn Fn() -> T>,
    label: &'static str,
    /// Stable for the lifetime of the cache, pointed at the dependencies of
    /// the latest computation.
    tag: Tag,
    value: RefCell<Option<T>>,
    snapshot: StdCell<Revision>,
    computing: StdCell<bool>,
    constant: StdCell<bool>,
}

impl<T> Cache<T>
where
    T: Clone,
{
    /// Creates a cache. Nothing is computed until the first read.
    pub fn new<F>(rt: &Runtime, f: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self {
            rt: rt.clone(),
            label: any::type_name::<F>(),
            f: Box::new(f),
            tag: rt.updatable(),
            value: RefCell::new(None),
            snapshot: StdCell::new(Revision::CONSTANT),
            computing: StdCell::new(false),
            constant: StdCell::new(false),
        }
    }

    /// Returns the cached value, recomputing it if it is stale.
    ///
    /// # Panics
    ///
    /// If called while the cache is computing its own value.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Returns the cached value, recomputing it if it is stale.
    ///
    /// Fails with a [`Cycle`][crate::ErrorKind::Cycle] error if called while
    /// the cache is computing its own value.
    pub fn try_get(&self) -> Result<T> {
        if self.computing.get() {
            return Err(Error::cycle(format!(
                "cache `{}` was read while computing its own value",
                self.label
            )));
        }

        if let Some(value) = self.value.borrow().as_ref() {
            if self.constant.get() {
                return Ok(value.clone());
            }
            if self.rt.validate(self.tag, self.snapshot.get()) {
                self.rt.consume(self.tag);
                return Ok(value.clone());
            }
        }

        self.computing.set(true);
        self.rt.begin_track();
        let value = (self.f)();
        let reads = self.rt.take_frame();
        self.computing.set(false);

        let deps = self.rt.update_with(self.tag, &reads);
        self.snapshot.set(self.rt.now());
        if deps == Tag::CONSTANT {
            self.constant.set(true);
        } else {
            self.rt.consume(self.tag);
        }
        *self.value.borrow_mut() = Some(value.clone());
        Ok(value)
    }

    /// Returns the tag that reports changes to the cached value.
    ///
    /// This is [`Tag::CONSTANT`] until the first computation and for caches
    /// that turned out to be constant.
    pub fn tag(&self) -> Tag {
        if self.is_const() || self.value.borrow().is_none() {
            Tag::CONSTANT
        } else {
            self.tag
        }
    }

    /// Whether the last computation read no tags at all, in which case the
    /// value is frozen.
    pub fn is_const(&self) -> bool {
        self.constant.get()
    }
}

impl<T> Drop for Cache<T> {
    fn drop(&mut self) {
        self.rt.release(self.tag);
    }
}

impl<T> fmt::Debug for Cache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("label", &self.label)
            .field("tag", &self.tag)
            .field("snapshot", &self.snapshot.get())
            .field("constant", &self.constant.get())
            .finish_non_exhaustive()
    }
}
