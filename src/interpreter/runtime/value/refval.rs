//! Shared, interior-mutable containers for Array and Object values.

use std::cell::{BorrowError, BorrowMutError, Ref, RefCell, RefMut};
use std::rc::Rc;

/// A shared handle on a mutable container value.
///
/// Cloning a `RefValue` clones the *handle*: both copies see the same
/// underlying data, which is what scripts observe when they pass arrays
/// and objects around.
#[derive(Debug, Clone)]
pub struct RefValue<T> {
    rc: Rc<RefCell<T>>,
}

/// A borrow of a [`RefValue`] failed.
///
/// Scripts can legitimately trigger this by mutating a container from a
/// callback that is iterating the same container.
#[derive(Debug)]
pub enum RvErr {
    /// The container is already borrowed for iteration.
    BorrowConcur,
    /// The container is already mutably borrowed.
    BorrowMutConcur,
}

impl From<BorrowError> for RvErr {
    fn from(_: BorrowError) -> Self {
        RvErr::BorrowConcur
    }
}
impl From<BorrowMutError> for RvErr {
    fn from(_: BorrowMutError) -> Self {
        RvErr::BorrowMutConcur
    }
}

impl<T> RefValue<T> {
    pub fn new(t: T) -> Self {
        Self { rc: Rc::new(RefCell::new(t)) }
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.rc.borrow()
    }

    pub fn try_borrow(&self) -> Result<Ref<'_, T>, RvErr> {
        Ok(self.rc.try_borrow()?)
    }

    pub fn try_borrow_mut(&self) -> Result<RefMut<'_, T>, RvErr> {
        Ok(self.rc.try_borrow_mut()?)
    }

    /// Whether two handles share the same underlying container.
    pub fn ref_eq(&self, other: &RefValue<T>) -> bool {
        Rc::ptr_eq(&self.rc, &other.rc)
    }

    /// Raw identity pointer, used by the display code's cycle guard.
    pub fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.rc) as *const ()
    }
}

impl<T: PartialEq> PartialEq for RefValue<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ref_eq(other) || *self.borrow() == *other.borrow()
    }
}
