//! Owned interface references.
//!
//! Both types are a single non-null interface pointer. Cloning AddRefs, dropping Releases,
//! and every call goes through the object's own vtable, so they work with any COM-ABI object
//! whether the runtime created it or the caller did.

use std::ffi::c_void;
use std::fmt;
use std::ptr::{self, NonNull};

use crate::sys::{Guid, HResult, IDispatchVtbl, IUnknownVtbl, IID_IDISPATCH, IID_IUNKNOWN};

unsafe fn vtable<'a>(this: *mut c_void) -> &'a IUnknownVtbl {
    &**this.cast::<*const IUnknownVtbl>()
}

pub(crate) unsafe fn add_ref_raw(this: *mut c_void) -> u32 {
    (vtable(this).add_ref)(this)
}

pub(crate) unsafe fn release_raw(this: *mut c_void) -> u32 {
    (vtable(this).release)(this)
}

pub(crate) unsafe fn query_raw(this: *mut c_void, iid: &Guid) -> Result<*mut c_void, HResult> {
    let mut out = ptr::null_mut();
    let hr = (vtable(this).query_interface)(this, iid, &mut out);
    if hr.is_err() {
        return Err(hr);
    }
    if out.is_null() {
        return Err(HResult::E_NOINTERFACE);
    }
    Ok(out)
}

/// An `IUnknown` reference.
#[repr(transparent)]
pub struct Unknown(NonNull<c_void>);

/// An `IDispatch` reference.
#[repr(transparent)]
pub struct Dispatch(NonNull<c_void>);

macro_rules! interface_ref {
    ($name:ident, $iid:expr) => {
        impl $name {
            /// Takes ownership of one reference. Returns `None` for a null pointer.
            ///
            /// # Safety
            /// `raw` must be null or a live interface pointer of this type whose reference the
            /// caller is giving up.
            pub unsafe fn from_raw(raw: *mut c_void) -> Option<Self> {
                NonNull::new(raw).map($name)
            }

            /// Borrows a pointer and takes a new reference to it.
            ///
            /// # Safety
            /// Same as [`Self::from_raw`], except the caller keeps its own reference.
            pub unsafe fn from_raw_borrowed(raw: *mut c_void) -> Option<Self> {
                let this = NonNull::new(raw)?;
                add_ref_raw(this.as_ptr());
                Some($name(this))
            }

            pub fn as_raw(&self) -> *mut c_void {
                self.0.as_ptr()
            }

            /// Gives up ownership without releasing.
            pub fn into_raw(self) -> *mut c_void {
                let raw = self.as_raw();
                std::mem::forget(self);
                raw
            }

            /// `QueryInterface` for another interface reference type.
            pub fn cast<T: Interface>(&self) -> Result<T, HResult> {
                // SAFETY: self is a live reference and a successful query returns an owned
                // pointer of the requested interface.
                unsafe {
                    let raw = query_raw(self.as_raw(), &T::IID)?;
                    Ok(T::from_owned(NonNull::new_unchecked(raw)))
                }
            }
        }

        impl Clone for $name {
            fn clone(&self) -> Self {
                // SAFETY: live reference.
                unsafe { add_ref_raw(self.as_raw()) };
                $name(self.0)
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                // SAFETY: we own exactly one reference.
                unsafe { release_raw(self.as_raw()) };
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.0 == other.0
            }
        }

        impl Eq for $name {}

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:p})", stringify!($name), self.0)
            }
        }

        impl Interface for $name {
            const IID: Guid = $iid;

            unsafe fn from_owned(raw: NonNull<c_void>) -> Self {
                $name(raw)
            }
        }
    };
}

/// Interface reference types that `cast` can produce.
pub trait Interface: Sized {
    const IID: Guid;

    #[doc(hidden)]
    unsafe fn from_owned(raw: NonNull<c_void>) -> Self;
}

interface_ref!(Unknown, IID_IUNKNOWN);
interface_ref!(Dispatch, IID_IDISPATCH);

impl Dispatch {
    pub(crate) fn vtable(&self) -> &IDispatchVtbl {
        // SAFETY: an IDispatch pointer's first field is its vtable.
        unsafe { &**self.as_raw().cast::<*const IDispatchVtbl>() }
    }

    /// The same object viewed as `IUnknown`, without a QueryInterface round trip.
    pub fn to_unknown(&self) -> Unknown {
        // SAFETY: IDispatch derives from IUnknown.
        unsafe { add_ref_raw(self.as_raw()) };
        Unknown(self.0)
    }
}

#[cfg(windows)]
mod interop {
    use windows::core::Interface as _;
    use windows::core::IUnknown;
    use windows::Win32::System::Com::IDispatch;

    use super::{Dispatch, Unknown};

    impl From<IDispatch> for Dispatch {
        fn from(value: IDispatch) -> Self {
            // SAFETY: into_raw hands over a non-null owned reference.
            unsafe { Dispatch(std::ptr::NonNull::new_unchecked(value.into_raw())) }
        }
    }

    impl From<Dispatch> for IDispatch {
        fn from(value: Dispatch) -> Self {
            // SAFETY: the pointer is an owned IDispatch reference.
            unsafe { IDispatch::from_raw(value.into_raw()) }
        }
    }

    impl From<IUnknown> for Unknown {
        fn from(value: IUnknown) -> Self {
            // SAFETY: into_raw hands over a non-null owned reference.
            unsafe { Unknown(std::ptr::NonNull::new_unchecked(value.into_raw())) }
        }
    }

    impl From<Unknown> for IUnknown {
        fn from(value: Unknown) -> Self {
            // SAFETY: the pointer is an owned IUnknown reference.
            unsafe { IUnknown::from_raw(value.into_raw()) }
        }
    }
}
