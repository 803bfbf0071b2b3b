//! Argument lists for late-bound calls.
//!
//! Arguments are collected in declaration order and reversed only when the call is made, which
//! is the layout `IDispatch::Invoke` expects. By-reference arguments borrow caller storage for
//! `'a`, so the storage cannot move or be read until the list has been consumed.

use std::marker::PhantomData;

use crate::error::Result;
use crate::sys::{DispId, DISPID_PROPERTYPUT};
use crate::variant::{Kind, RefTarget, SafeRef, SetVariant, Variant};

/// An in/out parameter: the server reads and may overwrite `*target`.
pub struct Out<'a, T: RefTarget> {
    ptr: *mut T,
    borrow: PhantomData<&'a mut T>,
}

impl<'a, T: RefTarget> Out<'a, T> {
    pub fn new(target: &'a mut T) -> Self {
        Out {
            ptr: target,
            borrow: PhantomData,
        }
    }

    /// Passes a null pointer tagged `T::VT | VT_BYREF`.
    pub fn null() -> Self {
        Out {
            ptr: std::ptr::null_mut(),
            borrow: PhantomData,
        }
    }

    pub fn as_ptr(&self) -> *mut T {
        self.ptr
    }
}

impl<'a, T: RefTarget> From<&'a mut T> for Out<'a, T> {
    fn from(target: &'a mut T) -> Self {
        Out::new(target)
    }
}

/// A single call argument.
pub trait IntoArgument<'a> {
    fn into_argument(self) -> Result<Variant>;
}

impl<'a, T: SetVariant> IntoArgument<'a> for T {
    fn into_argument(self) -> Result<Variant> {
        Variant::from_value(self)
    }
}

impl<'a, T: RefTarget> IntoArgument<'a> for Out<'a, T> {
    fn into_argument(self) -> Result<Variant> {
        let mut variant = Variant::new();
        // SAFETY: the pointer is null or borrowed for 'a, which outlives the argument list.
        unsafe { variant.set_ref(self.ptr) };
        Ok(variant)
    }
}

impl<'a, K: Kind> IntoArgument<'a> for SafeRef<'a, K> {
    fn into_argument(self) -> Result<Variant> {
        let mut variant = Variant::new();
        // SAFETY: as above.
        unsafe { variant.set_safe_ref::<K>(self.as_ptr()) };
        Ok(variant)
    }
}

/// Ordered call arguments, in declaration order.
#[derive(Debug, Default)]
pub struct ArgumentList<'a> {
    args: Vec<Variant>,
    borrow: PhantomData<&'a mut ()>,
}

impl<'a> ArgumentList<'a> {
    pub fn new() -> Self {
        ArgumentList {
            args: Vec::new(),
            borrow: PhantomData,
        }
    }

    /// Marshals `arg` and appends it. On failure the list is unchanged.
    pub fn push<A: IntoArgument<'a>>(&mut self, arg: A) -> Result<()> {
        self.args.push(arg.into_argument()?);
        Ok(())
    }

    pub fn with<A: IntoArgument<'a>>(mut self, arg: A) -> Result<Self> {
        self.push(arg)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// The argument at declaration position `index`.
    pub fn get(&self, index: usize) -> Option<&Variant> {
        self.args.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Variant> {
        self.args.iter()
    }

    /// Lays the arguments out for the wire: last declared first.
    ///
    /// With `property_value` set, the last declared argument is the value being assigned. It
    /// lands at position 0 and is named `DISPID_PROPERTYPUT`.
    pub(crate) fn into_dispatch_order(self, property_value: bool) -> (Vec<Variant>, Vec<DispId>) {
        let mut args = self.args;
        args.reverse();
        let named = if property_value && !args.is_empty() {
            vec![DISPID_PROPERTYPUT]
        } else {
            Vec::new()
        };
        (args, named)
    }
}

impl<'a> FromIterator<Variant> for ArgumentList<'a> {
    fn from_iter<I: IntoIterator<Item = Variant>>(iter: I) -> Self {
        ArgumentList {
            args: iter.into_iter().collect(),
            borrow: PhantomData,
        }
    }
}

/// Anything a verb accepts as its argument pack: `()`, a tuple of arguments or a prepared
/// [`ArgumentList`].
pub trait IntoArguments<'a> {
    fn into_arguments(self) -> Result<ArgumentList<'a>>;
}

impl<'a> IntoArguments<'a> for ArgumentList<'a> {
    fn into_arguments(self) -> Result<ArgumentList<'a>> {
        Ok(self)
    }
}

impl<'a> IntoArguments<'a> for () {
    fn into_arguments(self) -> Result<ArgumentList<'a>> {
        Ok(ArgumentList::new())
    }
}

impl<'a> IntoArguments<'a> for Vec<Variant> {
    fn into_arguments(self) -> Result<ArgumentList<'a>> {
        Ok(self.into_iter().collect())
    }
}

macro_rules! tuple_arguments {
    ($($name:ident),+) => {
        impl<'a, $($name: IntoArgument<'a>),+> IntoArguments<'a> for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_arguments(self) -> Result<ArgumentList<'a>> {
                let ($($name,)+) = self;
                let mut list = ArgumentList::new();
                $(list.push($name)?;)+
                Ok(list)
            }
        }
    };
}

tuple_arguments!(A);
tuple_arguments!(A, B);
tuple_arguments!(A, B, C);
tuple_arguments!(A, B, C, D);
tuple_arguments!(A, B, C, D, E);
tuple_arguments!(A, B, C, D, E, F);
tuple_arguments!(A, B, C, D, E, F, G);
tuple_arguments!(A, B, C, D, E, F, G, H);
