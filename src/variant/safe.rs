use std::fmt;
use std::marker::PhantomData;

use crate::sys::{Currency, HResult, VarType, VariantBoolRaw, VariantData, VARIANT_FALSE, VARIANT_TRUE};

/// One row of the binding table: a tag, the storage it uses and the union field holding it.
pub trait Kind: 'static {
    const VT: VarType;
    type Storage: Copy + PartialEq + fmt::Debug + 'static;

    #[doc(hidden)]
    /// # Safety
    /// The payload must currently hold this kind.
    unsafe fn load(data: &VariantData) -> Self::Storage;

    #[doc(hidden)]
    fn store(data: &mut VariantData, value: Self::Storage);
}

macro_rules! kinds {
    ($($(#[$doc:meta])* $name:ident($storage:ty) => $vt:ident . $field:ident;)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug)]
            pub enum $name {}

            impl Kind for $name {
                const VT: VarType = VarType::$vt;
                type Storage = $storage;

                unsafe fn load(data: &VariantData) -> $storage {
                    data.$field
                }

                fn store(data: &mut VariantData, value: $storage) {
                    data.$field = value;
                }
            }
        )*
    };
}

/// Zero-sized markers, one per value tag.
pub mod kind {
    use super::*;

    kinds! {
        I1(i8) => I1.c_val;
        UI1(u8) => UI1.b_val;
        I2(i16) => I2.i_val;
        UI2(u16) => UI2.ui_val;
        I4(i32) => I4.l_val;
        UI4(u32) => UI4.ul_val;
        I8(i64) => I8.ll_val;
        UI8(u64) => UI8.ull_val;
        /// `VT_INT`, the machine `int`.
        Int(i32) => INT.int_val;
        /// `VT_UINT`, the machine `unsigned int`.
        UInt(u32) => UINT.uint_val;
        R4(f32) => R4.flt_val;
        R8(f64) => R8.dbl_val;
        Cy(Currency) => CY.cy_val;
        /// Days since 1899-12-30 as `VT_DATE`.
        Date(f64) => DATE.date;
        /// An `SCODE` as `VT_ERROR`. Servers read `DISP_E_PARAMNOTFOUND` here as "argument
        /// omitted".
        Error(i32) => ERROR.scode;
        /// `VARIANT_BOOL`: -1 is true, 0 is false.
        Bool(VariantBoolRaw) => BOOL.bool_val;
    }
}

/// A value pinned to the tag of `K`, for storage types that could mean more than one thing.
#[repr(transparent)]
pub struct Safe<K: Kind> {
    value: K::Storage,
    kind: PhantomData<K>,
}

pub type ErrorCode = Safe<kind::Error>;
pub type Date = Safe<kind::Date>;
pub type Int = Safe<kind::Int>;
pub type UInt = Safe<kind::UInt>;
pub type VariantBool = Safe<kind::Bool>;

impl<K: Kind> Safe<K> {
    pub const fn new(value: K::Storage) -> Self {
        Safe {
            value,
            kind: PhantomData,
        }
    }

    pub fn get(self) -> K::Storage {
        self.value
    }
}

impl<K: Kind> Clone for Safe<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: Kind> Copy for Safe<K> {}

impl<K: Kind> PartialEq for Safe<K> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<K: Kind> fmt::Debug for Safe<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Safe<{}>({:?})", K::VT, self.value)
    }
}

impl VariantBool {
    pub const TRUE: VariantBool = Safe::new(VARIANT_TRUE);
    pub const FALSE: VariantBool = Safe::new(VARIANT_FALSE);

    pub fn as_bool(self) -> bool {
        self.value != VARIANT_FALSE
    }
}

impl From<bool> for VariantBool {
    fn from(value: bool) -> Self {
        if value {
            VariantBool::TRUE
        } else {
            VariantBool::FALSE
        }
    }
}

impl ErrorCode {
    /// `DISP_E_PARAMNOTFOUND`, the conventional marker for an omitted optional argument.
    pub const MISSING: ErrorCode = Safe::new(HResult::DISP_E_PARAMNOTFOUND.0);

    pub fn hresult(self) -> HResult {
        HResult(self.value)
    }
}

impl From<HResult> for ErrorCode {
    fn from(value: HResult) -> Self {
        Safe::new(value.0)
    }
}

/// A pointer to caller storage pinned to the tag of `K` (`K::VT | VT_BYREF`).
pub struct SafeRef<'a, K: Kind> {
    ptr: *mut K::Storage,
    borrow: PhantomData<&'a mut K::Storage>,
}

impl<'a, K: Kind> SafeRef<'a, K> {
    pub fn new(target: &'a mut K::Storage) -> Self {
        SafeRef {
            ptr: target,
            borrow: PhantomData,
        }
    }

    /// A null reference, which marshals as a null pointer of this tag.
    pub fn null() -> Self {
        SafeRef {
            ptr: std::ptr::null_mut(),
            borrow: PhantomData,
        }
    }

    pub fn as_ptr(&self) -> *mut K::Storage {
        self.ptr
    }
}
