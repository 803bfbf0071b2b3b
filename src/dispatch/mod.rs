//! Late-bound calls against an automation object.

#[cfg(windows)]
mod activate;
mod object;

use std::collections::HashMap;

use log::{debug, trace};
use widestring::U16CString;

#[cfg(windows)]
pub use self::activate::{activate, Apartment};
pub use self::object::{AutomationObject, Invocation};

use crate::args::{ArgumentList, IntoArgument, IntoArguments};
use crate::com::Dispatch;
use crate::config::Config;
use crate::error::{AutomationError, Result};
use crate::sys::{
    DispId, ExcepInfo, HResult, DISPATCH_METHOD, DISPATCH_PROPERTYGET, DISPATCH_PROPERTYPUT,
    DISPATCH_PROPERTYPUTREF, LOCALE_USER_DEFAULT,
};
use crate::variant::{GetVariant, Variant};

/// The `wFlags` verb of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    Method,
    PropertyGet,
    PropertyPut,
    PropertyPutRef,
}

impl InvokeKind {
    pub fn flags(self) -> u16 {
        match self {
            InvokeKind::Method => DISPATCH_METHOD,
            InvokeKind::PropertyGet => DISPATCH_PROPERTYGET,
            InvokeKind::PropertyPut => DISPATCH_PROPERTYPUT,
            InvokeKind::PropertyPutRef => DISPATCH_PROPERTYPUTREF,
        }
    }

    fn is_put(self) -> bool {
        matches!(self, InvokeKind::PropertyPut | InvokeKind::PropertyPutRef)
    }
}

/// A bound automation object plus the member ids resolved on it so far.
///
/// Every verb resolves the member name before any argument is marshalled, so an unknown name
/// fails without side effects. Ids are cached for the life of the client, keyed without case
/// like the names themselves.
pub struct DispatchClient<O: AutomationObject = Dispatch> {
    object: O,
    locale: u32,
    names: HashMap<String, DispId>,
}

impl<O: AutomationObject> DispatchClient<O> {
    pub fn new(object: O) -> Self {
        Self::with_locale(object, LOCALE_USER_DEFAULT)
    }

    pub fn with_locale(object: O, locale: u32) -> Self {
        DispatchClient {
            object,
            locale,
            names: HashMap::new(),
        }
    }

    pub fn from_config(object: O, config: &Config) -> Self {
        Self::with_locale(object, config.dispatch.locale)
    }

    pub fn object(&self) -> &O {
        &self.object
    }

    pub fn into_inner(self) -> O {
        self.object
    }

    pub fn locale(&self) -> u32 {
        self.locale
    }

    /// Resolves `name`, asking the object only the first time it is seen in any case.
    pub fn dispid(&mut self, name: &str) -> Result<DispId> {
        let key = name.to_lowercase();
        if let Some(&id) = self.names.get(&key) {
            return Ok(id);
        }
        let wide = U16CString::from_str(name).map_err(|_| AutomationError::MemberNotFound {
            name: name.to_owned(),
            code: HResult::DISP_E_UNKNOWNNAME,
        })?;
        match self.object.ids_of_names(&wide, self.locale) {
            Ok(id) => {
                debug!("resolved `{}` to dispid {}", name, id);
                self.names.insert(key, id);
                Ok(id)
            }
            Err(code) => {
                debug!("GetIDsOfNames(`{}`) failed: {}", name, code);
                Err(AutomationError::MemberNotFound {
                    name: name.to_owned(),
                    code,
                })
            }
        }
    }

    /// Calls a method and returns whatever it returned (`VT_EMPTY` for none).
    pub fn method<'a, A: IntoArguments<'a>>(&mut self, name: &str, args: A) -> Result<Variant> {
        self.invoke(name, InvokeKind::Method, args)
    }

    /// Reads a property and converts it to `T`.
    pub fn get<T: GetVariant>(&mut self, name: &str) -> Result<T> {
        self.get_with(name, ())
    }

    /// Reads an indexed property such as `Item(1)`.
    pub fn get_with<'a, T: GetVariant, A: IntoArguments<'a>>(
        &mut self,
        name: &str,
        args: A,
    ) -> Result<T> {
        self.invoke(name, InvokeKind::PropertyGet, args)?.get::<T>()
    }

    /// Assigns a property.
    pub fn put<'a, V: IntoArgument<'a>>(&mut self, name: &str, value: V) -> Result<()> {
        let dispid = self.dispid(name)?;
        let mut args = ArgumentList::new();
        args.push(value)?;
        self.invoke_id(dispid, InvokeKind::PropertyPut, args).map(drop)
    }

    /// The general form: resolve, marshal, invoke.
    ///
    /// For property puts the last argument is the value being assigned.
    pub fn invoke<'a, A: IntoArguments<'a>>(
        &mut self,
        name: &str,
        kind: InvokeKind,
        args: A,
    ) -> Result<Variant> {
        let dispid = self.dispid(name)?;
        let args = args.into_arguments()?;
        self.invoke_id(dispid, kind, args)
    }

    /// Invokes an already resolved member.
    ///
    /// `arg_err` in an [`AutomationError::Invocation`] is reported in declaration order.
    pub fn invoke_id(&mut self, dispid: DispId, kind: InvokeKind, args: ArgumentList<'_>) -> Result<Variant> {
        let (mut wire, named) = args.into_dispatch_order(kind.is_put());
        let count = wire.len() as u32;
        trace!("invoke dispid {} {:?} with {} argument(s): {:?}", dispid, kind, count, wire);

        let mut result = Variant::new();
        let mut excep = ExcepInfo::default();
        let mut arg_err = 0u32;
        let call = Invocation {
            dispid,
            lcid: self.locale,
            kind,
            args: &mut wire,
            named_args: &named,
        };
        let slot = if kind.is_put() { None } else { Some(&mut result) };
        let hr = self.object.invoke(call, slot, &mut excep, &mut arg_err);

        if hr == HResult::DISP_E_EXCEPTION {
            let server = excep.take_server_error();
            debug!("dispid {} raised {}", dispid, server);
            return Err(AutomationError::Server(server));
        }
        if hr.is_err() {
            debug!("Invoke of dispid {} failed: {}", dispid, hr);
            let arg_err = match hr {
                HResult::DISP_E_TYPEMISMATCH | HResult::DISP_E_PARAMNOTFOUND if arg_err < count => {
                    Some(count - 1 - arg_err)
                }
                _ => None,
            };
            return Err(AutomationError::Invocation {
                dispid,
                code: hr,
                arg_err,
            });
        }
        trace!("dispid {} returned {:?}", dispid, result);
        Ok(result)
    }
}

#[cfg(windows)]
impl DispatchClient<Dispatch> {
    /// Activates `prog_id` with the context from `config` and binds to it.
    ///
    /// COM must already be initialised on this thread (see [`Apartment`]).
    pub fn from_prog_id(prog_id: &str, config: &Config) -> Result<Self> {
        let object = activate(prog_id, config.activation.context)?;
        Ok(Self::from_config(object, config))
    }
}
