//! End-to-end calls against an in-process stand-in for `WScript.Shell`.

use std::cell::{Cell, RefCell};

use autocom::sys::DISPID_PROPERTYPUT;
use autocom::{
    AutomationError, AutomationObject, DispId, DispatchClient, ExcepInfo, HResult, Invocation,
    InvokeKind, Out, VarType, Variant, VariantBool,
};
use widestring::U16CStr;

const RUN: DispId = 1000;
const TIMEOUT: DispId = 1001;
const ALLOW_UI: DispId = 1002;
const EXEC: DispId = 1003;

struct FakeShell {
    calls: RefCell<Vec<(DispId, InvokeKind, Vec<VarType>)>>,
    allow_ui: Cell<bool>,
}

impl FakeShell {
    fn new() -> Self {
        FakeShell {
            calls: RefCell::new(Vec::new()),
            allow_ui: Cell::new(true),
        }
    }

    fn run(&self, args: &mut [Variant], result: Option<&mut Variant>, arg_err: &mut u32) -> HResult {
        // Wire order: wait flag, window style, command.
        if args.len() != 3 {
            return HResult::DISP_E_BADPARAMCOUNT;
        }
        let command = match args[2].get::<String>() {
            Ok(command) => command,
            Err(_) => {
                *arg_err = 2;
                return HResult::DISP_E_TYPEMISMATCH;
            }
        };
        if args[1].vt() != VarType::I2 {
            *arg_err = 1;
            return HResult::DISP_E_TYPEMISMATCH;
        }
        let Ok(wait) = args[0].get_ref::<i16>() else {
            *arg_err = 0;
            return HResult::DISP_E_TYPEMISMATCH;
        };
        if !wait.is_null() {
            // SAFETY: the client keeps the caller's storage alive for the call.
            unsafe { *wait = command.len() as i16 };
        }
        if let Some(result) = result {
            let _ = result.set(0i32);
        }
        HResult::S_OK
    }
}

impl AutomationObject for FakeShell {
    fn ids_of_names(&self, name: &U16CStr, _lcid: u32) -> Result<DispId, HResult> {
        match name.to_string_lossy().as_str() {
            "Run" => Ok(RUN),
            "Timeout" => Ok(TIMEOUT),
            "AllowUI" => Ok(ALLOW_UI),
            "Exec" => Ok(EXEC),
            _ => Err(HResult::DISP_E_UNKNOWNNAME),
        }
    }

    fn invoke(
        &self,
        call: Invocation<'_>,
        result: Option<&mut Variant>,
        excep: &mut ExcepInfo,
        arg_err: &mut u32,
    ) -> HResult {
        self.calls.borrow_mut().push((
            call.dispid,
            call.kind,
            call.args.iter().map(Variant::vt).collect(),
        ));
        match (call.dispid, call.kind) {
            (RUN, InvokeKind::Method) => self.run(call.args, result, arg_err),
            (TIMEOUT, InvokeKind::PropertyGet) => {
                if let Some(result) = result {
                    let _ = result.set(-1i32);
                }
                HResult::S_OK
            }
            (ALLOW_UI, InvokeKind::PropertyGet) => {
                if let Some(result) = result {
                    let _ = result.set(self.allow_ui.get());
                }
                HResult::S_OK
            }
            (ALLOW_UI, InvokeKind::PropertyPut) => {
                if call.named_args != [DISPID_PROPERTYPUT] || call.args.len() != 1 {
                    return HResult::DISP_E_PARAMNOTFOUND;
                }
                match call.args[0].get::<bool>() {
                    Ok(value) => {
                        self.allow_ui.set(value);
                        HResult::S_OK
                    }
                    Err(_) => HResult::DISP_E_TYPEMISMATCH,
                }
            }
            (EXEC, InvokeKind::Method) => {
                if excep
                    .raise(
                        HResult(0x8007_0002_u32 as i32),
                        "WshShell.Exec",
                        "The system cannot find the file specified.",
                    )
                    .is_err()
                {
                    return HResult::E_OUTOFMEMORY;
                }
                HResult::DISP_E_EXCEPTION
            }
            _ => HResult::DISP_E_MEMBERNOTFOUND,
        }
    }
}

#[test]
fn test_scenario_a_method_with_output_argument() {
    let mut shell = DispatchClient::new(FakeShell::new());
    let mut wait = 0i16;
    let mut result = shell
        .method("Run", ("notepad.exe", 1i16, Out::new(&mut wait)))
        .unwrap();
    assert_eq!(wait, 11);
    assert_eq!(result.get::<i32>().unwrap(), 0);

    let calls = shell.object().calls.borrow();
    assert_eq!(
        calls[0].2,
        [VarType::I2.by_ref(), VarType::I2, VarType::BSTR]
    );
}

#[test]
fn test_scenario_b_property_get() {
    let mut shell = DispatchClient::new(FakeShell::new());
    let raw = shell.invoke("Timeout", InvokeKind::PropertyGet, ()).unwrap();
    assert_eq!(raw.vt(), VarType::I4);
    assert_eq!(shell.get::<i32>("Timeout").unwrap(), -1);
}

#[test]
fn test_scenario_c_put_then_get() {
    let mut shell = DispatchClient::new(FakeShell::new());
    shell.put("AllowUI", VariantBool::FALSE).unwrap();
    assert!(!shell.get::<bool>("AllowUI").unwrap());
    assert_eq!(shell.get::<VariantBool>("AllowUI").unwrap(), VariantBool::FALSE);
}

#[test]
fn test_scenario_d_unknown_member_marshals_nothing() {
    #[cfg(not(windows))]
    let before = autocom::ole::live_resources();

    let mut shell = DispatchClient::new(FakeShell::new());
    let error = shell
        .method("NoSuchMember", ("would allocate a BSTR", 3i32))
        .unwrap_err();
    match error {
        AutomationError::MemberNotFound { name, code } => {
            assert_eq!(name, "NoSuchMember");
            assert_eq!(code, HResult::DISP_E_UNKNOWNNAME);
        }
        other => panic!("expected MemberNotFound, got {other}"),
    }
    assert!(shell.object().calls.borrow().is_empty());

    #[cfg(not(windows))]
    assert_eq!(autocom::ole::live_resources(), before);
}

#[test]
fn test_scenario_e_failed_coercion_leaves_value_unchanged() {
    let mut value = Variant::from_value("not a number").unwrap();
    let error = value.change_type(VarType::I4).unwrap_err();
    assert_eq!(error.hresult(), Some(HResult::DISP_E_TYPEMISMATCH));
    assert_eq!(value.vt(), VarType::BSTR);
    assert_eq!(value.get::<String>().unwrap(), "not a number");

    let mut wide = Variant::from_value(300i32).unwrap();
    assert!(matches!(
        wide.get::<u8>(),
        Err(AutomationError::Coercion { code: HResult::DISP_E_OVERFLOW, .. })
    ));
    assert_eq!(wide.vt(), VarType::I4);
}

#[test]
fn test_server_exception_is_not_an_invocation_error() {
    let mut shell = DispatchClient::new(FakeShell::new());
    match shell.method("Exec", ("missing.exe",)).unwrap_err() {
        AutomationError::Server(server) => {
            assert_eq!(server.code, HResult(0x8007_0002_u32 as i32));
            assert_eq!(server.source, "WshShell.Exec");
            assert!(server.description.contains("cannot find"));
        }
        other => panic!("expected Server, got {other}"),
    }

    let mut wait = 0i16;
    match shell
        .method("Run", ("notepad.exe", 1i32, Out::new(&mut wait)))
        .unwrap_err()
    {
        AutomationError::Invocation { dispid, code, arg_err } => {
            assert_eq!(dispid, RUN);
            assert_eq!(code, HResult::DISP_E_TYPEMISMATCH);
            assert_eq!(arg_err, Some(1));
        }
        other => panic!("expected Invocation, got {other}"),
    }
    assert_eq!(wait, 0);
}

#[test]
fn test_member_ids_are_resolved_once() {
    let mut shell = DispatchClient::new(FakeShell::new());
    for _ in 0..3 {
        shell.get::<i32>("Timeout").unwrap();
    }
    assert_eq!(shell.dispid("Timeout").unwrap(), TIMEOUT);
    assert_eq!(shell.object().calls.borrow().len(), 3);
}

#[cfg(not(windows))]
#[test]
fn test_calls_do_not_leak() {
    let before = autocom::ole::live_resources();
    let mut shell = DispatchClient::new(FakeShell::new());
    for _ in 0..200 {
        let mut wait = 0i16;
        shell
            .method("Run", (String::from("calc.exe"), 0i16, Out::new(&mut wait)))
            .unwrap();
        let _ = shell.method("Exec", ("x",));
    }
    assert_eq!(autocom::ole::live_resources(), before);
}
