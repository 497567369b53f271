//! IL2CPP runtime binding
//!
//! Resolves the IL2CPP C API out of `GameAssembly.dll` and pre-binds every
//! foreign entry point the overlay calls, during the one-time startup phase
//! on the initialization thread. No lazy first-use resolution: every method
//! pointer is an explicit field on [`Runtime`], so initialization order is
//! auditable and a failed bind is a single startup error instead of a
//! scattered set of nulls.
//!
//! The bound [`ForeignFn`] values are *addresses*, not capabilities: actually
//! invoking them goes through the core's safe accessor, which re-validates
//! the pointer and isolates faults.

use std::ffi::{c_char, c_void, CString};

use crate::types::{
    ForeignFn, Il2CppAssembly, Il2CppClass, Il2CppDomain, Il2CppImage, Il2CppString, MethodInfo,
};

/// Errors produced while binding to the host's IL2CPP runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// `GameAssembly.dll` never appeared within the bounded wait.
    #[error("GameAssembly module not loaded after {0} seconds")]
    ModuleNotLoaded(u64),

    /// A required IL2CPP C export was missing from the module.
    #[error("IL2CPP export not found: {0}")]
    ExportMissing(&'static str),

    /// `il2cpp_domain_get` returned null.
    #[error("IL2CPP domain unavailable")]
    DomainUnavailable,

    /// A required class was not present in any loaded image.
    #[error("class not found: {0}")]
    ClassMissing(&'static str),

    /// A required method was not present on its class.
    #[error("method not found: {0}")]
    MethodMissing(&'static str),

    /// A required internal call was not registered.
    #[error("icall not found: {0}")]
    IcallMissing(&'static str),

    /// Built for a platform without a live IL2CPP host.
    #[error("IL2CPP runtime not available on this platform")]
    Unsupported,
}

type DomainGetFn = unsafe extern "system" fn() -> *mut Il2CppDomain;
type ThreadAttachFn = unsafe extern "system" fn(*mut Il2CppDomain) -> *mut c_void;
type DomainGetAssembliesFn =
    unsafe extern "system" fn(*mut Il2CppDomain, *mut usize) -> *const *mut Il2CppAssembly;
type AssemblyGetImageFn = unsafe extern "system" fn(*mut Il2CppAssembly) -> *mut Il2CppImage;
type ClassFromNameFn =
    unsafe extern "system" fn(*mut Il2CppImage, *const c_char, *const c_char) -> *mut Il2CppClass;
type MethodFromNameFn =
    unsafe extern "system" fn(*mut Il2CppClass, *const c_char, i32) -> *const MethodInfo;
type ResolveIcallFn = unsafe extern "system" fn(*const c_char) -> *const c_void;
type StringNewFn = unsafe extern "system" fn(*const c_char) -> *mut Il2CppString;

/// The raw IL2CPP C API surface we depend on.
struct Exports {
    domain_get: DomainGetFn,
    thread_attach: ThreadAttachFn,
    domain_get_assemblies: DomainGetAssembliesFn,
    assembly_get_image: AssemblyGetImageFn,
    class_from_name: ClassFromNameFn,
    method_from_name: MethodFromNameFn,
    resolve_icall: ResolveIcallFn,
    string_new: StringNewFn,
}

/// Bound IL2CPP runtime: the exported C API plus every pre-resolved Unity
/// entry point the overlay calls.
///
/// Constructed once by [`Runtime::bind`] on the initialization thread and
/// then only read. All pointers live as long as the host process.
pub struct Runtime {
    exports: Exports,
    domain: *mut Il2CppDomain,

    /// icall `UnityEngine.GameObject::Find(System.String)`.
    pub game_object_find: ForeignFn,
    /// `UnityEngine.GameObject.GetComponent(System.String)`.
    pub game_object_get_component: ForeignFn,
    /// `UnityEngine.GameObject.get_activeSelf()`.
    pub game_object_get_active: ForeignFn,
    /// `UnityEngine.GameObject.get_transform()`.
    pub game_object_get_transform: ForeignFn,
    /// `UnityEngine.Component.get_transform()`.
    pub component_get_transform: ForeignFn,
    /// icall `UnityEngine.Transform::get_position_Injected`.
    pub transform_get_position: ForeignFn,
    /// icall `UnityEngine.Transform::set_position_Injected`.
    pub transform_set_position: ForeignFn,
    /// icall `UnityEngine.Transform::TransformDirection_Injected`.
    pub transform_direction: ForeignFn,
    /// icall `UnityEngine.Camera::get_main`.
    pub camera_get_main: ForeignFn,
    /// icall `UnityEngine.Camera::WorldToScreenPoint_Injected`.
    pub camera_world_to_screen: ForeignFn,
    /// `UnityEngine.Behaviour.set_enabled(System.Boolean)`.
    pub behaviour_set_enabled: ForeignFn,
}

// SAFETY: every pointer is resolved once and immutable afterwards; the
// pointees are code/domain structures owned by the host for the process
// lifetime.
unsafe impl Send for Runtime {}
unsafe impl Sync for Runtime {}

impl Runtime {
    /// Bind to the host's IL2CPP runtime, waiting up to `max_wait_secs` for
    /// `GameAssembly.dll` to be loaded.
    ///
    /// Blocking; call only from the initialization thread.
    pub fn bind(max_wait_secs: u64) -> Result<Self, RuntimeError> {
        let module = wait_for_game_assembly(max_wait_secs)?;

        let exports = Exports {
            domain_get: unsafe { std::mem::transmute(export(module, "il2cpp_domain_get")?) },
            thread_attach: unsafe { std::mem::transmute(export(module, "il2cpp_thread_attach")?) },
            domain_get_assemblies: unsafe {
                std::mem::transmute(export(module, "il2cpp_domain_get_assemblies")?)
            },
            assembly_get_image: unsafe {
                std::mem::transmute(export(module, "il2cpp_assembly_get_image")?)
            },
            class_from_name: unsafe {
                std::mem::transmute(export(module, "il2cpp_class_from_name")?)
            },
            method_from_name: unsafe {
                std::mem::transmute(export(module, "il2cpp_class_get_method_from_name")?)
            },
            resolve_icall: unsafe { std::mem::transmute(export(module, "il2cpp_resolve_icall")?) },
            string_new: unsafe { std::mem::transmute(export(module, "il2cpp_string_new")?) },
        };

        let domain = unsafe { (exports.domain_get)() };
        if domain.is_null() {
            return Err(RuntimeError::DomainUnavailable);
        }
        // The init thread must be attached before any class lookup.
        unsafe { (exports.thread_attach)(domain) };

        let mut rt = Runtime {
            exports,
            domain,
            game_object_find: ForeignFn::null(),
            game_object_get_component: ForeignFn::null(),
            game_object_get_active: ForeignFn::null(),
            game_object_get_transform: ForeignFn::null(),
            component_get_transform: ForeignFn::null(),
            transform_get_position: ForeignFn::null(),
            transform_set_position: ForeignFn::null(),
            transform_direction: ForeignFn::null(),
            camera_get_main: ForeignFn::null(),
            camera_world_to_screen: ForeignFn::null(),
            behaviour_set_enabled: ForeignFn::null(),
        };
        rt.resolve_unity_surface()?;

        tracing::info!("IL2CPP runtime bound, domain at {:p}", domain);
        Ok(rt)
    }

    /// Attach the calling thread to the IL2CPP domain.
    ///
    /// Required once per foreign thread before it touches managed objects;
    /// the render thread is already attached by the host.
    pub fn attach_current_thread(&self) {
        unsafe { (self.exports.thread_attach)(self.domain) };
    }

    /// Find a class by namespace and name across all loaded images.
    pub fn find_class(
        &self,
        namespace: &'static str,
        name: &'static str,
    ) -> Result<*mut Il2CppClass, RuntimeError> {
        let ns = CString::new(namespace).map_err(|_| RuntimeError::ClassMissing(name))?;
        let cn = CString::new(name).map_err(|_| RuntimeError::ClassMissing(name))?;

        let mut count: usize = 0;
        let assemblies = unsafe { (self.exports.domain_get_assemblies)(self.domain, &mut count) };
        if assemblies.is_null() {
            return Err(RuntimeError::ClassMissing(name));
        }

        for i in 0..count {
            let assembly = unsafe { *assemblies.add(i) };
            if assembly.is_null() {
                continue;
            }
            let image = unsafe { (self.exports.assembly_get_image)(assembly) };
            if image.is_null() {
                continue;
            }
            let class = unsafe { (self.exports.class_from_name)(image, ns.as_ptr(), cn.as_ptr()) };
            if !class.is_null() {
                return Ok(class);
            }
        }
        Err(RuntimeError::ClassMissing(name))
    }

    /// Resolve the native entry point of a method by class, name and arity.
    pub fn method_pointer(
        &self,
        class: *mut Il2CppClass,
        name: &'static str,
        args: i32,
    ) -> Result<ForeignFn, RuntimeError> {
        let mn = CString::new(name).map_err(|_| RuntimeError::MethodMissing(name))?;
        let info = unsafe { (self.exports.method_from_name)(class, mn.as_ptr(), args) };
        if info.is_null() {
            return Err(RuntimeError::MethodMissing(name));
        }
        let ptr = unsafe { (*info).method_pointer };
        if ptr.is_null() {
            return Err(RuntimeError::MethodMissing(name));
        }
        Ok(ForeignFn(ptr))
    }

    /// Resolve a registered internal call by its full managed signature.
    pub fn icall(&self, name: &'static str) -> Result<ForeignFn, RuntimeError> {
        let cn = CString::new(name).map_err(|_| RuntimeError::IcallMissing(name))?;
        let ptr = unsafe { (self.exports.resolve_icall)(cn.as_ptr()) };
        if ptr.is_null() {
            return Err(RuntimeError::IcallMissing(name));
        }
        Ok(ForeignFn(ptr))
    }

    /// Allocate a managed string in the host heap.
    ///
    /// The returned pointer is GC-owned by the host; do not retain it past
    /// the call it was built for.
    pub fn new_string(&self, value: &str) -> *mut Il2CppString {
        let c = match CString::new(value) {
            Ok(c) => c,
            Err(_) => return std::ptr::null_mut(),
        };
        unsafe { (self.exports.string_new)(c.as_ptr()) }
    }

    fn resolve_unity_surface(&mut self) -> Result<(), RuntimeError> {
        self.game_object_find = self.icall("UnityEngine.GameObject::Find")?;
        self.camera_get_main = self.icall("UnityEngine.Camera::get_main")?;
        self.camera_world_to_screen =
            self.icall("UnityEngine.Camera::WorldToScreenPoint_Injected")?;
        self.transform_get_position = self.icall("UnityEngine.Transform::get_position_Injected")?;
        self.transform_set_position = self.icall("UnityEngine.Transform::set_position_Injected")?;
        self.transform_direction =
            self.icall("UnityEngine.Transform::TransformDirection_Injected")?;

        let game_object = self.find_class("UnityEngine", "GameObject")?;
        self.game_object_get_component = self.method_pointer(game_object, "GetComponent", 1)?;
        self.game_object_get_active = self.method_pointer(game_object, "get_activeSelf", 0)?;
        self.game_object_get_transform = self.method_pointer(game_object, "get_transform", 0)?;

        let component = self.find_class("UnityEngine", "Component")?;
        self.component_get_transform = self.method_pointer(component, "get_transform", 0)?;

        let behaviour = self.find_class("UnityEngine", "Behaviour")?;
        self.behaviour_set_enabled = self.method_pointer(behaviour, "set_enabled", 1)?;

        Ok(())
    }
}

#[cfg(windows)]
fn wait_for_game_assembly(max_wait_secs: u64) -> Result<*mut c_void, RuntimeError> {
    use windows::core::s;
    use windows::Win32::System::LibraryLoader::GetModuleHandleA;

    // Coarse blocking wait on an otherwise idle thread; the host may still
    // be mapping its own modules when we are injected.
    for _ in 0..=max_wait_secs {
        if let Ok(module) = unsafe { GetModuleHandleA(s!("GameAssembly.dll")) } {
            if !module.is_invalid() {
                return Ok(module.0);
            }
        }
        std::thread::sleep(std::time::Duration::from_secs(1));
    }
    Err(RuntimeError::ModuleNotLoaded(max_wait_secs))
}

#[cfg(not(windows))]
fn wait_for_game_assembly(_max_wait_secs: u64) -> Result<*mut c_void, RuntimeError> {
    Err(RuntimeError::Unsupported)
}

#[cfg(windows)]
fn export(module: *mut c_void, name: &'static str) -> Result<*const c_void, RuntimeError> {
    use windows::core::PCSTR;
    use windows::Win32::Foundation::HMODULE;
    use windows::Win32::System::LibraryLoader::GetProcAddress;

    let c = CString::new(name).map_err(|_| RuntimeError::ExportMissing(name))?;
    let addr = unsafe { GetProcAddress(HMODULE(module), PCSTR(c.as_ptr() as *const u8)) };
    match addr {
        Some(f) => Ok(f as *const c_void),
        None => Err(RuntimeError::ExportMissing(name)),
    }
}

#[cfg(not(windows))]
fn export(_module: *mut c_void, name: &'static str) -> Result<*const c_void, RuntimeError> {
    Err(RuntimeError::ExportMissing(name))
}
