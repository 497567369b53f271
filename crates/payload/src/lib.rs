//! grimoire payload - injected entry point
//!
//! Compiles to the DLL an injector loads into the game process. `DllMain`
//! does nothing but spawn the bootstrap thread on attach and run teardown
//! on detach; all real work happens off the loader lock.
//!
//! Bootstrap order matters: logging first, then the swap-chain vtable
//! probe, then the hooks are installed *disabled*, then the IL2CPP runtime
//! bind, and only once the frame pump is wired in do the hooks go live.
//! Any failure before that point rolls everything back and leaves the
//! game untouched.

#![cfg(windows)]

use std::ffi::c_void;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use grimoire_core::config::ConfigStore;
use grimoire_core::hooks::dxgi;
use grimoire_core::modules::{
    EnemyEsp, EscapeRequests, Escapes, Invisible, ItemSpawner, NoClip, SpawnRequests,
};
use grimoire_core::render::pump::{self, FramePump};
use grimoire_core::{logging, HookError, HookKey, InterceptionEngine, Registry};
use grimoire_sdk::Runtime;

use windows::Win32::Foundation::{BOOL, HMODULE, TRUE};
use windows::Win32::System::LibraryLoader::DisableThreadLibraryCalls;
use windows::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

/// Seconds to wait for `GameAssembly.dll` before giving up on the runtime
/// bind. The overlay still comes up without it; modules just stay inert.
const RUNTIME_BIND_WAIT_SECS: u64 = 30;

/// Grace period before touching anything. Injection often lands while the
/// game is still creating its device.
const STARTUP_DELAY: Duration = Duration::from_secs(1);

static ENGINE: Mutex<Option<InterceptionEngine>> = Mutex::new(None);

fn build_registry(escapes: &EscapeRequests, spawns: &SpawnRequests) -> Registry {
    let mut registry = Registry::new();
    registry.register(Box::new(NoClip::new()));
    registry.register(Box::new(EnemyEsp::new()));
    registry.register(Box::new(Invisible::new()));
    registry.register_service(Box::new(Escapes::new(escapes.clone())));
    registry.register_service(Box::new(ItemSpawner::new(spawns.clone())));
    registry
}

/// Everything between injection and the first hooked frame.
fn bootstrap() {
    std::thread::sleep(STARTUP_DELAY);
    logging::init();
    info!(version = env!("CARGO_PKG_VERSION"), "payload attached");

    let targets = match dxgi::resolve_swap_chain_targets() {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "swap-chain probe failed, aborting");
            return;
        }
    };

    let mut engine = InterceptionEngine::new();
    let install = |engine: &mut InterceptionEngine| -> Result<(HookKey, HookKey), HookError> {
        // SAFETY: targets come from a live swap-chain vtable and the
        // replacements are our extern "system" detours with matching
        // signatures.
        unsafe {
            let present = engine.install(
                "IDXGISwapChain::Present",
                targets.present,
                pump::hk_present as *const (),
            )?;
            let resize = engine.install(
                "IDXGISwapChain::ResizeBuffers",
                targets.resize_buffers,
                pump::hk_resize_buffers as *const (),
            )?;
            Ok((present, resize))
        }
    };
    let (present_key, resize_key) = match install(&mut engine) {
        Ok(keys) => keys,
        Err(e) => {
            error!(error = %e, "hook install failed, aborting");
            return;
        }
    };
    // install() hands back keys only after both prepares succeeded, so the
    // trampolines are always present here.
    let (Some(present_original), Some(resize_original)) = (
        engine.trampoline(present_key),
        engine.trampoline(resize_key),
    ) else {
        error!("trampoline lookup failed, aborting");
        return;
    };

    // A missing runtime is survivable: the menu and console still work,
    // modules report the miss and do nothing.
    let runtime = match Runtime::bind(RUNTIME_BIND_WAIT_SECS) {
        Ok(r) => Some(r),
        Err(e) => {
            warn!(error = %e, "runtime bind failed, modules will stay inert");
            None
        }
    };

    let store = match ConfigStore::default_location() {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(error = %e, "no settings location, persistence disabled");
            None
        }
    };

    let escapes = EscapeRequests::default();
    let spawns = SpawnRequests::default();
    let registry = build_registry(&escapes, &spawns);
    let frame_pump = FramePump::new(registry, escapes, spawns, runtime, store);
    if !pump::install_pump(frame_pump, present_original, resize_original) {
        error!("frame pump already installed, aborting");
        return;
    }

    if let Err(e) = engine.enable_all() {
        error!(error = %e, "hook enable failed, aborting");
        return;
    }
    info!("hooks live, overlay will initialize on the next frame");
    *ENGINE.lock() = Some(engine);
}

/// Detach-time teardown. Overlay resources and settings go first, then the
/// patched bytes come back out in reverse install order.
fn teardown() {
    pump::shutdown_pump();
    if let Some(mut engine) = ENGINE.lock().take() {
        if let Err(e) = engine.disable_all() {
            warn!(error = %e, "hook disable failed during teardown");
        }
        engine.remove_all();
    }
    info!("payload detached");
}

#[no_mangle]
extern "system" fn DllMain(module: HMODULE, reason: u32, _reserved: *mut c_void) -> BOOL {
    match reason {
        DLL_PROCESS_ATTACH => {
            // Thread attach/detach notifications are noise for us.
            unsafe {
                let _ = DisableThreadLibraryCalls(module);
            }
            std::thread::spawn(bootstrap);
        }
        DLL_PROCESS_DETACH => {
            // Holder of the loader lock; keep this path short and never
            // let a panic escape into the loader.
            let _ = std::panic::catch_unwind(teardown);
        }
        _ => {}
    }
    TRUE
}
