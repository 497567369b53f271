//! Per-frame sequencing inside the hooked Present
//!
//! The pump lazily initializes against the swap chain, retrying on later
//! frames if the device is not ready yet, then runs fixed stages every
//! frame: input, module update, late update, then one draw stage per HUD
//! window and the final submit. Each stage sits behind its own panic
//! barrier; a stage that blows up costs its output for the frame, never
//! the frame itself. The call into the game's original
//! `Present`/`ResizeBuffers` happens unconditionally, outside every
//! barrier.
//!
//! Reentrancy: the detours take the pump lock with `try_lock`. If the game
//! re-enters `Present` on the same stack the inner call skips the overlay
//! and forwards straight to the original.

use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use grimoire_sdk::Runtime;
use windows::core::{Interface, HRESULT};
use windows::Win32::Foundation::POINT;
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT;
use windows::Win32::Graphics::Dxgi::IDXGISwapChain;
use windows::Win32::UI::Input::KeyboardAndMouse::GetAsyncKeyState;
use windows::Win32::UI::WindowsAndMessaging::{ClipCursor, GetCursorPos, ScreenToClient};

use crate::audio::{self, Cue};
use crate::config::ConfigStore;
use crate::hud::Hud;
use crate::input::{vk, AsyncKeys, EdgeTracker};
use crate::locator::Backoff;
use crate::modules::{EscapeRequests, ModuleCx, Registry, SpawnRequests};
use crate::render::backend::OverlayRenderer;
use crate::render::surface::RenderSurface;
use crate::render::wndproc;

type PresentFn = unsafe extern "system" fn(*mut c_void, u32, u32) -> HRESULT;
type ResizeBuffersFn =
    unsafe extern "system" fn(*mut c_void, u32, u32, u32, DXGI_FORMAT, u32) -> HRESULT;

static PUMP: OnceLock<Mutex<FramePump>> = OnceLock::new();
static ORIGINAL_PRESENT: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
static ORIGINAL_RESIZE: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

struct Overlay {
    imgui: imgui::Context,
    renderer: OverlayRenderer,
}

// SAFETY: the overlay is only ever touched from the render thread, under
// the pump mutex.
unsafe impl Send for Overlay {}

pub struct FramePump {
    registry: Registry,
    hud: Hud,
    runtime: Option<Runtime>,
    store: Option<ConfigStore>,
    surface: Option<RenderSurface>,
    overlay: Option<Overlay>,
    keys: AsyncKeys,
    edges: EdgeTracker,
    start: Instant,
    last_frame: Instant,
    fps: f32,
    /// Gates setup retries when the first frames arrive before the game's
    /// window and device are ready.
    init_backoff: Backoff,
}

/// Wait between failed initialization attempts.
const INIT_RETRY_COOLDOWN: Duration = Duration::from_secs(1);

impl FramePump {
    pub fn new(
        registry: Registry,
        escapes: EscapeRequests,
        spawns: SpawnRequests,
        runtime: Option<Runtime>,
        store: Option<ConfigStore>,
    ) -> Self {
        FramePump {
            registry,
            hud: Hud::new(escapes, spawns),
            runtime,
            store,
            surface: None,
            overlay: None,
            keys: AsyncKeys,
            edges: EdgeTracker::new(),
            start: Instant::now(),
            last_frame: Instant::now(),
            fps: 0.0,
            init_backoff: Backoff::new(INIT_RETRY_COOLDOWN),
        }
    }

    fn run_stage(stage: &'static str, f: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(f)).is_err() {
            tracing::error!(stage, "render stage panicked; output dropped this frame");
        }
    }

    /// Setup against the game's real swap chain. A failed attempt leaves
    /// initialization pending; the next present retries once the backoff
    /// window passes (the device is often not ready on the first frames).
    fn ensure_initialized(&mut self, swap_chain: &IDXGISwapChain) -> bool {
        if self.overlay.is_some() {
            return true;
        }
        if !self.init_backoff.should_attempt() {
            return false;
        }

        let surface = match unsafe { RenderSurface::from_swap_chain(swap_chain) } {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "swap-chain surface setup failed");
                return false;
            }
        };

        let mut imgui = imgui::Context::create();
        imgui.set_ini_filename(None);
        imgui.io_mut().display_size = surface.size;

        let renderer = match OverlayRenderer::new(&surface.device, &surface.context, &mut imgui) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "overlay renderer setup failed");
                return false;
            }
        };

        if !unsafe { wndproc::install(surface.window) } {
            return false;
        }

        if let Some(store) = &self.store {
            match store.load() {
                Ok(Some(config)) => self.hud.apply_config(&config),
                Ok(None) => tracing::info!("no settings file, using defaults"),
                Err(e) => tracing::warn!(error = %e, "settings load failed, using defaults"),
            }
        }
        // Push persisted enable states into the modules themselves.
        let mut cx = Self::cx(self.runtime.as_ref(), &self.keys, 0.0, 0.0, surface.size);
        self.hud.sync_modules(&mut self.registry, &mut cx);

        self.surface = Some(surface);
        self.overlay = Some(Overlay { imgui, renderer });
        tracing::info!("overlay initialized");
        true
    }

    fn cx<'a>(runtime: Option<&'a Runtime>, keys: &'a AsyncKeys, dt: f32, time: f64, screen: [f32; 2]) -> ModuleCx<'a> {
        ModuleCx {
            runtime,
            keys,
            dt,
            time,
            screen,
        }
    }

    fn toggle_menu(&mut self) {
        self.hud.menu_visible = !self.hud.menu_visible;
        wndproc::set_menu_active(self.hud.menu_visible);
        audio::play_cue(Cue::for_state(self.hud.menu_visible));
        if self.hud.menu_visible {
            // The game keeps the cursor clipped to the window center; free
            // it while the menu is up.
            unsafe {
                let _ = ClipCursor(None);
            }
        }
    }

    fn update_io(&mut self, dt: f32) {
        let Some(surface) = &self.surface else { return };
        let Some(overlay) = &mut self.overlay else { return };
        let io = overlay.imgui.io_mut();
        io.display_size = surface.size;
        io.delta_time = dt.max(1.0 / 1000.0);

        let mut point = POINT::default();
        unsafe {
            if GetCursorPos(&mut point).is_ok() && ScreenToClient(surface.window, &mut point).as_bool() {
                io.mouse_pos = [point.x as f32, point.y as f32];
            }
            io.mouse_down[0] = (GetAsyncKeyState(vk::LBUTTON as i32) as u16 & 0x8000) != 0;
            io.mouse_down[1] = (GetAsyncKeyState(vk::RBUTTON as i32) as u16 & 0x8000) != 0;
        }
    }

    /// The whole overlay frame. Runs under the pump lock, inside the
    /// hooked `Present`, before the original is called.
    fn frame(&mut self, swap_chain: &IDXGISwapChain) {
        if !self.ensure_initialized(swap_chain) {
            return;
        }

        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        let time = now.duration_since(self.start).as_secs_f64();
        if dt > 0.0 {
            self.fps = if self.fps == 0.0 {
                1.0 / dt
            } else {
                self.fps * 0.95 + (1.0 / dt) * 0.05
            };
        }
        let screen = self.surface.as_ref().map_or([0.0, 0.0], |s| s.size);

        // Input stage: menu toggle plus HUD hotkeys and keybinds.
        Self::run_stage("input", || {
            if self.edges.pressed(&AsyncKeys, vk::DELETE) {
                self.toggle_menu();
            }
            let mut cx = Self::cx(self.runtime.as_ref(), &self.keys, dt, time, screen);
            self.hud.poll_input(&AsyncKeys, &mut self.registry, &mut cx);
        });

        // Module stages.
        Self::run_stage("update", || {
            let mut cx = Self::cx(self.runtime.as_ref(), &self.keys, dt, time, screen);
            self.registry.update_all(&mut cx);
        });
        Self::run_stage("late_update", || {
            let mut cx = Self::cx(self.runtime.as_ref(), &self.keys, dt, time, screen);
            self.registry.late_update_all(&mut cx);
        });

        self.update_io(dt);

        // Build the overlay. Every HUD window is its own stage so a
        // faulting watermark cannot take the menu or console with it.
        let Some(overlay) = &mut self.overlay else { return };
        let Some(surface) = &mut self.surface else { return };
        let fps = self.fps;

        let ui = overlay.imgui.new_frame();
        {
            let mut cx = Self::cx(self.runtime.as_ref(), &self.keys, dt, time, screen);
            let registry = &mut self.registry;
            let hud = &mut self.hud;
            Self::run_stage("module_draw", || registry.draw_all(ui, &mut cx));
            Self::run_stage("watermark", || hud.draw_watermark(ui, fps));
            Self::run_stage("menu", || hud.draw_menu(ui));
            Self::run_stage("browser", || hud.draw_browser(ui));
            Self::run_stage("console", || hud.draw_console(ui));
            Self::run_stage("apply", || hud.apply_actions(registry, &mut cx));
        }
        let draw_data = overlay.imgui.render();

        // Submit whatever the stages produced.
        Self::run_stage("submit", || {
            let Some(target) = surface.target.clone() else { return };
            unsafe {
                // Save the game's bound targets, draw into the backbuffer,
                // put the game's targets back.
                let mut saved: [Option<_>; 1] = [None];
                let mut saved_depth = None;
                surface
                    .context
                    .OMGetRenderTargets(Some(&mut saved), Some(&mut saved_depth));
                surface
                    .context
                    .OMSetRenderTargets(Some(&[Some(target)]), None);
                if let Err(e) = overlay.renderer.render(draw_data) {
                    tracing::error!(error = %e, "overlay draw failed");
                }
                surface
                    .context
                    .OMSetRenderTargets(Some(&saved), saved_depth.as_ref());
            }
        });
    }

    fn handle_resize_pre(&mut self) {
        if let Some(surface) = &mut self.surface {
            surface.release_target();
        }
    }

    fn handle_resize_post(&mut self, swap_chain: &IDXGISwapChain, result: HRESULT) {
        if !super::rebuild_after_resize(self.surface.is_some(), result.is_ok()) {
            return;
        }
        if let Some(surface) = &mut self.surface {
            if let Err(e) = unsafe { surface.rebuild_target(swap_chain) } {
                tracing::error!(error = %e, "backbuffer view rebuild failed");
            } else if let Some(overlay) = &mut self.overlay {
                overlay.imgui.io_mut().display_size = surface.size;
            }
        }
    }

    fn shutdown(&mut self) {
        unsafe {
            let _ = ClipCursor(None);
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.hud.to_config()) {
                tracing::warn!(error = %e, "settings save failed during shutdown");
            }
        }
        if let Some(surface) = &self.surface {
            unsafe { wndproc::uninstall(surface.window) };
        }
        self.overlay = None;
        self.surface = None;
        tracing::info!("overlay torn down");
    }
}

/// Install the process-wide pump and the original entry points the detours
/// forward to. Returns false if a pump is already installed.
pub fn install_pump(pump: FramePump, present: *const (), resize_buffers: *const ()) -> bool {
    if PUMP.set(Mutex::new(pump)).is_err() {
        return false;
    }
    ORIGINAL_PRESENT.store(present as *mut c_void, Ordering::Release);
    ORIGINAL_RESIZE.store(resize_buffers as *mut c_void, Ordering::Release);
    true
}

/// Persist settings and release every window/device resource. The hooks
/// themselves stay for the caller to disable afterwards.
pub fn shutdown_pump() {
    if let Some(lock) = PUMP.get() {
        lock.lock().shutdown();
    }
}

/// `IDXGISwapChain::Present` detour.
pub unsafe extern "system" fn hk_present(
    swap_chain: *mut c_void,
    sync_interval: u32,
    flags: u32,
) -> HRESULT {
    let _ = catch_unwind(AssertUnwindSafe(|| {
        if let Some(lock) = PUMP.get() {
            if let Some(mut pump) = lock.try_lock() {
                if let Some(chain) = IDXGISwapChain::from_raw_borrowed(&swap_chain) {
                    pump.frame(chain);
                }
            }
        }
    }));

    let original = ORIGINAL_PRESENT.load(Ordering::Acquire);
    if original.is_null() {
        return HRESULT(0);
    }
    let original: PresentFn = std::mem::transmute(original);
    original(swap_chain, sync_interval, flags)
}

/// `IDXGISwapChain::ResizeBuffers` detour. Our backbuffer view is dropped
/// before the original runs and rebuilt only if it succeeded.
pub unsafe extern "system" fn hk_resize_buffers(
    swap_chain: *mut c_void,
    buffer_count: u32,
    width: u32,
    height: u32,
    format: DXGI_FORMAT,
    flags: u32,
) -> HRESULT {
    let _ = catch_unwind(AssertUnwindSafe(|| {
        if let Some(lock) = PUMP.get() {
            if let Some(mut pump) = lock.try_lock() {
                pump.handle_resize_pre();
            }
        }
    }));

    let original = ORIGINAL_RESIZE.load(Ordering::Acquire);
    if original.is_null() {
        return HRESULT(0);
    }
    let original: ResizeBuffersFn = std::mem::transmute(original);
    let result = original(swap_chain, buffer_count, width, height, format, flags);

    let _ = catch_unwind(AssertUnwindSafe(|| {
        if let Some(lock) = PUMP.get() {
            if let Some(mut pump) = lock.try_lock() {
                if let Some(chain) = IDXGISwapChain::from_raw_borrowed(&swap_chain) {
                    pump.handle_resize_post(chain, result);
                }
            }
        }
    }));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_panic_does_not_stop_later_stages() {
        let mut later_ran = false;
        FramePump::run_stage("first", || panic!("boom"));
        FramePump::run_stage("second", || later_ran = true);
        assert!(later_ran);
    }
}
