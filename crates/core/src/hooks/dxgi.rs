//! Swap-chain vtable target resolution
//!
//! Every D3D11 swap chain in the process shares one vtable, so the entries
//! read from a throwaway swap chain on a hidden window are the same ones
//! the game's `Present` and `ResizeBuffers` calls go through. The dummy
//! device, swap chain and window are torn down before this returns; only
//! the two code addresses survive.

use windows::core::{w, Interface};
use windows::Win32::Foundation::{HINSTANCE, HWND};
use windows::Win32::Graphics::Direct3D::{D3D_DRIVER_TYPE_HARDWARE, D3D_FEATURE_LEVEL_11_0};
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDeviceAndSwapChain, ID3D11Device, ID3D11DeviceContext, D3D11_CREATE_DEVICE_FLAG,
    D3D11_SDK_VERSION,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_MODE_DESC, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    IDXGISwapChain, DXGI_SWAP_CHAIN_DESC, DXGI_SWAP_EFFECT_DISCARD,
    DXGI_USAGE_RENDER_TARGET_OUTPUT,
};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, RegisterClassExW, UnregisterClassW,
    WINDOW_EX_STYLE, WNDCLASSEXW, WS_OVERLAPPEDWINDOW,
};

use super::HookError;

/// `IDXGISwapChain::Present` vtable index.
const VTBL_PRESENT: usize = 8;

/// `IDXGISwapChain::ResizeBuffers` vtable index.
const VTBL_RESIZE_BUFFERS: usize = 13;

/// Code addresses of the live swap-chain entries.
#[derive(Debug, Clone, Copy)]
pub struct SwapChainTargets {
    pub present: *const (),
    pub resize_buffers: *const (),
}

/// Spin up a throwaway device and swap chain and read the shared vtable.
pub fn resolve_swap_chain_targets() -> Result<SwapChainTargets, HookError> {
    let class_name = w!("grimoire_probe");
    let instance: HINSTANCE = unsafe { GetModuleHandleW(None) }
        .map_err(|e| HookError::Vtable(e.to_string()))?
        .into();

    let class = WNDCLASSEXW {
        cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
        lpfnWndProc: Some(DefWindowProcW),
        hInstance: instance,
        lpszClassName: class_name,
        ..Default::default()
    };
    if unsafe { RegisterClassExW(&class) } == 0 {
        return Err(HookError::Vtable("window class registration failed".into()));
    }

    let window = unsafe {
        CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            class_name,
            w!("probe"),
            WS_OVERLAPPEDWINDOW,
            0,
            0,
            100,
            100,
            None,
            None,
            instance,
            None,
        )
    };
    let window = match window {
        Ok(w) => w,
        Err(e) => {
            unsafe {
                let _ = UnregisterClassW(class_name, instance);
            }
            return Err(HookError::Vtable(e.to_string()));
        }
    };

    let result = create_probe_swap_chain(window);

    unsafe {
        let _ = DestroyWindow(window);
        let _ = UnregisterClassW(class_name, instance);
    }

    let targets = result?;
    tracing::info!(
        present = format_args!("{:#x}", targets.present as usize),
        resize_buffers = format_args!("{:#x}", targets.resize_buffers as usize),
        "swap-chain targets resolved"
    );
    Ok(targets)
}

fn create_probe_swap_chain(window: HWND) -> Result<SwapChainTargets, HookError> {
    let desc = DXGI_SWAP_CHAIN_DESC {
        BufferDesc: DXGI_MODE_DESC {
            Width: 100,
            Height: 100,
            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
            ..Default::default()
        },
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        BufferCount: 1,
        OutputWindow: window,
        Windowed: true.into(),
        SwapEffect: DXGI_SWAP_EFFECT_DISCARD,
        ..Default::default()
    };

    let mut swap_chain: Option<IDXGISwapChain> = None;
    let mut device: Option<ID3D11Device> = None;
    let mut context: Option<ID3D11DeviceContext> = None;

    unsafe {
        D3D11CreateDeviceAndSwapChain(
            None,
            D3D_DRIVER_TYPE_HARDWARE,
            None,
            D3D11_CREATE_DEVICE_FLAG(0),
            Some(&[D3D_FEATURE_LEVEL_11_0]),
            D3D11_SDK_VERSION,
            Some(&desc),
            Some(&mut swap_chain),
            Some(&mut device),
            None,
            Some(&mut context),
        )
    }
    .map_err(|e| HookError::Vtable(e.to_string()))?;

    let swap_chain = swap_chain.ok_or_else(|| HookError::Vtable("no swap chain".into()))?;

    // SAFETY: a COM object's first pointer-sized field is its vtable.
    let targets = unsafe {
        let vtable = *(swap_chain.as_raw() as *const *const usize);
        SwapChainTargets {
            present: *vtable.add(VTBL_PRESENT) as *const (),
            resize_buffers: *vtable.add(VTBL_RESIZE_BUFFERS) as *const (),
        }
    };
    Ok(targets)
}
