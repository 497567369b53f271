//! Device objects tied to the game's swap chain
//!
//! The swap chain itself is borrowed: it belongs to the game and arrives as
//! an argument on every hooked call. We own only what we derive from it,
//! the device, the immediate context and our render-target view of the
//! backbuffer. The view is released before every `ResizeBuffers` and
//! rebuilt afterwards; holding it across the resize would make the resize
//! fail.

use windows::core::Result;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11DeviceContext, ID3D11RenderTargetView, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::IDXGISwapChain;

pub struct RenderSurface {
    pub device: ID3D11Device,
    pub context: ID3D11DeviceContext,
    pub window: HWND,
    pub target: Option<ID3D11RenderTargetView>,
    /// Backbuffer size in pixels.
    pub size: [f32; 2],
}

impl RenderSurface {
    /// Derive device objects from the game's live swap chain.
    ///
    /// # Safety
    ///
    /// `swap_chain` must be the pointer received inside the hooked call.
    pub unsafe fn from_swap_chain(swap_chain: &IDXGISwapChain) -> Result<Self> {
        let device: ID3D11Device = swap_chain.GetDevice()?;
        let context = device.GetImmediateContext()?;
        let desc = swap_chain.GetDesc()?;

        let mut surface = RenderSurface {
            device,
            context,
            window: desc.OutputWindow,
            target: None,
            size: [
                desc.BufferDesc.Width as f32,
                desc.BufferDesc.Height as f32,
            ],
        };
        surface.rebuild_target(swap_chain)?;
        Ok(surface)
    }

    /// (Re)create our view of the current backbuffer.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::from_swap_chain`].
    pub unsafe fn rebuild_target(&mut self, swap_chain: &IDXGISwapChain) -> Result<()> {
        let backbuffer: ID3D11Texture2D = swap_chain.GetBuffer(0)?;
        let mut target = None;
        self.device
            .CreateRenderTargetView(&backbuffer, None, Some(&mut target))?;
        self.target = target;

        let desc = swap_chain.GetDesc()?;
        self.size = [
            desc.BufferDesc.Width as f32,
            desc.BufferDesc.Height as f32,
        ];
        Ok(())
    }

    /// Drop the backbuffer view so the game may resize freely.
    pub fn release_target(&mut self) {
        self.target = None;
    }
}
