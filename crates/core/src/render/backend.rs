//! imgui draw data to D3D11 draw calls
//!
//! A single-texture renderer: the font atlas is the only texture, so every
//! draw command binds the same shader resource. Vertex and index buffers
//! are dynamic and grow in chunks; the orthographic projection is rebuilt
//! from the draw data every frame.
//!
//! Pipeline state is set, not saved and restored; Unity rebinds its own
//! state at the start of each frame. The backbuffer binding is the one
//! piece of state the frame pump does preserve around us.

use std::ffi::c_void;

use imgui::internal::RawWrapper;
use imgui::{DrawCmd, DrawData, DrawIdx, DrawVert, TextureId};
use windows::core::{s, Error, Interface, Result, PCSTR};
use windows::Win32::Foundation::{E_FAIL, RECT};
use windows::Win32::Graphics::Direct3D::Fxc::D3DCompile;
use windows::Win32::Graphics::Direct3D::{ID3DBlob, D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST};
use windows::Win32::Graphics::Direct3D11::{
    ID3D11BlendState, ID3D11Buffer, ID3D11DepthStencilState, ID3D11Device, ID3D11DeviceContext,
    ID3D11InputLayout, ID3D11PixelShader, ID3D11RasterizerState, ID3D11SamplerState,
    ID3D11ShaderResourceView, ID3D11Texture2D, ID3D11VertexShader, D3D11_BIND_CONSTANT_BUFFER,
    D3D11_BIND_INDEX_BUFFER, D3D11_BIND_SHADER_RESOURCE, D3D11_BIND_VERTEX_BUFFER,
    D3D11_BLEND_DESC, D3D11_BLEND_INV_SRC_ALPHA, D3D11_BLEND_ONE, D3D11_BLEND_OP_ADD,
    D3D11_BLEND_SRC_ALPHA, D3D11_BUFFER_DESC, D3D11_COLOR_WRITE_ENABLE_ALL,
    D3D11_COMPARISON_ALWAYS, D3D11_CPU_ACCESS_WRITE, D3D11_CULL_NONE, D3D11_DEPTH_STENCIL_DESC,
    D3D11_FILL_SOLID, D3D11_FILTER_MIN_MAG_MIP_LINEAR, D3D11_INPUT_ELEMENT_DESC,
    D3D11_INPUT_PER_VERTEX_DATA, D3D11_MAPPED_SUBRESOURCE, D3D11_MAP_WRITE_DISCARD,
    D3D11_RASTERIZER_DESC, D3D11_SAMPLER_DESC, D3D11_SUBRESOURCE_DATA, D3D11_TEXTURE2D_DESC,
    D3D11_TEXTURE_ADDRESS_WRAP, D3D11_USAGE_DYNAMIC, D3D11_VIEWPORT,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT_R16_UINT, DXGI_FORMAT_R32G32_FLOAT, DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_SAMPLE_DESC,
};

const VERTEX_CHUNK: usize = 5000;
const INDEX_CHUNK: usize = 10000;

const SHADER_SRC: &str = r#"
cbuffer vertexBuffer : register(b0)
{
    float4x4 ProjectionMatrix;
};

struct VS_INPUT
{
    float2 pos : POSITION;
    float2 uv  : TEXCOORD0;
    float4 col : COLOR0;
};

struct PS_INPUT
{
    float4 pos : SV_POSITION;
    float4 col : COLOR0;
    float2 uv  : TEXCOORD0;
};

PS_INPUT vs_main(VS_INPUT input)
{
    PS_INPUT output;
    output.pos = mul(ProjectionMatrix, float4(input.pos.xy, 0.0f, 1.0f));
    output.col = input.col;
    output.uv = input.uv;
    return output;
}

sampler sampler0;
Texture2D texture0;

float4 ps_main(PS_INPUT input) : SV_Target
{
    return input.col * texture0.Sample(sampler0, input.uv);
}
"#;

/// Out-params documented to be set on success; treat a missing one as a
/// device failure.
fn required<T>(value: Option<T>, what: &str) -> Result<T> {
    value.ok_or_else(|| Error::new(E_FAIL, what))
}

fn compile_shader(entry: PCSTR, target: PCSTR) -> Result<ID3DBlob> {
    let mut blob: Option<ID3DBlob> = None;
    unsafe {
        D3DCompile(
            SHADER_SRC.as_ptr() as *const c_void,
            SHADER_SRC.len(),
            None,
            None,
            None,
            entry,
            target,
            0,
            0,
            &mut blob,
            None,
        )?;
    }
    required(blob, "shader blob")
}

fn blob_bytes(blob: &ID3DBlob) -> (*const c_void, usize) {
    unsafe { (blob.GetBufferPointer(), blob.GetBufferSize()) }
}

pub struct OverlayRenderer {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    vertex_shader: ID3D11VertexShader,
    pixel_shader: ID3D11PixelShader,
    input_layout: ID3D11InputLayout,
    constants: ID3D11Buffer,
    blend: ID3D11BlendState,
    rasterizer: ID3D11RasterizerState,
    depth: ID3D11DepthStencilState,
    sampler: ID3D11SamplerState,
    font_view: ID3D11ShaderResourceView,
    vertices: Option<ID3D11Buffer>,
    vertex_capacity: usize,
    indices: Option<ID3D11Buffer>,
    index_capacity: usize,
}

impl OverlayRenderer {
    pub fn new(
        device: &ID3D11Device,
        context: &ID3D11DeviceContext,
        imgui: &mut imgui::Context,
    ) -> Result<Self> {
        let vs_blob = compile_shader(s!("vs_main"), s!("vs_4_0"))?;
        let ps_blob = compile_shader(s!("ps_main"), s!("ps_4_0"))?;
        let (vs_ptr, vs_len) = blob_bytes(&vs_blob);
        let (ps_ptr, ps_len) = blob_bytes(&ps_blob);

        let mut vertex_shader = None;
        let mut pixel_shader = None;
        unsafe {
            device.CreateVertexShader(
                std::slice::from_raw_parts(vs_ptr as *const u8, vs_len),
                None,
                Some(&mut vertex_shader),
            )?;
            device.CreatePixelShader(
                std::slice::from_raw_parts(ps_ptr as *const u8, ps_len),
                None,
                Some(&mut pixel_shader),
            )?;
        }

        let layout_desc = [
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: s!("POSITION"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 0,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: s!("TEXCOORD"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 8,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: s!("COLOR"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R8G8B8A8_UNORM,
                InputSlot: 0,
                AlignedByteOffset: 16,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
        ];
        let mut input_layout = None;
        unsafe {
            device.CreateInputLayout(
                &layout_desc,
                std::slice::from_raw_parts(vs_ptr as *const u8, vs_len),
                Some(&mut input_layout),
            )?;
        }

        let constants_desc = D3D11_BUFFER_DESC {
            ByteWidth: 64,
            Usage: D3D11_USAGE_DYNAMIC,
            BindFlags: D3D11_BIND_CONSTANT_BUFFER.0 as u32,
            CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
            ..Default::default()
        };
        let mut constants = None;
        unsafe { device.CreateBuffer(&constants_desc, None, Some(&mut constants))? };

        let mut blend_desc = D3D11_BLEND_DESC::default();
        blend_desc.RenderTarget[0].BlendEnable = true.into();
        blend_desc.RenderTarget[0].SrcBlend = D3D11_BLEND_SRC_ALPHA;
        blend_desc.RenderTarget[0].DestBlend = D3D11_BLEND_INV_SRC_ALPHA;
        blend_desc.RenderTarget[0].BlendOp = D3D11_BLEND_OP_ADD;
        blend_desc.RenderTarget[0].SrcBlendAlpha = D3D11_BLEND_ONE;
        blend_desc.RenderTarget[0].DestBlendAlpha = D3D11_BLEND_INV_SRC_ALPHA;
        blend_desc.RenderTarget[0].BlendOpAlpha = D3D11_BLEND_OP_ADD;
        blend_desc.RenderTarget[0].RenderTargetWriteMask = D3D11_COLOR_WRITE_ENABLE_ALL.0 as u8;
        let mut blend = None;
        unsafe { device.CreateBlendState(&blend_desc, Some(&mut blend))? };

        let rasterizer_desc = D3D11_RASTERIZER_DESC {
            FillMode: D3D11_FILL_SOLID,
            CullMode: D3D11_CULL_NONE,
            ScissorEnable: true.into(),
            DepthClipEnable: true.into(),
            ..Default::default()
        };
        let mut rasterizer = None;
        unsafe { device.CreateRasterizerState(&rasterizer_desc, Some(&mut rasterizer))? };

        let depth_desc = D3D11_DEPTH_STENCIL_DESC {
            DepthEnable: false.into(),
            StencilEnable: false.into(),
            ..Default::default()
        };
        let mut depth = None;
        unsafe { device.CreateDepthStencilState(&depth_desc, Some(&mut depth))? };

        let sampler_desc = D3D11_SAMPLER_DESC {
            Filter: D3D11_FILTER_MIN_MAG_MIP_LINEAR,
            AddressU: D3D11_TEXTURE_ADDRESS_WRAP,
            AddressV: D3D11_TEXTURE_ADDRESS_WRAP,
            AddressW: D3D11_TEXTURE_ADDRESS_WRAP,
            ComparisonFunc: D3D11_COMPARISON_ALWAYS,
            ..Default::default()
        };
        let mut sampler = None;
        unsafe { device.CreateSamplerState(&sampler_desc, Some(&mut sampler))? };

        let font_view = build_font_atlas(device, imgui)?;

        Ok(OverlayRenderer {
            device: device.clone(),
            context: context.clone(),
            vertex_shader: required(vertex_shader, "vertex shader")?,
            pixel_shader: required(pixel_shader, "pixel shader")?,
            input_layout: required(input_layout, "input layout")?,
            constants: required(constants, "constant buffer")?,
            blend: required(blend, "blend state")?,
            rasterizer: required(rasterizer, "rasterizer state")?,
            depth: required(depth, "depth state")?,
            sampler: required(sampler, "sampler")?,
            font_view,
            vertices: None,
            vertex_capacity: 0,
            indices: None,
            index_capacity: 0,
        })
    }

    fn ensure_buffers(&mut self, vertex_count: usize, index_count: usize) -> Result<()> {
        if vertex_count > self.vertex_capacity {
            self.vertex_capacity = vertex_count + VERTEX_CHUNK;
            let desc = D3D11_BUFFER_DESC {
                ByteWidth: (self.vertex_capacity * std::mem::size_of::<DrawVert>()) as u32,
                Usage: D3D11_USAGE_DYNAMIC,
                BindFlags: D3D11_BIND_VERTEX_BUFFER.0 as u32,
                CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
                ..Default::default()
            };
            let mut buffer = None;
            unsafe { self.device.CreateBuffer(&desc, None, Some(&mut buffer))? };
            self.vertices = buffer;
        }
        if index_count > self.index_capacity {
            self.index_capacity = index_count + INDEX_CHUNK;
            let desc = D3D11_BUFFER_DESC {
                ByteWidth: (self.index_capacity * std::mem::size_of::<DrawIdx>()) as u32,
                Usage: D3D11_USAGE_DYNAMIC,
                BindFlags: D3D11_BIND_INDEX_BUFFER.0 as u32,
                CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
                ..Default::default()
            };
            let mut buffer = None;
            unsafe { self.device.CreateBuffer(&desc, None, Some(&mut buffer))? };
            self.indices = buffer;
        }
        Ok(())
    }

    fn upload(&mut self, draw_data: &DrawData) -> Result<()> {
        let (Some(vertices), Some(indices)) = (self.vertices.clone(), self.indices.clone())
        else {
            return Ok(());
        };
        unsafe {
            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            self.context
                .Map(&vertices, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped))?;
            let mut vtx_dst = mapped.pData as *mut DrawVert;
            for list in draw_data.draw_lists() {
                let vtx = list.vtx_buffer();
                std::ptr::copy_nonoverlapping(vtx.as_ptr(), vtx_dst, vtx.len());
                vtx_dst = vtx_dst.add(vtx.len());
            }
            self.context.Unmap(&vertices, 0);

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            self.context
                .Map(&indices, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped))?;
            let mut idx_dst = mapped.pData as *mut DrawIdx;
            for list in draw_data.draw_lists() {
                let idx = list.idx_buffer();
                std::ptr::copy_nonoverlapping(idx.as_ptr(), idx_dst, idx.len());
                idx_dst = idx_dst.add(idx.len());
            }
            self.context.Unmap(&indices, 0);

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            self.context
                .Map(&self.constants, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped))?;
            let projection = ortho_projection(draw_data);
            std::ptr::copy_nonoverlapping(
                projection.as_ptr(),
                mapped.pData as *mut f32,
                projection.len(),
            );
            self.context.Unmap(&self.constants, 0);
        }
        Ok(())
    }

    fn bind_pipeline(&self, draw_data: &DrawData) {
        let viewport = D3D11_VIEWPORT {
            TopLeftX: 0.0,
            TopLeftY: 0.0,
            Width: draw_data.display_size[0],
            Height: draw_data.display_size[1],
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };
        let stride = std::mem::size_of::<DrawVert>() as u32;
        let offset = 0u32;
        let vertices = self.vertices.clone();
        unsafe {
            self.context.RSSetViewports(Some(&[viewport]));
            self.context.IASetInputLayout(&self.input_layout);
            self.context.IASetVertexBuffers(
                0,
                1,
                Some(&vertices),
                Some(&stride),
                Some(&offset),
            );
            self.context
                .IASetIndexBuffer(self.indices.as_ref(), DXGI_FORMAT_R16_UINT, 0);
            self.context
                .IASetPrimitiveTopology(D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            self.context.VSSetShader(&self.vertex_shader, None);
            self.context
                .VSSetConstantBuffers(0, Some(&[Some(self.constants.clone())]));
            self.context.PSSetShader(&self.pixel_shader, None);
            self.context
                .PSSetSamplers(0, Some(&[Some(self.sampler.clone())]));
            self.context
                .PSSetShaderResources(0, Some(&[Some(self.font_view.clone())]));
            self.context
                .OMSetBlendState(&self.blend, Some(&[0.0, 0.0, 0.0, 0.0]), 0xFFFF_FFFF);
            self.context.OMSetDepthStencilState(&self.depth, 0);
            self.context.RSSetState(&self.rasterizer);
        }
    }

    /// Draw one frame of imgui output into the currently bound target.
    pub fn render(&mut self, draw_data: &DrawData) -> Result<()> {
        if draw_data.display_size[0] <= 0.0 || draw_data.display_size[1] <= 0.0 {
            return Ok(());
        }
        let vertex_count = draw_data.total_vtx_count as usize;
        let index_count = draw_data.total_idx_count as usize;
        if vertex_count == 0 || index_count == 0 {
            return Ok(());
        }

        self.ensure_buffers(vertex_count, index_count)?;
        self.upload(draw_data)?;
        self.bind_pipeline(draw_data);

        let origin = draw_data.display_pos;
        let mut vtx_base = 0i32;
        let mut idx_base = 0u32;
        for list in draw_data.draw_lists() {
            for cmd in list.commands() {
                match cmd {
                    DrawCmd::Elements { count, cmd_params } => {
                        let clip = cmd_params.clip_rect;
                        let rect = RECT {
                            left: (clip[0] - origin[0]) as i32,
                            top: (clip[1] - origin[1]) as i32,
                            right: (clip[2] - origin[0]) as i32,
                            bottom: (clip[3] - origin[1]) as i32,
                        };
                        if rect.right <= rect.left || rect.bottom <= rect.top {
                            continue;
                        }
                        unsafe {
                            self.context.RSSetScissorRects(Some(&[rect]));
                            self.context.DrawIndexed(
                                count as u32,
                                idx_base + cmd_params.idx_offset as u32,
                                vtx_base + cmd_params.vtx_offset as i32,
                            );
                        }
                    }
                    DrawCmd::ResetRenderState => self.bind_pipeline(draw_data),
                    DrawCmd::RawCallback { callback, raw_cmd } => unsafe {
                        callback(list.raw(), raw_cmd)
                    },
                }
            }
            vtx_base += list.vtx_buffer().len() as i32;
            idx_base += list.idx_buffer().len() as u32;
        }
        Ok(())
    }
}

fn ortho_projection(draw_data: &DrawData) -> [f32; 16] {
    let left = draw_data.display_pos[0];
    let right = left + draw_data.display_size[0];
    let top = draw_data.display_pos[1];
    let bottom = top + draw_data.display_size[1];
    [
        2.0 / (right - left), 0.0, 0.0, 0.0,
        0.0, 2.0 / (top - bottom), 0.0, 0.0,
        0.0, 0.0, 0.5, 0.0,
        (right + left) / (left - right), (top + bottom) / (bottom - top), 0.5, 1.0,
    ]
}

fn build_font_atlas(
    device: &ID3D11Device,
    imgui: &mut imgui::Context,
) -> Result<ID3D11ShaderResourceView> {
    let mut fonts = imgui.fonts();
    let atlas = fonts.build_rgba32_texture();

    let desc = D3D11_TEXTURE2D_DESC {
        Width: atlas.width,
        Height: atlas.height,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT_R8G8B8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        BindFlags: D3D11_BIND_SHADER_RESOURCE.0 as u32,
        ..Default::default()
    };
    let initial = D3D11_SUBRESOURCE_DATA {
        pSysMem: atlas.data.as_ptr() as *const c_void,
        SysMemPitch: atlas.width * 4,
        SysMemSlicePitch: 0,
    };
    let mut texture: Option<ID3D11Texture2D> = None;
    unsafe { device.CreateTexture2D(&desc, Some(&initial), Some(&mut texture))? };
    let texture = required(texture, "font texture")?;

    // No view desc: view the whole single-mip resource.
    let mut view = None;
    unsafe { device.CreateShaderResourceView(&texture, None, Some(&mut view))? };
    let view: ID3D11ShaderResourceView = required(view, "font view")?;

    fonts.tex_id = TextureId::from(view.as_raw() as usize);
    Ok(view)
}
