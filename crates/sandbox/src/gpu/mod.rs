//! wgpu implementation of [`GpuBackend`].

mod context;
mod present;
mod program;
mod target;
pub mod wrap;

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use wgpu::util::DeviceExt;

use crate::backend::{
    DrawCall, GpuBackend, Overlay, ProgramId, ProgramSource, TargetId, TextureId, TextureRef,
};
use crate::error::CompileError;
use crate::texture::ImageData;
use crate::types::Size;
use crate::uniforms::Binding;

use context::GpuContext;
use present::Presenter;
use program::{GpuProgram, QUAD};
use target::GpuImage;

pub struct WgpuBackend {
    ctx: GpuContext,
    programs: HashMap<ProgramId, GpuProgram>,
    targets: HashMap<TargetId, GpuImage>,
    textures: HashMap<TextureId, GpuImage>,
    next_id: u32,
    quad: wgpu::Buffer,
    sampler: wgpu::Sampler,
    placeholder: GpuImage,
    presenter: Option<Presenter>,
}

impl WgpuBackend {
    /// Offscreen backend; `present` becomes a no-op.
    pub fn headless() -> Result<Self> {
        Ok(Self::from_context(GpuContext::headless()?))
    }

    /// Backend presenting into `window`, which must outlive the backend.
    pub fn windowed<T>(window: &T, size: Size) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        Ok(Self::from_context(GpuContext::with_window(window, size)?))
    }

    fn from_context(ctx: GpuContext) -> Self {
        let device = &ctx.device;
        let quad = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad vertices"),
            contents: bytemuck::cast_slice(&QUAD),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("uniform sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let placeholder = GpuImage::upload(
            device,
            &ctx.queue,
            "placeholder texture",
            &ImageData::solid(Size::new(1, 1), [0, 0, 0, 0]),
        );
        let presenter = ctx
            .surface
            .as_ref()
            .map(|state| Presenter::new(device, state.config.format));
        Self {
            ctx,
            programs: HashMap::new(),
            targets: HashMap::new(),
            textures: HashMap::new(),
            next_id: 1,
            quad,
            sampler,
            placeholder,
            presenter,
        }
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_size(&self, size: Size) -> Result<()> {
        let max = self.ctx.max_dimension;
        if size.is_empty() || size.width > max || size.height > max {
            return Err(anyhow!("texture size {size} outside 1..={max}"));
        }
        Ok(())
    }

    fn view_for(&self, binding: Option<&Binding>, current: TargetId) -> &wgpu::TextureView {
        let image = match binding {
            Some(Binding::Texture(TextureRef::Texture(id))) => self.textures.get(id),
            Some(Binding::Texture(TextureRef::Target(id))) if *id != current => {
                self.targets.get(id)
            }
            _ => None,
        };
        &image.unwrap_or(&self.placeholder).view
    }
}

impl GpuBackend for WgpuBackend {
    fn compile_program(&mut self, source: &ProgramSource) -> Result<ProgramId, CompileError> {
        let program = GpuProgram::compile(&self.ctx.device, source)?;
        let id = ProgramId(self.allocate_id());
        tracing::debug!(label = %program.label, id = id.0, "compiled program");
        self.programs.insert(id, program);
        Ok(id)
    }

    fn release_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn create_target(&mut self, label: &str, size: Size) -> Result<TargetId> {
        self.check_size(size)?;
        let id = TargetId(self.allocate_id());
        self.targets
            .insert(id, GpuImage::render_target(&self.ctx.device, label, size));
        Ok(id)
    }

    fn release_target(&mut self, target: TargetId) {
        self.targets.remove(&target);
    }

    fn create_texture(&mut self, label: &str, image: &ImageData) -> Result<TextureId> {
        self.check_size(image.size)?;
        let id = TextureId(self.allocate_id());
        self.textures.insert(
            id,
            GpuImage::upload(&self.ctx.device, &self.ctx.queue, label, image),
        );
        Ok(id)
    }

    fn update_texture(&mut self, texture: TextureId, image: &ImageData) -> Result<()> {
        let Some(existing) = self.textures.get(&texture) else {
            return Err(anyhow!("unknown texture {}", texture.0));
        };
        if existing.size == image.size {
            existing.write(&self.ctx.queue, image);
            return Ok(());
        }
        self.check_size(image.size)?;
        let replacement = GpuImage::upload(&self.ctx.device, &self.ctx.queue, "texture", image);
        self.textures.insert(texture, replacement);
        Ok(())
    }

    fn release_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        let program = self
            .programs
            .get(&call.program)
            .ok_or_else(|| anyhow!("unknown program {}", call.program.0))?;
        let target = self
            .targets
            .get(&call.target)
            .ok_or_else(|| anyhow!("unknown target {}", call.target.0))?;

        let mut block = vec![0u8; program.layout.size()];
        for (name, binding) in &call.bindings {
            if !matches!(binding, Binding::Texture(_)) {
                program.layout.write(&mut block, name, binding);
            }
        }
        self.ctx
            .queue
            .write_buffer(&program.uniform_buffer, 0, &block);

        let mut entries = Vec::with_capacity(program.samplers.len() * 2);
        for (index, name) in program.samplers.iter().enumerate() {
            let view = self.view_for(call.bindings.get(name), call.target);
            entries.push(wgpu::BindGroupEntry {
                binding: index as u32 * 2,
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: index as u32 * 2 + 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            });
        }
        let texture_group = self
            .ctx
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("texture bind group"),
                layout: &program.texture_layout,
                entries: &entries,
            });

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&program.label),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&program.label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &program.uniform_group, &[]);
            pass.set_bind_group(1, &texture_group, &[]);
            pass.set_vertex_buffer(0, self.quad.slice(..));
            pass.draw(0..QUAD.len() as u32, 0..1);
        }
        self.ctx.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn read_pixels(&mut self, target: TargetId) -> Result<ImageData> {
        let image = self
            .targets
            .get(&target)
            .ok_or_else(|| anyhow!("unknown target {}", target.0))?;
        image.read(&self.ctx.device, &self.ctx.queue)
    }

    fn present(&mut self, target: TargetId, overlay: &Overlay) -> Result<()> {
        let (Some(presenter), Some(surface)) = (self.presenter.as_ref(), self.ctx.surface.as_ref())
        else {
            return Ok(());
        };
        let image = self
            .targets
            .get(&target)
            .ok_or_else(|| anyhow!("unknown target {}", target.0))?;
        presenter.present(
            &self.ctx.device,
            &self.ctx.queue,
            &surface.surface,
            &surface.config,
            &image.view,
            overlay,
        )
    }

    fn resize_surface(&mut self, size: Size) {
        self.ctx.resize(size);
    }
}
