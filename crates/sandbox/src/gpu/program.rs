use std::borrow::Cow;

use bytemuck::{Pod, Zeroable};
use wgpu::naga::ShaderStage as NagaStage;

use crate::backend::ProgramSource;
use crate::error::{CompileError, ShaderStage};
use crate::interface::Std140Layout;

use super::wrap::{wrap_program, WrappedProgram};

/// Offscreen targets and loaded textures all use this format.
pub(crate) const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct QuadVertex {
    position: [f32; 4],
    texcoord: [f32; 2],
    normal: [f32; 3],
    color: [f32; 4],
}

impl QuadVertex {
    const fn new(x: f32, y: f32) -> Self {
        Self {
            position: [x, y, 0.0, 1.0],
            texcoord: [(x + 1.0) * 0.5, (y + 1.0) * 0.5],
            normal: [0.0, 0.0, 1.0],
            color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

/// Two triangles covering clip space.
pub(crate) const QUAD: [QuadVertex; 6] = [
    QuadVertex::new(-1.0, -1.0),
    QuadVertex::new(1.0, -1.0),
    QuadVertex::new(1.0, 1.0),
    QuadVertex::new(-1.0, -1.0),
    QuadVertex::new(1.0, 1.0),
    QuadVertex::new(-1.0, 1.0),
];

const QUAD_ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
    0 => Float32x4,
    1 => Float32x2,
    2 => Float32x3,
    3 => Float32x4,
];

pub(crate) fn quad_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &QUAD_ATTRIBUTES,
    }
}

pub(crate) struct GpuProgram {
    pub label: String,
    pub pipeline: wgpu::RenderPipeline,
    pub uniform_buffer: wgpu::Buffer,
    pub uniform_group: wgpu::BindGroup,
    pub texture_layout: wgpu::BindGroupLayout,
    pub layout: Std140Layout,
    pub samplers: Vec<String>,
}

fn texture_layout_entries(count: usize) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::with_capacity(count * 2);
    for index in 0..count as u32 {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2 + 1,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    entries
}

fn create_module(
    device: &wgpu::Device,
    label: &str,
    source: String,
    stage: NagaStage,
) -> Result<wgpu::ShaderModule, String> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(source),
            stage,
            defines: &[],
        },
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(err.to_string()),
        None => Ok(module),
    }
}

impl GpuProgram {
    /// Wraps and compiles both stages, then links them into a pipeline.
    pub(crate) fn compile(
        device: &wgpu::Device,
        source: &ProgramSource,
    ) -> Result<Self, CompileError> {
        let WrappedProgram {
            vertex,
            fragment,
            samplers,
            layout,
            interface: _,
        } = wrap_program(source);
        tracing::trace!(label = %source.label, %vertex, %fragment, "wrapped program");

        let vertex_module = create_module(
            device,
            &format!("{} vertex", source.label),
            vertex,
            NagaStage::Vertex,
        )
        .map_err(|diag| CompileError::new(ShaderStage::Vertex, &source.label, diag))?;
        let fragment_module = create_module(
            device,
            &format!("{} fragment", source.label),
            fragment,
            NagaStage::Fragment,
        )
        .map_err(|diag| CompileError::new(ShaderStage::Fragment, &source.label, diag))?;

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture layout"),
            entries: &texture_layout_entries(samplers.len()),
        });
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} uniforms", source.label)),
            size: layout.size() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform bind group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("program pipeline layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&source.label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some("main"),
                buffers: &[quad_layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(CompileError::new(ShaderStage::Fragment, &source.label, err.to_string()));
        }

        Ok(Self {
            label: source.label.clone(),
            pipeline,
            uniform_buffer,
            uniform_group,
            texture_layout,
            layout,
            samplers,
        })
    }
}
