use std::sync::OnceLock;

use bytemuck::{Pod, Zeroable};
use log::{debug, info};
use pollster::block_on;
use wgpu::util::DeviceExt;

use crate::frame::{Frame, SceneFrames};
use crate::model::{Derived, GROUP_DIM};
use crate::RenderError;

const SUBSURFACE_SHADER: &str = include_str!("shaders/subsurface.wgsl");

static GPU_CONTEXT: OnceLock<GpuContext> = OnceLock::new();

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Uniforms {
    width: u32,
    height: u32,
    max_samples: u32,
    _pad0: u32,
    proj_scale: [f32; 2],
    depth_to_mm: f32,
    _pad1: f32,
}

pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

pub fn context() -> Result<&'static GpuContext, RenderError> {
    if let Some(ctx) = GPU_CONTEXT.get() {
        return Ok(ctx);
    }
    let ctx = init()?;
    Ok(GPU_CONTEXT.get_or_init(|| ctx))
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn init() -> Result<GpuContext, RenderError> {
    let instance = wgpu::Instance::default();
    let adapter = block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .ok_or_else(|| RenderError::Gpu("no compatible GPU adapter found".into()))?;
    info!("using GPU adapter {}", adapter.get_info().name);

    let (device, queue) = block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("sss-device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
        },
        None,
    ))
    .map_err(|err| RenderError::Gpu(format!("request_device failed: {err}")))?;

    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("subsurface shader"),
        source: wgpu::ShaderSource::Wgsl(SUBSURFACE_SHADER.into()),
    });

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("subsurface-bind-group-layout"),
        entries: &[
            storage_entry(0, true),
            storage_entry(1, true),
            storage_entry(2, true),
            wgpu::BindGroupLayoutEntry {
                binding: 3,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            storage_entry(4, false),
        ],
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("subsurface-pipeline-layout"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("subsurface-pipeline"),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: "main",
    });

    Ok(GpuContext {
        device,
        queue,
        bind_group_layout,
        pipeline,
    })
}

pub fn render_gpu(
    ctx: &GpuContext,
    frames: &SceneFrames,
    d: &Derived,
) -> Result<Frame<[f32; 4]>, RenderError> {
    let pixel_count = d.width * d.height;
    let out_bytes = (pixel_count * std::mem::size_of::<[f32; 4]>()) as u64;
    let limit = ctx.device.limits().max_storage_buffer_binding_size as u64;
    if out_bytes > limit {
        return Err(RenderError::Gpu(format!(
            "{}x{} image needs {out_bytes} bytes per buffer, device allows {limit}",
            d.width, d.height
        )));
    }

    let diffuse = frames.diffuse.to_vec();
    let depth = frames.depth.to_vec();
    let scatter: Vec<[f32; 4]> = frames
        .scatter
        .pixels()
        .map(|s| [s[0], s[1], s[2], 0.0])
        .collect();
    let uniforms = build_uniforms(d);

    let diffuse_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("diffuse-buffer"),
            contents: bytemuck::cast_slice(&diffuse),
            usage: wgpu::BufferUsages::STORAGE,
        });

    let depth_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("depth-buffer"),
            contents: bytemuck::cast_slice(&depth),
            usage: wgpu::BufferUsages::STORAGE,
        });

    let scatter_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("scatter-buffer"),
            contents: bytemuck::cast_slice(&scatter),
            usage: wgpu::BufferUsages::STORAGE,
        });

    let uniforms_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("uniforms-buffer"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });

    let out_buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("subsurface-output-buffer"),
        size: out_bytes,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });

    let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("subsurface-bind-group"),
        layout: &ctx.bind_group_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: diffuse_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: depth_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: scatter_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: uniforms_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: out_buffer.as_entire_binding(),
            },
        ],
    });

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("subsurface-encoder"),
        });

    {
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("subsurface-pass"),
            timestamp_writes: None,
        });
        cpass.set_pipeline(&ctx.pipeline);
        cpass.set_bind_group(0, &bind_group, &[]);
        let wg_x = div_round_up(d.width, GROUP_DIM as u32);
        let wg_y = div_round_up(d.height, GROUP_DIM as u32);
        debug!("gpu dispatch {wg_x}x{wg_y} work-groups");
        cpass.dispatch_workgroups(wg_x, wg_y, 1);
    }

    let staging_buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("subsurface-staging"),
        size: out_bytes,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    encoder.copy_buffer_to_buffer(&out_buffer, 0, &staging_buffer, 0, out_bytes);
    ctx.queue.submit(std::iter::once(encoder.finish()));

    let buffer_slice = staging_buffer.slice(..);
    let (sender, receiver) = std::sync::mpsc::channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |res| {
        sender.send(res).ok();
    });
    ctx.device.poll(wgpu::Maintain::Wait);
    receiver
        .recv()
        .map_err(|_| RenderError::Gpu("map_async callback was dropped".into()))?
        .map_err(|_| RenderError::Gpu("map_async failed for subsurface output".into()))?;
    let data = buffer_slice.get_mapped_range();
    let pixels: Vec<[f32; 4]> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging_buffer.unmap();

    Frame::from_vec(d.width, d.height, pixels)
        .ok_or_else(|| RenderError::Gpu("readback size does not match the image".into()))
}

fn build_uniforms(derived: &Derived) -> Uniforms {
    Uniforms {
        width: derived.width as u32,
        height: derived.height as u32,
        max_samples: derived.max_samples,
        _pad0: 0,
        proj_scale: derived.proj_scale,
        depth_to_mm: derived.depth_to_mm,
        _pad1: 0.0,
    }
}

fn div_round_up(a: usize, b: u32) -> u32 {
    (a as u32).div_ceil(b)
}
