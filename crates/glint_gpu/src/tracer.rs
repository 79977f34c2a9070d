//! Progressive rendering of a scene's synthesized program.

use glint_core::{Texture, VoxelGrid};
use glint_tracer::{synthesize, GpuBuffer, ImageBuffer, Progressive, RenderConfig, Scene, ShaderProgram};
use wgpu::util::DeviceExt;

use crate::context::GpuContext;
use crate::error::{GpuError, GpuResult};

const ACCUMULATION_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
const ACCUMULATION_TEXEL: u32 = 16;

/// Rows of a texture copy are padded to this many bytes.
fn padded_row_bytes(width: u32) -> u32 {
    let unpadded = width * ACCUMULATION_TEXEL;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Strip copy padding, returning tightly packed RGBA floats.
fn unpad_rows(data: &[u8], width: u32, height: u32) -> Vec<f32> {
    let padded = padded_row_bytes(width) as usize;
    let row = (width * ACCUMULATION_TEXEL) as usize;
    let mut out = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height as usize {
        let start = y * padded;
        out.extend(
            data[start..start + row]
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        );
    }
    out
}

/// RGBA8 data resized to exactly `width * height` texels.
fn texel_data(bytes: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut data = bytes.to_vec();
    data.resize((width * height * 4) as usize, 0);
    data
}

struct Accumulation {
    textures: [wgpu::Texture; 2],
    views: [wgpu::TextureView; 2],
}

impl Accumulation {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let make = |label: &str| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: ACCUMULATION_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            })
        };
        let textures = [make("Accumulation 0"), make("Accumulation 1")];
        let views = [
            textures[0].create_view(&wgpu::TextureViewDescriptor::default()),
            textures[1].create_view(&wgpu::TextureViewDescriptor::default()),
        ];
        Self { textures, views }
    }
}

/// A compiled program with its uploaded resources.
struct Compiled {
    program: ShaderProgram,
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    /// Group 0 reading accumulation texture `i`
    frame_groups: [wgpu::BindGroup; 2],
    buffer_group: wgpu::BindGroup,
    image_group: wgpu::BindGroup,
    // Kept alive for the bind groups
    _textures: Vec<wgpu::Texture>,
}

pub struct GpuTracer {
    context: GpuContext,
    width: u32,
    height: u32,
    progressive: Progressive,
    accumulation: Accumulation,
    buffer_sampler: wgpu::Sampler,
    image_sampler: wgpu::Sampler,
    compiled: Option<Compiled>,
}

fn texture_entry(binding: u32, filterable: bool, dimension: wgpu::TextureViewDimension) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable },
            view_dimension: dimension,
            multisampled: false,
        },
        count: None,
    }
}

impl GpuTracer {
    pub fn new(context: GpuContext, config: &RenderConfig) -> Self {
        let device = &context.device;
        let accumulation = Accumulation::new(device, config.width, config.height);
        let buffer_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Buffer Sampler"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let image_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Image Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        Self {
            context,
            width: config.width,
            height: config.height,
            progressive: Progressive::new(config.seed),
            accumulation,
            buffer_sampler,
            image_sampler,
            compiled: None,
        }
    }

    pub fn progressive(&self) -> &Progressive {
        &self.progressive
    }

    pub fn reset(&mut self) {
        self.progressive.reset();
    }

    /// The program currently bound, if any.
    pub fn program(&self) -> Option<&ShaderProgram> {
        self.compiled.as_ref().map(|c| &c.program)
    }

    fn upload_rgba8(&self, label: &str, width: u32, height: u32, bytes: &[u8]) -> wgpu::Texture {
        self.context.device.create_texture_with_data(
            &self.context.queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: width.max(1),
                    height: height.max(1),
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &texel_data(bytes, width.max(1), height.max(1)),
        )
    }

    fn upload_buffer(&self, buffer: &GpuBuffer) -> wgpu::Texture {
        let layout = buffer.layout();
        self.upload_rgba8(buffer.label(), layout.width, layout.height, buffer.bytes())
    }

    fn upload_image(&self, id: u32, texture: &Texture) -> wgpu::Texture {
        self.upload_rgba8(&format!("Image {id}"), texture.width, texture.height, texture.bytes())
    }

    fn upload_voxels(&self, object: u32, grid: &VoxelGrid) -> wgpu::Texture {
        let texels = grid.encode();
        self.context.device.create_texture_with_data(
            &self.context.queue,
            &wgpu::TextureDescriptor {
                label: Some(&format!("Voxels {object}")),
                size: wgpu::Extent3d {
                    width: grid.dims.x,
                    height: grid.dims.y,
                    depth_or_array_layers: grid.dims.z,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D3,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            bytemuck::cast_slice(&texels),
        )
    }

    /// Synthesize, upload and compile the scene's program.
    pub fn compile(&mut self, scene: &mut Scene) -> GpuResult<()> {
        let program = synthesize(scene);
        self.compiled = None;

        let mut textures = Vec::new();
        let buffers = scene.buffers();
        let mut buffer_views = Vec::new();
        for binding in &program.buffers {
            if let Some(buffer) = buffers.iter().find(|b| b.id() == binding.id) {
                let texture = self.upload_buffer(buffer);
                buffer_views.push(texture.create_view(&wgpu::TextureViewDescriptor::default()));
                textures.push(texture);
            }
        }
        let mut image_views = Vec::new();
        for binding in &program.images {
            let texture = match scene.images().get(&binding.id) {
                Some(image) => self.upload_image(binding.id, image),
                None => {
                    log::warn!("Image {} is not registered, binding a placeholder", binding.id);
                    self.upload_image(binding.id, &Texture::placeholder())
                }
            };
            image_views.push(texture.create_view(&wgpu::TextureViewDescriptor::default()));
            textures.push(texture);
        }
        for (object, grid) in scene.voxel_grids() {
            let texture = self.upload_voxels(object, grid);
            image_views.push(texture.create_view(&wgpu::TextureViewDescriptor {
                dimension: Some(wgpu::TextureViewDimension::D3),
                ..Default::default()
            }));
            textures.push(texture);
        }

        let device = &self.context.device;
        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Frame Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1, false, wgpu::TextureViewDimension::D2),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let buffer_entries: Vec<_> = program
            .buffers
            .iter()
            .map(|b| texture_entry(b.slot, true, wgpu::TextureViewDimension::D2))
            .collect();
        let buffer_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Buffer Layout"),
            entries: &buffer_entries,
        });
        let image_entries: Vec<_> = program
            .images
            .iter()
            .map(|i| texture_entry(i.slot, true, wgpu::TextureViewDimension::D2))
            .chain(
                program
                    .voxels
                    .iter()
                    .map(|v| texture_entry(v.slot, true, wgpu::TextureViewDimension::D3)),
            )
            .collect();
        let image_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Image Layout"),
            entries: &image_entries,
        });

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Uniforms"),
            contents: &vec![0u8; program.layout.size().max(16)],
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let frame_group = |i: usize| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Frame Group"),
                layout: &frame_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniform_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&self.accumulation.views[i]),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&self.buffer_sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::Sampler(&self.image_sampler),
                    },
                ],
            })
        };
        let frame_groups = [frame_group(0), frame_group(1)];
        let buffer_group_entries: Vec<_> = program
            .buffers
            .iter()
            .zip(&buffer_views)
            .map(|(b, view)| wgpu::BindGroupEntry {
                binding: b.slot,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .collect();
        let buffer_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Buffer Group"),
            layout: &buffer_layout,
            entries: &buffer_group_entries,
        });
        let slots = program.images.iter().map(|i| i.slot).chain(program.voxels.iter().map(|v| v.slot));
        let image_group_entries: Vec<_> = slots
            .zip(&image_views)
            .map(|(slot, view)| wgpu::BindGroupEntry {
                binding: slot,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .collect();
        let image_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Image Group"),
            layout: &image_layout,
            entries: &image_group_entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Tracer Pipeline Layout"),
            bind_group_layouts: &[&frame_layout, &buffer_layout, &image_layout],
            push_constant_ranges: &[],
        });

        let started = std::time::Instant::now();
        let source = program.source.clone();
        let pipeline = self.context.validated(|device| {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Tracer Program"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Tracer Pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: "vs_main",
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format: ACCUMULATION_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        })?;
        log::info!(
            "Compiled program ({} bytes) in {:.1} ms",
            program.source.len(),
            started.elapsed().as_secs_f64() * 1000.0
        );

        self.compiled = Some(Compiled {
            program,
            pipeline,
            uniform_buffer,
            frame_groups,
            buffer_group,
            image_group,
            _textures: textures,
        });
        self.progressive.reset();
        Ok(())
    }

    /// Render one progressive sample, recompiling when the scene's
    /// structure changed.
    pub fn render_frame(&mut self, scene: &mut Scene) -> GpuResult<()> {
        scene.prepare();
        let stale = self
            .compiled
            .as_ref()
            .map_or(true, |c| c.program.structure != scene.structure());
        if stale {
            self.compile(scene)?;
        }
        self.progressive.sync(scene);

        let compiled = self
            .compiled
            .as_ref()
            .ok_or_else(|| GpuError::ShaderBuild {
                diagnostic: "no program compiled".into(),
            })?;
        let frame = self.progressive.frame_uniforms(&scene.camera);
        let bytes = scene.write_uniforms(&compiled.program.layout, &frame)?;
        self.context.queue.write_buffer(&compiled.uniform_buffer, 0, &bytes);

        let (front, back) = (self.progressive.front(), self.progressive.back());
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Tracer Frame"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Tracer Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.accumulation.views[back],
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&compiled.pipeline);
            pass.set_bind_group(0, &compiled.frame_groups[front], &[]);
            pass.set_bind_group(1, &compiled.buffer_group, &[]);
            pass.set_bind_group(2, &compiled.image_group, &[]);
            pass.draw(0..6, 0..1);
        }
        self.context.queue.submit(Some(encoder.finish()));
        self.progressive.finish_frame();
        Ok(())
    }

    pub fn render(&mut self, scene: &mut Scene, frames: u32) -> GpuResult<ImageBuffer> {
        for _ in 0..frames {
            self.render_frame(scene)?;
        }
        self.read_image()
    }

    /// Copy the current accumulation back to the host.
    pub fn read_image(&self) -> GpuResult<ImageBuffer> {
        let device = &self.context.device;
        let row_bytes = padded_row_bytes(self.width);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback"),
            size: (row_bytes * self.height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Copy"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.accumulation.textures[self.progressive.front()],
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(row_bytes),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.context.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| GpuError::Readback(e.to_string()))?
            .map_err(|e| GpuError::Readback(e.to_string()))?;

        let pixels = {
            let data = slice.get_mapped_range();
            unpad_rows(&data, self.width, self.height)
        };
        readback.unmap();
        Ok(ImageBuffer::from_rgba_f32(self.width, self.height, &pixels)?)
    }
}
