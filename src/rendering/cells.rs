//! Cell rendering with wgpu.
//!
//! Cells are instanced lit spheres. Each instance carries a centre and an
//! index into the active shade table; fragments go into the OIT lists
//! rather than the framebuffer.

use super::instances::InstanceBufferManager;
use super::oit::{collect_target, with_oit_common, OitCompositor};
use super::shades::ShadeTables;
use super::{validated, RenderError};
use crate::data::DisplayCategory;
use glam::{Mat4, Vec3, Vec4};
use wgpu::util::DeviceExt;

/// Viewports drawn per frame at most (stereo pairs).
pub const MAX_VIEWPORTS: usize = 2;

const SPHERE_STACKS: u32 = 10;
const SPHERE_SLICES: u32 = 16;

/// Per-viewport transform and lighting, bound at group 0 by every pass-1 pipeline.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ViewUniform {
    pub mvp: [[f32; 4]; 4],
    pub model_view: [[f32; 4]; 4],
    pub light_position: [f32; 4],
    pub ambient: f32,
    pub diffuse: f32,
    pub _padding: [f32; 2],
}

impl ViewUniform {
    pub fn new(projection: Mat4, model_view: Mat4, light: Vec3, ambient: f32, diffuse: f32) -> Self {
        Self {
            mvp: (projection * model_view).to_cols_array_2d(),
            model_view: model_view.to_cols_array_2d(),
            light_position: light.extend(1.0).to_array(),
            ambient,
            diffuse,
            _padding: [0.0; 2],
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct CellParams {
    radius: f32,
    alpha: f32,
    lit: u32,
    _padding: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct SphereVertex {
    position: [f32; 3],
    normal: [f32; 3],
}

/// Unit UV sphere as (vertices, triangle indices).
fn unit_sphere(stacks: u32, slices: u32) -> (Vec<SphereVertex>, Vec<u16>) {
    let mut vertices = Vec::with_capacity(((stacks + 1) * (slices + 1)) as usize);
    for stack in 0..=stacks {
        let phi = std::f32::consts::PI * stack as f32 / stacks as f32;
        for slice in 0..=slices {
            let theta = std::f32::consts::TAU * slice as f32 / slices as f32;
            let p = [phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin()];
            vertices.push(SphereVertex {
                position: p,
                normal: p,
            });
        }
    }

    let mut indices = Vec::with_capacity((stacks * slices * 6) as usize);
    let row = slices + 1;
    for stack in 0..stacks {
        for slice in 0..slices {
            let a = (stack * row + slice) as u16;
            let b = ((stack + 1) * row + slice) as u16;
            indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
        }
    }
    (vertices, indices)
}

/// View uniforms and bind groups for each viewport.
pub struct ViewBindings {
    layout: wgpu::BindGroupLayout,
    buffers: Vec<wgpu::Buffer>,
    bind_groups: Vec<wgpu::BindGroup>,
}

impl ViewBindings {
    pub fn new(device: &wgpu::Device) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("View Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let buffers: Vec<wgpu::Buffer> = (0..MAX_VIEWPORTS)
            .map(|i| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("View Uniform Buffer {}", i)),
                    size: std::mem::size_of::<ViewUniform>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();

        let bind_groups = buffers
            .iter()
            .enumerate()
            .map(|(i, buffer)| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("View Bind Group {}", i)),
                    layout: &layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffer.as_entire_binding(),
                    }],
                })
            })
            .collect();

        Self {
            layout,
            buffers,
            bind_groups,
        }
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub fn write(&self, queue: &wgpu::Queue, viewport: usize, uniform: &ViewUniform) {
        if let Some(buffer) = self.buffers.get(viewport) {
            queue.write_buffer(buffer, 0, bytemuck::bytes_of(uniform));
        }
    }

    pub fn bind_group(&self, viewport: usize) -> &wgpu::BindGroup {
        &self.bind_groups[viewport.min(MAX_VIEWPORTS - 1)]
    }
}

/// Cell appearance controls applied to every instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellStyle {
    /// Sphere radius in atlas units.
    pub radius: f32,
    /// Cell opacity in [0, 1].
    pub alpha: f32,
    pub lit: bool,
    /// Use the shared monochrome ramp instead of per-cluster colours.
    pub single_twinkle: bool,
}

impl Default for CellStyle {
    fn default() -> Self {
        Self {
            radius: 0.2,
            alpha: 1.0,
            lit: true,
            single_twinkle: false,
        }
    }
}

struct ShadeBindings {
    buffers: Vec<wgpu::Buffer>,
    cluster: wgpu::BindGroup,
    mono: wgpu::BindGroup,
    delta: Option<wgpu::BindGroup>,
}

/// Renderer for cell instances through OIT pass 1.
pub struct CellRenderer {
    pipeline: wgpu::RenderPipeline,
    shade_bind_group_layout: wgpu::BindGroupLayout,
    shades: Option<ShadeBindings>,
    params_buffer: wgpu::Buffer,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    style: CellStyle,
}

impl CellRenderer {
    pub fn new(
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
        views: &ViewBindings,
        oit: &OitCompositor,
    ) -> Result<Self, RenderError> {
        let (vertices, indices) = unit_sphere(SPHERE_STACKS, SPHERE_SLICES);

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Cell Sphere Vertex Buffer"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Cell Sphere Index Buffer"),
            contents: bytemuck::cast_slice(&indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Cell Params Buffer"),
            size: std::mem::size_of::<CellParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let shade_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Cell Shade Bind Group Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: true },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<SphereVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3, // position
                },
                wgpu::VertexAttribute {
                    offset: 12,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3, // normal
                },
            ],
        };

        let center_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: 2,
                format: wgpu::VertexFormat::Float32x3,
            }],
        };

        let color_index_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<u32>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: 3,
                format: wgpu::VertexFormat::Uint32,
            }],
        };

        let pipeline = validated(device, "cell pipeline", || {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Cell OIT Shader"),
                source: wgpu::ShaderSource::Wgsl(
                    with_oit_common(include_str!("../../shaders/cells_oit.wgsl")).into(),
                ),
            });

            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Cell Pipeline Layout"),
                bind_group_layouts: &[
                    views.layout(),
                    oit.write_bind_group_layout(),
                    &shade_bind_group_layout,
                ],
                push_constant_ranges: &[],
            });

            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Cell OIT Pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    buffers: &[vertex_layout, center_layout, color_index_layout],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(collect_target(surface_format))],
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

        Ok(Self {
            pipeline,
            shade_bind_group_layout,
            shades: None,
            params_buffer,
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            style: CellStyle::default(),
        })
    }

    fn shade_bind_group(
        &self,
        device: &wgpu::Device,
        label: &str,
        table: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.shade_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: table.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.params_buffer.as_entire_binding(),
                },
            ],
        })
    }

    /// Upload new colour tables, releasing the previous ones.
    pub fn set_tables(&mut self, device: &wgpu::Device, tables: &ShadeTables) {
        self.release_tables();

        let upload = |label: &str, colors: &[Vec4]| {
            // Storage bindings cannot be empty.
            let fallback = [Vec4::new(0.0, 0.0, 0.0, 1.0)];
            let colors = if colors.is_empty() { &fallback[..] } else { colors };
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(colors),
                usage: wgpu::BufferUsages::STORAGE,
            })
        };

        let cluster_buffer = upload("Cluster Shade Table", &tables.cluster);
        let mono_buffer = upload("Mono Shade Table", &tables.mono);
        let delta_buffer = tables
            .delta
            .as_ref()
            .map(|delta| upload("Delta Shade Table", delta));

        let cluster = self.shade_bind_group(device, "Cluster Shade Bind Group", &cluster_buffer);
        let mono = self.shade_bind_group(device, "Mono Shade Bind Group", &mono_buffer);
        let delta = delta_buffer
            .as_ref()
            .map(|b| self.shade_bind_group(device, "Delta Shade Bind Group", b));

        let mut buffers = vec![cluster_buffer, mono_buffer];
        buffers.extend(delta_buffer);
        self.shades = Some(ShadeBindings {
            buffers,
            cluster,
            mono,
            delta,
        });
    }

    pub fn release_tables(&mut self) {
        if let Some(shades) = self.shades.take() {
            for buffer in shades.buffers {
                buffer.destroy();
            }
        }
    }

    pub fn style(&self) -> CellStyle {
        self.style
    }

    pub fn set_style(&mut self, style: CellStyle) {
        self.style = style;
    }

    /// Push the current style to the GPU. Call once per frame before drawing.
    pub fn prepare(&self, queue: &wgpu::Queue) {
        let params = CellParams {
            radius: self.style.radius,
            alpha: self.style.alpha.clamp(0.0, 1.0),
            lit: self.style.lit as u32,
            _padding: 0,
        };
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
    }

    /// Draw one category's instances for `bin` into the current viewport.
    /// Groups 0 (view) and 1 (OIT) must already be bound.
    pub fn draw(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        instances: &InstanceBufferManager,
        bin: usize,
        category: DisplayCategory,
    ) {
        let Some(shades) = &self.shades else {
            return;
        };
        let table = match category {
            DisplayCategory::Delta => match &shades.delta {
                Some(delta) => delta,
                None => return,
            },
            _ if self.style.single_twinkle => &shades.mono,
            _ => &shades.cluster,
        };

        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(2, table, &[]);
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);

        for set in instances.visible_sets(bin) {
            let lane = set.lane(category);
            let Some((positions, colors)) = lane.buffers() else {
                continue;
            };
            pass.set_vertex_buffer(1, positions.slice(..));
            pass.set_vertex_buffer(2, colors.slice(..));
            pass.draw_indexed(0..self.index_count, 0, 0..lane.count());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sizes() {
        assert_eq!(std::mem::size_of::<ViewUniform>(), 160);
        assert_eq!(std::mem::size_of::<CellParams>(), 16);
        assert_eq!(std::mem::size_of::<SphereVertex>(), 24);
    }

    #[test]
    fn test_unit_sphere_shape() {
        let (vertices, indices) = unit_sphere(SPHERE_STACKS, SPHERE_SLICES);
        assert_eq!(vertices.len(), ((SPHERE_STACKS + 1) * (SPHERE_SLICES + 1)) as usize);
        assert_eq!(indices.len(), (SPHERE_STACKS * SPHERE_SLICES * 6) as usize);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
        for v in &vertices {
            let len = Vec3::from(v.position).length();
            assert!((len - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_view_uniform_combines_matrices() {
        let projection = Mat4::orthographic_rh(-1.0, 1.0, -1.0, 1.0, 0.1, 10.0);
        let model_view = Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0));
        let u = ViewUniform::new(projection, model_view, Vec3::Z * 10.0, 0.2, 0.8);
        assert_eq!(u.mvp, (projection * model_view).to_cols_array_2d());
        assert_eq!(u.light_position, [0.0, 0.0, 10.0, 1.0]);
    }
}
