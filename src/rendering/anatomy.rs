//! Anatomical context geometry: skin mesh, brain-structure regions,
//! section outlines and axes. Everything is transparent and goes through
//! the OIT lists alongside the cells.

use super::cells::ViewBindings;
use super::oit::{collect_target, with_oit_common, OitCompositor};
use super::{validated, RenderError};
use crate::data::LoadError;
use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};
use std::path::Path;
use wgpu::util::DeviceExt;

const AXIS_X: f32 = 12.0;
const AXIS_Y: f32 = 8.0;
const AXIS_Z_POS: f32 = 8.0;
const AXIS_Z_NEG: f32 = 15.0;
const MINOR_TICK: f32 = 0.5;
const MAJOR_TICK_LEN: f32 = 0.4;
const MINOR_TICK_LEN: f32 = 0.2;

pub const AXES_COLOR: Vec4 = Vec4::new(0.0, 1.0, 1.0, 1.0);
pub const SKIN_TAN: Vec3 = Vec3::new(0.82, 0.71, 0.55);
pub const SKIN_WHITE: Vec3 = Vec3::new(1.0, 1.0, 1.0);

/// Uniform slots are 256-byte aligned for dynamic offsets.
const PARAM_STRIDE: u64 = 256;
const SLOT_SKIN: u32 = 0;
const SLOT_AXES: u32 = 1;
const SLOT_OUTLINES: u32 = 2;
const FIRST_REGION_SLOT: u32 = 3;
/// Regions with their own colour slot; extra regions are not drawn.
pub const MAX_REGIONS: usize = 61;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshRegion {
    pub name: String,
    /// First vertex of the region's triangles.
    pub first: u32,
    pub count: u32,
    pub color: [f32; 3],
}

/// Triangle-list anatomy mesh. The skin range comes first, then regions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnatomyMesh {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    /// Vertex range of the skin triangles.
    pub skin: (u32, u32),
    #[serde(default)]
    pub regions: Vec<MeshRegion>,
    /// Section outline polylines.
    #[serde(default)]
    pub outlines: Vec<Vec<[f32; 3]>>,
}

impl AnatomyMesh {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path)?;
        let mesh: AnatomyMesh = ron::from_str(&text)?;
        log::info!(
            "Loaded anatomy mesh {}: {} vertices, {} regions, {} outlines",
            path.display(),
            mesh.positions.len(),
            mesh.regions.len(),
            mesh.outlines.len()
        );
        Ok(mesh)
    }

    /// Axis-aligned bounds of all triangle vertices.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        self.positions.iter().map(|p| Vec3::from(*p)).fold(None, |acc, p| match acc {
            None => Some((p, p)),
            Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
        })
    }

    fn vertices(&self) -> Vec<AnatomyVertex> {
        self.positions
            .iter()
            .enumerate()
            .map(|(i, p)| AnatomyVertex {
                position: *p,
                normal: self.normals.get(i).copied().unwrap_or([0.0, 0.0, 1.0]),
            })
            .collect()
    }

    /// Outlines as line-list segments.
    fn outline_segments(&self) -> Vec<[f32; 3]> {
        self.outlines
            .iter()
            .flat_map(|line| line.windows(2).flat_map(|w| [w[0], w[1]]))
            .collect()
    }
}

/// Axis lines with half and whole unit tick marks, as line-list endpoints.
pub fn axes_lines() -> Vec<[f32; 3]> {
    let mut lines = vec![[-AXIS_X, 0.0, 0.0], [AXIS_X, 0.0, 0.0]];
    let mut tick = MINOR_TICK;
    while tick <= AXIS_X {
        for s in [1.0, -1.0] {
            lines.push([s * tick, MINOR_TICK_LEN, 0.0]);
            lines.push([s * tick, -MINOR_TICK_LEN, 0.0]);
            lines.push([s * (tick + 0.5), MAJOR_TICK_LEN, 0.0]);
            lines.push([s * (tick + 0.5), -MAJOR_TICK_LEN, 0.0]);
        }
        tick += 1.0;
    }

    lines.push([0.0, -AXIS_Y, 0.0]);
    lines.push([0.0, AXIS_Y, 0.0]);
    let mut tick = MINOR_TICK;
    while tick <= AXIS_Y {
        for s in [1.0, -1.0] {
            lines.push([MINOR_TICK_LEN, s * tick, 0.0]);
            lines.push([-MINOR_TICK_LEN, s * tick, 0.0]);
            lines.push([MAJOR_TICK_LEN, s * (tick + 0.5), 0.0]);
            lines.push([-MAJOR_TICK_LEN, s * (tick + 0.5), 0.0]);
        }
        tick += 1.0;
    }

    lines.push([0.0, 0.0, AXIS_Z_POS]);
    lines.push([0.0, 0.0, -AXIS_Z_NEG]);
    for (s, len) in [(-1.0, AXIS_Z_NEG), (1.0, AXIS_Z_POS)] {
        let mut tick = MINOR_TICK;
        while tick <= len {
            lines.push([MINOR_TICK_LEN, 0.0, s * tick]);
            lines.push([-MINOR_TICK_LEN, 0.0, s * tick]);
            lines.push([MAJOR_TICK_LEN, 0.0, s * (tick + 0.5)]);
            lines.push([-MAJOR_TICK_LEN, 0.0, s * (tick + 0.5)]);
            tick += 1.0;
        }
    }
    lines
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct AnatomyVertex {
    position: [f32; 3],
    normal: [f32; 3],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct AnatomyParams {
    color: [f32; 4],
    lit: u32,
    _padding: [u32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SkinColor {
    #[default]
    Tan,
    White,
}

impl SkinColor {
    pub fn rgb(self) -> Vec3 {
        match self {
            SkinColor::Tan => SKIN_TAN,
            SkinColor::White => SKIN_WHITE,
        }
    }
}

/// Display controls for the anatomy layers.
#[derive(Debug, Clone, PartialEq)]
pub struct AnatomyStyle {
    pub skin_color: SkinColor,
    /// Skin opacity in [0, 1].
    pub skin_alpha: f32,
    pub region_alpha: f32,
    pub outline_grey: f32,
    pub show_skin: bool,
    pub show_axes: bool,
    pub show_outlines: bool,
    /// Per-region selection, missing entries are off.
    pub regions: Vec<bool>,
}

impl Default for AnatomyStyle {
    fn default() -> Self {
        Self {
            skin_color: SkinColor::Tan,
            skin_alpha: 0.7,
            region_alpha: 0.5,
            outline_grey: 1.0,
            show_skin: true,
            show_axes: false,
            show_outlines: false,
            regions: Vec::new(),
        }
    }
}

struct MeshBuffers {
    triangles: Option<wgpu::Buffer>,
    outlines: Option<wgpu::Buffer>,
    outline_vertices: u32,
}

/// Renderer for anatomy layers through OIT pass 1.
pub struct AnatomyRenderer {
    triangle_pipeline: wgpu::RenderPipeline,
    line_pipeline: wgpu::RenderPipeline,
    params_buffer: wgpu::Buffer,
    params_bind_group: wgpu::BindGroup,
    axes_buffer: wgpu::Buffer,
    axes_vertices: u32,
    mesh: Option<AnatomyMesh>,
    buffers: MeshBuffers,
    style: AnatomyStyle,
}

impl AnatomyRenderer {
    pub fn new(
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
        views: &ViewBindings,
        oit: &OitCompositor,
    ) -> Result<Self, RenderError> {
        let slots = FIRST_REGION_SLOT as u64 + MAX_REGIONS as u64;
        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Anatomy Params Buffer"),
            size: PARAM_STRIDE * slots,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let params_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Anatomy Params Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<AnatomyParams>() as u64,
                    ),
                },
                count: None,
            }],
        });

        let params_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Anatomy Params Bind Group"),
            layout: &params_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &params_buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<AnatomyParams>() as u64),
                }),
            }],
        });

        let axes = axes_lines();
        let axes_vertices: Vec<AnatomyVertex> = axes
            .iter()
            .map(|p| AnatomyVertex {
                position: *p,
                normal: [0.0; 3],
            })
            .collect();
        let axes_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Axes Vertex Buffer"),
            contents: bytemuck::cast_slice(&axes_vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<AnatomyVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: 12,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        };

        let (triangle_pipeline, line_pipeline) = validated(device, "anatomy pipelines", || {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Anatomy OIT Shader"),
                source: wgpu::ShaderSource::Wgsl(
                    with_oit_common(include_str!("../../shaders/anatomy_oit.wgsl")).into(),
                ),
            });

            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Anatomy Pipeline Layout"),
                bind_group_layouts: &[views.layout(), oit.write_bind_group_layout(), &params_layout],
                push_constant_ranges: &[],
            });

            let make = |label: &str, topology: wgpu::PrimitiveTopology| {
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(label),
                    layout: Some(&layout),
                    vertex: wgpu::VertexState {
                        module: &shader,
                        entry_point: Some("vs_main"),
                        buffers: &[vertex_layout.clone()],
                        compilation_options: Default::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &shader,
                        entry_point: Some("fs_main"),
                        targets: &[Some(collect_target(surface_format))],
                        compilation_options: Default::default(),
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology,
                        cull_mode: None,
                        ..Default::default()
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                })
            };

            (
                make("Anatomy Triangle Pipeline", wgpu::PrimitiveTopology::TriangleList),
                make("Anatomy Line Pipeline", wgpu::PrimitiveTopology::LineList),
            )
        })?;

        Ok(Self {
            triangle_pipeline,
            line_pipeline,
            params_buffer,
            params_bind_group,
            axes_buffer,
            axes_vertices: axes.len() as u32,
            mesh: None,
            buffers: MeshBuffers {
                triangles: None,
                outlines: None,
                outline_vertices: 0,
            },
            style: AnatomyStyle::default(),
        })
    }

    /// Replace the anatomy mesh, releasing the previous buffers.
    pub fn set_mesh(&mut self, device: &wgpu::Device, mesh: AnatomyMesh) {
        for buffer in [self.buffers.triangles.take(), self.buffers.outlines.take()]
            .into_iter()
            .flatten()
        {
            buffer.destroy();
        }

        let vertices = mesh.vertices();
        let triangles = (!vertices.is_empty()).then(|| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Anatomy Vertex Buffer"),
                contents: bytemuck::cast_slice(&vertices),
                usage: wgpu::BufferUsages::VERTEX,
            })
        });

        let segments: Vec<AnatomyVertex> = mesh
            .outline_segments()
            .into_iter()
            .map(|p| AnatomyVertex {
                position: p,
                normal: [0.0; 3],
            })
            .collect();
        let outlines = (!segments.is_empty()).then(|| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Outline Vertex Buffer"),
                contents: bytemuck::cast_slice(&segments),
                usage: wgpu::BufferUsages::VERTEX,
            })
        });

        if mesh.regions.len() > MAX_REGIONS {
            log::warn!(
                "Anatomy mesh has {} regions, only the first {} can be shown",
                mesh.regions.len(),
                MAX_REGIONS
            );
        }

        self.buffers = MeshBuffers {
            triangles,
            outlines,
            outline_vertices: segments.len() as u32,
        };
        self.style.regions.resize(mesh.regions.len(), false);
        self.mesh = Some(mesh);
    }

    pub fn mesh(&self) -> Option<&AnatomyMesh> {
        self.mesh.as_ref()
    }

    pub fn style(&self) -> &AnatomyStyle {
        &self.style
    }

    pub fn style_mut(&mut self) -> &mut AnatomyStyle {
        &mut self.style
    }

    fn write_slot(&self, queue: &wgpu::Queue, slot: u32, color: Vec4, lit: bool) {
        let params = AnatomyParams {
            color: color.to_array(),
            lit: lit as u32,
            _padding: [0; 3],
        };
        queue.write_buffer(
            &self.params_buffer,
            slot as u64 * PARAM_STRIDE,
            bytemuck::bytes_of(&params),
        );
    }

    /// Push colours for every layer. Call once per frame before drawing.
    pub fn prepare(&self, queue: &wgpu::Queue) {
        let s = &self.style;
        self.write_slot(queue, SLOT_SKIN, s.skin_color.rgb().extend(s.skin_alpha), true);
        self.write_slot(queue, SLOT_AXES, AXES_COLOR, false);
        self.write_slot(
            queue,
            SLOT_OUTLINES,
            Vec4::new(s.outline_grey, s.outline_grey, s.outline_grey, 1.0),
            false,
        );
        if let Some(mesh) = &self.mesh {
            for (i, region) in mesh.regions.iter().take(MAX_REGIONS).enumerate() {
                let color = Vec3::from(region.color).extend(s.region_alpha);
                self.write_slot(queue, FIRST_REGION_SLOT + i as u32, color, true);
            }
        }
    }

    /// Draw enabled layers into the current viewport. Groups 0 and 1 must be bound.
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        let offset = |slot: u32| (slot as u64 * PARAM_STRIDE) as wgpu::DynamicOffset;

        if let (Some(mesh), Some(triangles)) = (&self.mesh, &self.buffers.triangles) {
            pass.set_pipeline(&self.triangle_pipeline);
            pass.set_vertex_buffer(0, triangles.slice(..));

            if self.style.show_skin && mesh.skin.1 > 0 {
                pass.set_bind_group(2, &self.params_bind_group, &[offset(SLOT_SKIN)]);
                pass.draw(mesh.skin.0..mesh.skin.0 + mesh.skin.1, 0..1);
            }
            for (i, region) in mesh.regions.iter().take(MAX_REGIONS).enumerate() {
                if !self.style.regions.get(i).copied().unwrap_or(false) || region.count == 0 {
                    continue;
                }
                pass.set_bind_group(
                    2,
                    &self.params_bind_group,
                    &[offset(FIRST_REGION_SLOT + i as u32)],
                );
                pass.draw(region.first..region.first + region.count, 0..1);
            }
        }

        pass.set_pipeline(&self.line_pipeline);
        if self.style.show_outlines {
            if let Some(outlines) = &self.buffers.outlines {
                pass.set_bind_group(2, &self.params_bind_group, &[offset(SLOT_OUTLINES)]);
                pass.set_vertex_buffer(0, outlines.slice(..));
                pass.draw(0..self.buffers.outline_vertices, 0..1);
            }
        }
        if self.style.show_axes {
            pass.set_bind_group(2, &self.params_bind_group, &[offset(SLOT_AXES)]);
            pass.set_vertex_buffer(0, self.axes_buffer.slice(..));
            pass.draw(0..self.axes_vertices, 0..1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_mesh() -> AnatomyMesh {
        AnatomyMesh {
            positions: vec![
                [-1.0, -2.0, 0.0],
                [1.0, -2.0, 0.0],
                [1.0, 2.0, 3.0],
                [-1.0, 2.0, 3.0],
                [5.0, 0.0, 0.0],
                [6.0, 0.0, 0.0],
            ],
            normals: vec![[0.0, 0.0, 1.0]; 6],
            skin: (0, 3),
            regions: vec![MeshRegion {
                name: "nucleus".to_string(),
                first: 3,
                count: 3,
                color: [1.0, 0.0, 0.0],
            }],
            outlines: vec![vec![[0.0; 3], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0]]],
        }
    }

    #[test]
    fn test_params_fit_slot() {
        assert_eq!(std::mem::size_of::<AnatomyParams>(), 32);
        assert!(std::mem::size_of::<AnatomyParams>() as u64 <= PARAM_STRIDE);
    }

    #[test]
    fn test_mesh_bounds() {
        let (lo, hi) = quad_mesh().bounds().unwrap();
        assert_eq!(lo, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(hi, Vec3::new(6.0, 2.0, 3.0));
        assert!(AnatomyMesh::default().bounds().is_none());
    }

    #[test]
    fn test_outline_polylines_become_segments() {
        let segments = quad_mesh().outline_segments();
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[1], segments[2]);
    }

    #[test]
    fn test_axes_are_line_pairs() {
        let lines = axes_lines();
        assert_eq!(lines.len() % 2, 0);
        assert!(lines.contains(&[AXIS_X, 0.0, 0.0]));
        assert!(lines.contains(&[0.0, 0.0, -AXIS_Z_NEG]));
    }

    #[test]
    fn test_mesh_ron_round_trip() {
        let mesh = quad_mesh();
        let text = ron::ser::to_string_pretty(&mesh, ron::ser::PrettyConfig::default()).unwrap();
        let back: AnatomyMesh = ron::from_str(&text).unwrap();
        assert_eq!(back, mesh);
    }
}
