//! Order-independent transparency with per-pixel linked lists.
//!
//! Pass 1 (fragment collection) runs every transparent draw with the write
//! bind group at group 1. Each fragment reserves a node from a fixed pool
//! through an atomic counter and swaps itself into its pixel's head slot.
//! Pass 2 (resolve) draws a full-screen triangle that walks each list,
//! sorts by depth and blends over the background.
//!
//! The two passes are separate render passes in one encoder, so every
//! pass-1 storage write is visible before the resolve reads it.

use super::{validated, RenderError};
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

/// Head slot value for a pixel with no fragments.
pub const HEAD_EMPTY: u32 = 0xFFFF_FFFF;
/// Default node pool size per screen pixel.
pub const NODES_PER_PIXEL: u32 = 27;
/// Fragments read back per pixel in the resolve pass.
pub const MAX_FRAGMENTS_PER_PIXEL: usize = 64;

/// WGSL helpers for pass-1 shaders (bindings at group 1, `oit_insert`).
pub const OIT_COMMON_WGSL: &str = include_str!("../../shaders/oit_common.wgsl");

/// Prefix a pass-1 shader with the list insertion helpers.
pub fn with_oit_common(source: &str) -> String {
    format!("{}\n{}", OIT_COMMON_WGSL, source)
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct OitNode {
    /// RGBA8 packed as by WGSL `pack4x8unorm`.
    pub color: u32,
    pub depth: f32,
    pub next: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct OitParams {
    width: u32,
    height: u32,
    capacity: u32,
    _pad: u32,
    background: [f32; 4],
}

/// Same packing as WGSL `pack4x8unorm`.
pub fn pack_color(color: Vec4) -> u32 {
    let c = (color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
    (c.x as u32) | ((c.y as u32) << 8) | ((c.z as u32) << 16) | ((c.w as u32) << 24)
}

/// Same unpacking as WGSL `unpack4x8unorm`.
pub fn unpack_color(packed: u32) -> Vec4 {
    Vec4::new(
        (packed & 0xFF) as f32,
        ((packed >> 8) & 0xFF) as f32,
        ((packed >> 16) & 0xFF) as f32,
        ((packed >> 24) & 0xFF) as f32,
    ) / 255.0
}

/// Node pool size for a framebuffer, limited by the largest storage binding.
pub fn node_capacity(width: u32, height: u32, nodes_per_pixel: u32, max_binding: u64) -> u32 {
    let wanted = width as u64 * height as u64 * nodes_per_pixel.max(1) as u64;
    let limit = max_binding / std::mem::size_of::<OitNode>() as u64;
    wanted.min(limit).min(u32::MAX as u64 - 1).max(1) as u32
}

/// Sort fragments far to near and blend them over `background`.
fn composite(fragments: &mut [(f32, u32)], background: Vec3) -> Vec3 {
    fragments.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));
    fragments.iter().fold(background, |result, &(_, packed)| {
        let c = unpack_color(packed);
        result.lerp(c.truncate(), c.w)
    })
}

/// CPU model of the GPU lists, used to check compositing rules without a device.
#[derive(Debug, Clone)]
pub struct CpuFragmentLists {
    width: u32,
    height: u32,
    capacity: u32,
    heads: Vec<u32>,
    nodes: Vec<OitNode>,
}

impl CpuFragmentLists {
    pub fn new(width: u32, height: u32, capacity: u32) -> Self {
        Self {
            width,
            height,
            capacity,
            heads: vec![HEAD_EMPTY; (width * height) as usize],
            nodes: Vec::with_capacity(capacity as usize),
        }
    }

    /// Per-frame reset of heads and counter.
    pub fn clear(&mut self) {
        self.heads.fill(HEAD_EMPTY);
        self.nodes.clear();
    }

    /// Insert a fragment. Returns false when the pool is full and the fragment is dropped.
    pub fn insert(&mut self, x: u32, y: u32, color: Vec4, depth: f32) -> bool {
        if x >= self.width || y >= self.height || color.w <= 0.0 {
            return false;
        }
        if self.nodes.len() as u32 >= self.capacity {
            return false;
        }
        let node = self.nodes.len() as u32;
        let pixel = (y * self.width + x) as usize;
        let next = std::mem::replace(&mut self.heads[pixel], node);
        self.nodes.push(OitNode {
            color: pack_color(color),
            depth,
            next,
        });
        true
    }

    /// Allocated nodes. Never exceeds capacity.
    pub fn used(&self) -> u32 {
        self.nodes.len() as u32
    }

    pub fn list_len(&self, x: u32, y: u32) -> usize {
        let mut len = 0;
        let mut index = self.heads[(y * self.width + x) as usize];
        while index != HEAD_EMPTY {
            len += 1;
            index = self.nodes[index as usize].next;
        }
        len
    }

    pub fn resolve_pixel(&self, x: u32, y: u32, background: Vec3) -> Vec3 {
        let mut fragments = Vec::with_capacity(MAX_FRAGMENTS_PER_PIXEL);
        let mut index = self.heads[(y * self.width + x) as usize];
        while index != HEAD_EMPTY && fragments.len() < MAX_FRAGMENTS_PER_PIXEL {
            let node = self.nodes[index as usize];
            fragments.push((node.depth, node.color));
            index = node.next;
        }
        composite(&mut fragments, background)
    }
}

/// GPU resources for both OIT passes.
pub struct OitCompositor {
    heads_buffer: wgpu::Buffer,
    heads_reset_buffer: wgpu::Buffer,
    nodes_buffer: wgpu::Buffer,
    counter_buffer: wgpu::Buffer,
    params_buffer: wgpu::Buffer,
    write_bind_group_layout: wgpu::BindGroupLayout,
    write_bind_group: wgpu::BindGroup,
    resolve_bind_group_layout: wgpu::BindGroupLayout,
    resolve_bind_group: wgpu::BindGroup,
    resolve_pipeline: wgpu::RenderPipeline,
    nodes_per_pixel: u32,
    max_binding: u64,
    capacity: u32,
    background: [f32; 4],
    pub width: u32,
    pub height: u32,
}

fn storage_entry(binding: u32, read_only: bool, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

struct ListBuffers {
    heads: wgpu::Buffer,
    heads_reset: wgpu::Buffer,
    nodes: wgpu::Buffer,
    capacity: u32,
}

impl OitCompositor {
    pub fn new(
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        nodes_per_pixel: u32,
    ) -> Result<Self, RenderError> {
        let width = width.max(1);
        let height = height.max(1);
        let max_binding = device.limits().max_storage_buffer_binding_size as u64;

        let write_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("OIT Write Bind Group Layout"),
                entries: &[
                    storage_entry(0, false, wgpu::ShaderStages::FRAGMENT),
                    storage_entry(1, false, wgpu::ShaderStages::FRAGMENT),
                    storage_entry(2, false, wgpu::ShaderStages::FRAGMENT),
                    uniform_entry(3, wgpu::ShaderStages::FRAGMENT),
                ],
            });

        let resolve_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("OIT Resolve Bind Group Layout"),
                entries: &[
                    storage_entry(0, true, wgpu::ShaderStages::FRAGMENT),
                    storage_entry(1, true, wgpu::ShaderStages::FRAGMENT),
                    uniform_entry(2, wgpu::ShaderStages::FRAGMENT),
                ],
            });

        let counter_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("OIT Counter Buffer"),
            size: 4,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("OIT Params Buffer"),
            size: std::mem::size_of::<OitParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let lists = Self::create_list_buffers(device, width, height, nodes_per_pixel, max_binding);

        let write_bind_group = Self::create_write_bind_group(
            device,
            &write_bind_group_layout,
            &lists,
            &counter_buffer,
            &params_buffer,
        );
        let resolve_bind_group = Self::create_resolve_bind_group(
            device,
            &resolve_bind_group_layout,
            &lists,
            &params_buffer,
        );

        let resolve_pipeline = validated(device, "OIT resolve pipeline", || {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("OIT Resolve Shader"),
                source: wgpu::ShaderSource::Wgsl(
                    include_str!("../../shaders/oit_resolve.wgsl").into(),
                ),
            });

            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("OIT Resolve Pipeline Layout"),
                bind_group_layouts: &[&resolve_bind_group_layout],
                push_constant_ranges: &[],
            });

            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("OIT Resolve Pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: surface_format,
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
            "OIT node pool: {} nodes for {}x{} ({} per pixel requested)",
            lists.capacity,
            width,
            height,
            nodes_per_pixel
        );

        Ok(Self {
            heads_buffer: lists.heads,
            heads_reset_buffer: lists.heads_reset,
            nodes_buffer: lists.nodes,
            counter_buffer,
            params_buffer,
            write_bind_group_layout,
            write_bind_group,
            resolve_bind_group_layout,
            resolve_bind_group,
            resolve_pipeline,
            nodes_per_pixel,
            max_binding,
            capacity: lists.capacity,
            background: [0.0, 0.0, 0.0, 1.0],
            width,
            height,
        })
    }

    fn create_list_buffers(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        nodes_per_pixel: u32,
        max_binding: u64,
    ) -> ListBuffers {
        let pixels = width as u64 * height as u64;
        let capacity = node_capacity(width, height, nodes_per_pixel, max_binding);

        let heads = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("OIT Head Pointer Buffer"),
            size: pixels * 4,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // Source for the per-frame head reset, every slot HEAD_EMPTY.
        let heads_reset = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("OIT Head Reset Buffer"),
            size: pixels * 4,
            usage: wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: true,
        });
        heads_reset
            .slice(..)
            .get_mapped_range_mut()
            .fill(0xFF);
        heads_reset.unmap();

        let nodes = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("OIT Node Pool Buffer"),
            size: capacity as u64 * std::mem::size_of::<OitNode>() as u64,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        ListBuffers {
            heads,
            heads_reset,
            nodes,
            capacity,
        }
    }

    fn create_write_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        lists: &ListBuffers,
        counter: &wgpu::Buffer,
        params: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("OIT Write Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: lists.heads.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: lists.nodes.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: counter.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params.as_entire_binding(),
                },
            ],
        })
    }

    fn create_resolve_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        lists: &ListBuffers,
        params: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("OIT Resolve Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: lists.heads.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: lists.nodes.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
            ],
        })
    }

    /// Recreate the head image and node pool for a new framebuffer size.
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if width == 0 || height == 0 || (width == self.width && height == self.height) {
            return;
        }
        self.width = width;
        self.height = height;

        let lists =
            Self::create_list_buffers(device, width, height, self.nodes_per_pixel, self.max_binding);
        self.write_bind_group = Self::create_write_bind_group(
            device,
            &self.write_bind_group_layout,
            &lists,
            &self.counter_buffer,
            &self.params_buffer,
        );
        self.resolve_bind_group = Self::create_resolve_bind_group(
            device,
            &self.resolve_bind_group_layout,
            &lists,
            &self.params_buffer,
        );
        self.heads_buffer.destroy();
        self.heads_reset_buffer.destroy();
        self.nodes_buffer.destroy();
        self.heads_buffer = lists.heads;
        self.heads_reset_buffer = lists.heads_reset;
        self.nodes_buffer = lists.nodes;
        self.capacity = lists.capacity;
        log::debug!("OIT node pool resized: {} nodes for {}x{}", self.capacity, width, height);
    }

    pub fn set_background(&mut self, grey: f32) {
        self.background = [grey, grey, grey, 1.0];
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn write_bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.write_bind_group_layout
    }

    pub fn write_bind_group(&self) -> &wgpu::BindGroup {
        &self.write_bind_group
    }

    pub fn counter_buffer(&self) -> &wgpu::Buffer {
        &self.counter_buffer
    }

    /// Reset heads and counter and upload the frame parameters.
    pub fn begin_frame(&self, queue: &wgpu::Queue, encoder: &mut wgpu::CommandEncoder) {
        let params = OitParams {
            width: self.width,
            height: self.height,
            capacity: self.capacity,
            _pad: 0,
            background: self.background,
        };
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
        encoder.copy_buffer_to_buffer(
            &self.heads_reset_buffer,
            0,
            &self.heads_buffer,
            0,
            self.width as u64 * self.height as u64 * 4,
        );
        encoder.clear_buffer(&self.counter_buffer, 0, None);
    }

    /// Start pass 1. The target is cleared to the background and never written
    /// by pass-1 pipelines, whose colour write masks are empty.
    pub fn begin_collect_pass<'e>(
        &self,
        encoder: &'e mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
    ) -> wgpu::RenderPass<'e> {
        let [r, g, b, a] = self.background;
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("OIT Fragment Collection Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: r as f64,
                        g: g as f64,
                        b: b as f64,
                        a: a as f64,
                    }),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_bind_group(1, &self.write_bind_group, &[]);
        pass
    }

    /// Pass 2: resolve every pixel's list into the target.
    pub fn resolve(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("OIT Resolve Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.resolve_pipeline);
        pass.set_bind_group(0, &self.resolve_bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

/// Colour target for pass-1 pipelines: present but never written.
pub fn collect_target(format: wgpu::TextureFormat) -> wgpu::ColorTargetState {
    wgpu::ColorTargetState {
        format,
        blend: None,
        write_mask: wgpu::ColorWrites::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_gpu_struct_sizes() {
        assert_eq!(std::mem::size_of::<OitNode>(), 12);
        assert_eq!(std::mem::size_of::<OitParams>(), 32);
    }

    #[test]
    fn test_pack_round_trip_is_quantised() {
        let c = Vec4::new(1.0, 0.5, 0.0, 0.25);
        let back = unpack_color(pack_color(c));
        assert!((back - c).abs().max_element() <= 0.5 / 255.0 + 1e-6);
        assert_eq!(pack_color(Vec4::new(2.0, -1.0, 0.0, 1.0)), 0xFF00_00FF);
    }

    #[test]
    fn test_capacity_clamped_to_binding_limit() {
        assert_eq!(node_capacity(10, 10, 27, u64::MAX), 2700);
        assert_eq!(node_capacity(1920, 1080, 27, 128 << 20), ((128u64 << 20) / 12) as u32);
    }

    #[test]
    fn test_empty_pixel_is_background() {
        let lists = CpuFragmentLists::new(4, 4, 16);
        let bg = Vec3::splat(0.3);
        assert_eq!(lists.resolve_pixel(1, 1, bg), bg);
    }

    #[test]
    fn test_back_to_front_blend() {
        let mut lists = CpuFragmentLists::new(1, 1, 8);
        // Near opaque red in front of a far blue.
        lists.insert(0, 0, Vec4::new(0.0, 0.0, 1.0, 1.0), 0.9);
        lists.insert(0, 0, Vec4::new(1.0, 0.0, 0.0, 1.0), 0.1);
        let out = lists.resolve_pixel(0, 0, Vec3::ZERO);
        assert!((out - Vec3::new(1.0, 0.0, 0.0)).abs().max_element() < 1e-6);
    }

    #[test]
    fn test_overflow_drops_newest_and_never_exceeds_capacity() {
        let mut lists = CpuFragmentLists::new(2, 1, 3);
        assert!(lists.insert(0, 0, Vec4::ONE, 0.1));
        assert!(lists.insert(0, 0, Vec4::ONE, 0.2));
        assert!(lists.insert(1, 0, Vec4::ONE, 0.3));
        assert!(!lists.insert(1, 0, Vec4::ONE, 0.4));
        assert_eq!(lists.used(), 3);
        assert_eq!(lists.list_len(0, 0), 2);
        assert_eq!(lists.list_len(1, 0), 1);

        lists.clear();
        assert_eq!(lists.used(), 0);
        assert_eq!(lists.list_len(0, 0), 0);
    }

    fn fragment() -> impl Strategy<Value = (Vec4, f32)> {
        (0.0f32..1.0, 0.0f32..1.0, 0.0f32..1.0, 0.05f32..1.0, 0.0f32..1.0)
            .prop_map(|(r, g, b, a, d)| (Vec4::new(r, g, b, a), d))
    }

    proptest! {
        #[test]
        fn prop_resolve_is_order_independent(
            frags in prop::collection::vec(fragment(), 1..24),
            seed in any::<u64>(),
        ) {
            let bg = Vec3::splat(0.2);
            let mut forward = CpuFragmentLists::new(1, 1, 64);
            for (c, d) in &frags {
                forward.insert(0, 0, *c, *d);
            }

            // Deterministic shuffle from the seed.
            let mut order: Vec<usize> = (0..frags.len()).collect();
            let mut state = seed | 1;
            for i in (1..order.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                order.swap(i, (state % (i as u64 + 1)) as usize);
            }
            let mut shuffled = CpuFragmentLists::new(1, 1, 64);
            for &i in &order {
                let (c, d) = frags[i];
                shuffled.insert(0, 0, c, d);
            }

            let a = forward.resolve_pixel(0, 0, bg);
            let b = shuffled.resolve_pixel(0, 0, bg);
            prop_assert!((a - b).abs().max_element() < 1e-5);
        }

        #[test]
        fn prop_counter_never_exceeds_capacity(n in 0usize..200, capacity in 1u32..64) {
            let mut lists = CpuFragmentLists::new(4, 4, capacity);
            for i in 0..n {
                lists.insert((i % 4) as u32, ((i / 4) % 4) as u32, Vec4::ONE, 0.5);
            }
            prop_assert!(lists.used() <= capacity);
        }
    }
}
