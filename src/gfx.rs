use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use pollster::FutureExt as _;

use winit::{
    application::ApplicationHandler, dpi::PhysicalSize, event::{ElementState, KeyEvent, WindowEvent}, event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy}, keyboard::{KeyCode, PhysicalKey}, window::{Window, WindowId}
};

use wgpu::{Adapter, BindGroup, BindGroupLayout, Device, Instance, MemoryHints, PresentMode, Queue, Surface, SurfaceCapabilities, Texture};

use crate::parser::{DecodedImage, Decoder};
use crate::ppm_writer;

/// Messages driving the decode-then-display flow. A chosen file becomes
/// `FileSelected`, the decode result comes back as `ImageReady` or
/// `DecodeFailed`; a failed decode leaves the current image on screen.
#[derive(Debug)]
pub enum ViewerEvent {
    FileSelected(PathBuf),
    ImageReady(DecodedImage),
    DecodeFailed(anyhow::Error),
}

pub fn run(initial_file: Option<PathBuf>) -> Result<()> {
    let event_loop = EventLoop::<ViewerEvent>::with_user_event().build()?;
    let proxy = event_loop.create_proxy();

    if let Some(path) = initial_file {
        let _ = proxy.send_event(ViewerEvent::FileSelected(path));
    }

    let mut window_state = ViewerApplication::new(proxy);
    event_loop.run_app(&mut window_state)?;

    Ok(())
}

struct ViewerApplication<'a> {
    state: Option<State<'a>>,
    proxy: EventLoopProxy<ViewerEvent>,
}

impl<'a> ViewerApplication<'a> {
    pub fn new(proxy: EventLoopProxy<ViewerEvent>) -> Self {
        Self { state: None, proxy }
    }

    fn handle_key(&mut self, event: KeyEvent) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }

        match event.physical_key {
            PhysicalKey::Code(KeyCode::KeyO) => {
                if let Some(path) = pick_open_file() {
                    let _ = self.proxy.send_event(ViewerEvent::FileSelected(path));
                }
            }
            PhysicalKey::Code(KeyCode::KeyS) => {
                self.save_current_image();
            }
            _ => {}
        }
    }

    fn save_current_image(&self) {
        let image = match self.state.as_ref().and_then(|state| state.image()) {
            Some(image) => image,
            None => {
                info!("no image loaded, nothing to save");
                return;
            }
        };

        let path = match pick_save_file() {
            Some(path) => path,
            None => return,
        };

        match ppm_writer::write_ppm_file(&path, image) {
            Ok(()) => info!("saved image to {}", path.display()),
            Err(err) => error!("failed to save image to {}: {err:#}", path.display()),
        }
    }
}

impl<'a> ApplicationHandler<ViewerEvent> for ViewerApplication<'a> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let attributes = Window::default_attributes()
            .with_title(".ppm Image Viewer")
            .with_inner_size(PhysicalSize::new(400, 200));
        let window = event_loop.create_window(attributes).unwrap();
        self.state = Some(State::new(window));
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let window = self.state.as_ref().unwrap().window();

        if window.id() == window_id {
            match event {
                WindowEvent::CloseRequested => {
                    event_loop.exit();
                },
                WindowEvent::Resized(physical_size) => {
                    self.state.as_mut().unwrap().resize(physical_size);
                },
                WindowEvent::RedrawRequested => {
                    let state = self.state.as_mut().unwrap();
                    match state.render() {
                        Ok(()) => {}
                        Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                            let size = state.size();
                            state.resize(size);
                        }
                        Err(wgpu::SurfaceError::OutOfMemory) => {
                            error!("surface is out of memory, shutting down");
                            event_loop.exit();
                        }
                        Err(err) => error!("failed to render frame: {err}"),
                    }
                },
                WindowEvent::KeyboardInput { event, .. } => {
                    self.handle_key(event);
                },
                _ => {}
            }
        }
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: ViewerEvent) {
        match event {
            ViewerEvent::FileSelected(path) => {
                info!("decoding {}", path.display());

                // the decode runs to completion right here, on the event
                // loop thread
                let message = match decode_file(&path) {
                    Ok(image) => ViewerEvent::ImageReady(image),
                    Err(err) => ViewerEvent::DecodeFailed(err),
                };
                let _ = self.proxy.send_event(message);
            }
            ViewerEvent::ImageReady(image) => {
                if let Some(state) = self.state.as_mut() {
                    state.install_image(image);
                }
            }
            ViewerEvent::DecodeFailed(err) => {
                // the previously displayed image stays untouched
                error!("failed to decode image: {err:#}");
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        let window = self.state.as_ref().unwrap().window();
        window.request_redraw();
    }
}

fn decode_file(path: &Path) -> Result<DecodedImage> {
    let file = File::open(path)?;
    let decoder = Decoder::new(BufReader::new(file));

    Ok(decoder.decode()?)
}

fn pick_open_file() -> Option<PathBuf> {
    rfd::FileDialog::new()
        .add_filter("PPM image", &["ppm"])
        .pick_file()
}

fn pick_save_file() -> Option<PathBuf> {
    rfd::FileDialog::new()
        .add_filter("PPM image", &["ppm"])
        .set_file_name("image.ppm")
        .save_file()
}

/// GPU objects for the image currently on screen. Replaced wholesale when a
/// new image is decoded.
struct DisplayedImage {
    image: DecodedImage,
    texture: Texture,
    bind_group: BindGroup,
}

struct State<'a> {
    surface: Surface<'a>,
    device: Device,
    queue: Queue,
    config: wgpu::SurfaceConfiguration,
    texture_bind_group_layout: BindGroupLayout,
    sampler: wgpu::Sampler,
    displayed: Option<DisplayedImage>,

    size: PhysicalSize<u32>,
    window: Arc<Window>,
    render_pipeline: wgpu::RenderPipeline,
}

impl<'a> State<'a> {
    pub fn new(window: Window) -> Self {
        let window_arc = Arc::new(window);
        let size = window_arc.inner_size();
        let instance = Self::create_gpu_instance();
        let surface = instance.create_surface(window_arc.clone()).unwrap();
        let adapter = Self::create_adapter(instance, &surface);
        let (device, queue) = Self::create_device(&adapter);
        let surface_caps = surface.get_capabilities(&adapter);
        let config = Self::create_surface_config(size, surface_caps);

        let texture_bind_group_layout = Self::create_texture_bind_group_layout(&device);
        let sampler = Self::create_sampler(&device);
        let render_pipeline = Self::create_render_pipeline(&device, &config, &texture_bind_group_layout);

        surface.configure(&device, &config);

        Self {
            surface,
            device,
            queue,
            config,
            size,
            texture_bind_group_layout,
            sampler,
            displayed: None,
            render_pipeline,
            window: window_arc,
        }
    }

    /// Swap the displayed image. The old texture is destroyed first; nothing
    /// else references it.
    pub fn install_image(&mut self, image: DecodedImage) {
        let (width, height) = (image.width, image.height);

        let texture = self.create_image_texture(&image);
        let bind_group = self.create_image_bind_group(&texture);

        if let Some(old) = self.displayed.take() {
            old.texture.destroy();
        }

        self.displayed = Some(DisplayedImage {
            image,
            texture,
            bind_group,
        });

        info!("loaded {}x{} image", width, height);

        let _ = self.window.request_inner_size(PhysicalSize::new(width, height));
        self.window.request_redraw();
    }

    fn create_image_texture(&self, image: &DecodedImage) -> Texture {
        let texture_size = wgpu::Extent3d {
            width: image.width,
            height: image.height,
            depth_or_array_layers: 1,
        };

        let texture = self.device.create_texture(
            &wgpu::TextureDescriptor {
                size: texture_size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                label: None,
                view_formats: &[],
            }
        );

        // no 24-bit texture format exists, expand rgb to rgba
        let texture_buffer: Vec<u8> = image
            .pixels()
            .chunks_exact(3)
            .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 0xff])
            .collect();

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::default(),
            },
            &texture_buffer,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * image.width),
                rows_per_image: Some(image.height),
            },
            texture_size
        );

        texture
    }

    fn create_image_bind_group(&self, texture: &Texture) -> BindGroup {
        let texture_view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        self.device.create_bind_group(
            &wgpu::BindGroupDescriptor {
                layout: &self.texture_bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&texture_view)
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler)
                    },
                ],
                label: None
            }
        )
    }

    fn create_texture_bind_group_layout(device: &Device) -> BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None
                }
            ],
            label: None
        })
    }

    fn create_sampler(device: &Device) -> wgpu::Sampler {
        device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        })
    }

    fn create_surface_config(size: PhysicalSize<u32>, capabilities: SurfaceCapabilities) -> wgpu::SurfaceConfiguration {
        let surface_format = capabilities.formats.iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(capabilities.formats[0]);

        wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width,
            height: size.height,
            present_mode: PresentMode::AutoVsync,
            alpha_mode: capabilities.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        }
    }

    fn create_device(adapter: &Adapter) -> (Device, Queue) {
        adapter.request_device(
            &wgpu::DeviceDescriptor {
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: MemoryHints::Performance,
                label: None,
            },
            None
        ).block_on().unwrap()
    }

    fn create_adapter(instance: Instance, surface: &Surface) -> Adapter {
        instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            }
        ).block_on().unwrap()
    }

    fn create_gpu_instance() -> Instance {
        Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        })
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }

        self.size = new_size;

        self.config.width = new_size.width;
        self.config.height = new_size.height;

        self.surface.configure(&self.device, &self.config);
    }

    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.0,
                            g: 0.125,
                            b: 0.125,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    }
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            if let Some(displayed) = &self.displayed {
                render_pass.set_pipeline(&self.render_pipeline);
                render_pass.set_bind_group(0, &displayed.bind_group, &[]);
                render_pass.draw(0..6, 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn image(&self) -> Option<&DecodedImage> {
        self.displayed.as_ref().map(|displayed| &displayed.image)
    }

    fn create_render_pipeline(device: &Device, config: &wgpu::SurfaceConfiguration, bind_group_layout: &BindGroupLayout) -> wgpu::RenderPipeline {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: None,
            source: wgpu::ShaderSource::Wgsl(include_str!("shader.wgsl").into())
        });

        let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: None,
            bind_group_layouts: &[bind_group_layout],
            push_constant_ranges: &[],
        });

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: None,
            layout: Some(&render_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: config.format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Cw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        })
    }
}
