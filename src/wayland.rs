// Wayland integration module
// Owns the xdg window, input handling, session persistence hooks, and draw
// dispatch to the GPU renderer or the shared-memory software path.

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use smithay_client_toolkit::{
    compositor::{CompositorHandler, CompositorState},
    delegate_compositor, delegate_keyboard, delegate_output, delegate_pointer,
    delegate_registry, delegate_seat, delegate_shm, delegate_xdg_shell, delegate_xdg_window,
    output::{OutputHandler, OutputState},
    registry::{ProvidesRegistryState, RegistryState},
    registry_handlers,
    seat::{
        keyboard::{KeyEvent, KeyboardHandler, Keysym, Modifiers},
        pointer::{
            CursorIcon, PointerEvent, PointerEventKind, PointerHandler, ThemeSpec, ThemedPointer,
        },
        Capability, SeatHandler, SeatState,
    },
    shell::{
        xdg::{
            window::{Window, WindowConfigure, WindowDecorations, WindowHandler, WindowState},
            XdgShell,
        },
        WaylandSurface,
    },
    shm::{
        slot::{Buffer, SlotPool},
        Shm, ShmHandler,
    },
};
use wayland_client::{
    globals::registry_queue_init,
    protocol::{wl_keyboard, wl_output, wl_pointer, wl_seat, wl_shm, wl_surface},
    Connection, Proxy, QueueHandle,
};

use crate::cli::ViewerArgs;
use crate::image_loader::{self, ImageData};
use crate::session;
use crate::viewport::{self, Viewport};
use crate::wgpu_renderer::WgpuRenderer;

/// Mouse button constants
const BTN_LEFT: u32 = 272;

/// Minimum window size advertised to the compositor
const MIN_WINDOW_SIZE: (u32, u32) = (320, 180);

/// Shm buffer dimension bounds
const MIN_SIZE: u32 = 1;
const MAX_SIZE: u32 = 4096;

/// Maximum shm buffer size (64MB to avoid Wayland buffer issues)
const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Background fill behind the image (XRGB little-endian bytes).
const BACKGROUND_XRGB: [u8; 4] = [10, 10, 10, 0xff];

/// Main Wayland application state
struct ViewerApp {
    // Registry state
    registry_state: RegistryState,
    // Seat state for input handling
    seat_state: SeatState,
    // Output state for display info
    output_state: OutputState,
    // Shared memory for buffer allocation
    shm: Shm,
    // Compositor state
    compositor_state: CompositorState,
    // Shell for desktop windows
    xdg_shell: XdgShell,

    // Wayland display pointer (for GPU rendering)
    display_ptr: *mut std::ffi::c_void,

    // Application-specific state
    image: ImageData,
    viewport: Viewport,
    should_exit: bool,

    // Surface and buffer management
    window: Option<Window>,
    themed_pointer: Option<ThemedPointer>,
    pool: Option<SlotPool>,
    buffer: Option<Buffer>,
    width: u32,
    height: u32,
    configured: bool,

    // Pointer state
    pointer_pos: (f64, f64),
    pointer_enter_serial: Option<u32>,
    dragging: bool,

    // Window state mirrored from configure events
    maximized: bool,
    fullscreen: bool,
    session_dir: Option<PathBuf>,

    // Redraw flag
    needs_redraw: bool,

    // GPU rendering
    use_gpu: bool,
    gpu_renderer: Option<WgpuRenderer>,
    gpu_initialized: bool,
}

impl ViewerApp {
    fn new(
        registry_state: RegistryState,
        seat_state: SeatState,
        output_state: OutputState,
        shm: Shm,
        compositor_state: CompositorState,
        xdg_shell: XdgShell,
        display_ptr: *mut std::ffi::c_void,
        image: ImageData,
        viewport: Viewport,
        session_dir: Option<PathBuf>,
        use_gpu: bool,
    ) -> Self {
        let (logical_w, logical_h) = viewport.logical_size();
        Self {
            registry_state,
            seat_state,
            output_state,
            shm,
            compositor_state,
            xdg_shell,
            display_ptr,
            image,
            viewport,
            should_exit: false,
            window: None,
            themed_pointer: None,
            pool: None,
            buffer: None,
            width: logical_w,
            height: logical_h,
            configured: false,
            pointer_pos: (0.0, 0.0),
            pointer_enter_serial: None,
            dragging: false,
            maximized: false,
            fullscreen: false,
            session_dir,
            needs_redraw: false,
            use_gpu,
            gpu_renderer: None,
            gpu_initialized: false,
        }
    }

    /// Scale from surface pixels back into logical-window pixels.
    fn logical_scale(&self) -> f32 {
        viewport::letterbox(self.viewport.logical_size(), (self.width, self.height)).scale
    }

    fn persist_maximized(&self) {
        if let Some(ref dir) = self.session_dir {
            session::store_maximized(dir, self.maximized);
        }
    }

    fn hide_cursor(&self) {
        if let (Some(pointer), Some(serial)) = (&self.themed_pointer, self.pointer_enter_serial) {
            pointer.pointer().set_cursor(serial, None, 0, 0);
        }
    }

    fn show_cursor(&self, conn: &Connection) {
        if let Some(ref pointer) = self.themed_pointer {
            if let Err(err) = pointer.set_cursor(conn, CursorIcon::Default) {
                debug!("could not restore cursor: {:?}", err);
            }
        }
    }

    /// Initialize GPU renderer from the window's Wayland surface
    fn init_gpu_renderer(&mut self) {
        if self.gpu_initialized {
            return;
        }

        let window = match &self.window {
            Some(window) => window,
            None => {
                warn!("cannot init GPU: no window yet");
                return;
            }
        };

        // With wayland-backend's client_system feature, ObjectId::as_ptr()
        // exposes the raw pointers wgpu needs.
        let surface_ptr = window.wl_surface().id().as_ptr() as *mut std::ffi::c_void;
        let display_ptr = self.display_ptr;

        if display_ptr.is_null() {
            warn!("display pointer is null, falling back to CPU rendering");
            self.use_gpu = false;
            return;
        }

        match WgpuRenderer::new(display_ptr, surface_ptr, self.width, self.height) {
            Ok(mut renderer) => {
                if let Err(e) = renderer.upload_texture(&self.image) {
                    warn!("failed to upload texture to GPU: {:?}", e);
                    self.use_gpu = false;
                    return;
                }
                self.gpu_renderer = Some(renderer);
                self.gpu_initialized = true;
                info!("GPU renderer initialized");
            }
            Err(e) => {
                warn!("failed to initialize GPU renderer: {:?}", e);
                warn!("falling back to CPU rendering");
                self.use_gpu = false;
            }
        }
    }

    /// Draw the current viewport state and present.
    fn draw(&mut self, _qh: &QueueHandle<Self>) {
        if !self.configured || self.window.is_none() {
            return;
        }

        if self.use_gpu && self.gpu_renderer.is_some() {
            if self.draw_gpu() {
                return;
            }
            warn!("GPU rendering failed, falling back to CPU");
        }

        self.draw_cpu();
    }

    /// Draw using GPU (wgpu)
    fn draw_gpu(&mut self) -> bool {
        let renderer = match self.gpu_renderer.as_mut() {
            Some(renderer) => renderer,
            None => return false,
        };

        renderer.resize(self.width, self.height);

        match renderer.render(&self.viewport) {
            Ok(true) => {
                if let Some(ref window) = self.window {
                    window.wl_surface().commit();
                }
                self.needs_redraw = false;
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!("GPU render error: {:?}", e);
                false
            }
        }
    }

    /// Draw using CPU (shared memory buffer)
    fn draw_cpu(&mut self) {
        self.width = self.width.clamp(MIN_SIZE, MAX_SIZE);
        self.height = self.height.clamp(MIN_SIZE, MAX_SIZE);

        let width = self.width;
        let height = self.height;

        let stride = width as i32 * 4;
        let buffer_size = (stride * height as i32) as usize;

        if buffer_size > MAX_BUFFER_SIZE {
            error!(
                "buffer size too large: {} bytes, max: {} bytes",
                buffer_size, MAX_BUFFER_SIZE
            );
            let scale = (MAX_BUFFER_SIZE as f32 / buffer_size as f32).sqrt();
            self.width = (width as f32 * scale) as u32;
            self.height = (height as f32 * scale) as u32;
            return; // Will redraw on next frame with new size
        }

        if self.pool.is_none() {
            match SlotPool::new(buffer_size, &self.shm) {
                Ok(pool) => self.pool = Some(pool),
                Err(e) => {
                    error!(
                        "failed to create slot pool: {}. Buffer size: {} bytes",
                        e, buffer_size
                    );
                    return;
                }
            }
        }

        let pool = self.pool.as_mut().unwrap();

        if pool.len() < buffer_size {
            if let Err(e) = pool.resize(buffer_size) {
                error!("failed to resize pool to {} bytes: {}", buffer_size, e);
                self.pool = None;
                return;
            }
        }

        let (buffer, canvas) = match pool.create_buffer(
            width as i32,
            height as i32,
            stride,
            wl_shm::Format::Xrgb8888,
        ) {
            Ok(buf) => buf,
            Err(e) => {
                error!("failed to create buffer {}x{}: {}", width, height, e);
                return;
            }
        };

        Self::blit(&self.image, &self.viewport, canvas, width, height);

        let window = self.window.as_ref().unwrap();
        let surface = window.wl_surface();
        buffer.attach_to(surface).expect("Failed to attach buffer");
        surface.damage_buffer(0, 0, width as i32, height as i32);
        surface.commit();

        self.buffer = Some(buffer);
        self.needs_redraw = false;
    }

    /// Software path: dark background, image sampled into the letterboxed
    /// destination rect, nearest filtering with a per-column source LUT.
    fn blit(image: &ImageData, viewport: &Viewport, canvas: &mut [u8], width: u32, height: u32) {
        for pixel in canvas.chunks_exact_mut(4) {
            pixel.copy_from_slice(&BACKGROUND_XRGB);
        }

        let lb = viewport::letterbox(viewport.logical_size(), (width, height));
        let dest = viewport.dest_rect();

        // Destination rect in surface pixels
        let dx = lb.x + dest.x * lb.scale;
        let dy = lb.y + dest.y * lb.scale;
        let dw = dest.w * lb.scale;
        let dh = dest.h * lb.scale;
        if dw < 1.0 || dh < 1.0 {
            return;
        }

        let (src_w, src_h, src) = image_loader::best_level(image, dw);

        let x0 = dx.floor().max(0.0) as u32;
        let y0 = dy.floor().max(0.0) as u32;
        let x1 = ((dx + dw).ceil().max(0.0) as u32).min(width);
        let y1 = ((dy + dh).ceil().max(0.0) as u32).min(height);
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        let x_lut: Vec<u32> = (x0..x1)
            .map(|x| {
                let u = (x as f32 + 0.5 - dx) / dw;
                ((u * src_w as f32) as u32).min(src_w.saturating_sub(1))
            })
            .collect();

        for y in y0..y1 {
            let v = (y as f32 + 0.5 - dy) / dh;
            let src_y = ((v * src_h as f32) as u32).min(src_h.saturating_sub(1));
            let src_row = (src_y * src_w * 4) as usize;
            let dst_row = ((y * width + x0) * 4) as usize;

            for (i, &src_x) in x_lut.iter().enumerate() {
                let s = src_row + (src_x * 4) as usize;
                let d = dst_row + i * 4;
                if s + 3 < src.len() && d + 3 < canvas.len() {
                    // RGBA source into an XRGB canvas
                    canvas[d] = src[s + 2];
                    canvas[d + 1] = src[s + 1];
                    canvas[d + 2] = src[s];
                    canvas[d + 3] = 0xff;
                }
            }
        }
    }
}

// Implement required traits for smithay-client-toolkit

impl CompositorHandler for ViewerApp {
    fn scale_factor_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_factor: i32,
    ) {
        debug!("scale factor changed");
    }

    fn transform_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_transform: wl_output::Transform,
    ) {
        debug!("transform changed");
    }

    fn frame(
        &mut self,
        _conn: &Connection,
        qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _time: u32,
    ) {
        if self.needs_redraw {
            self.draw(qh);
        }
    }

    fn surface_enter(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
    }

    fn surface_leave(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
    }
}

impl OutputHandler for ViewerApp {
    fn output_state(&mut self) -> &mut OutputState {
        &mut self.output_state
    }

    fn new_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _output: wl_output::WlOutput,
    ) {
        debug!("new output detected");
    }

    fn update_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _output: wl_output::WlOutput,
    ) {
        debug!("output updated");
    }

    fn output_destroyed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _output: wl_output::WlOutput,
    ) {
        debug!("output destroyed");
    }
}

impl WindowHandler for ViewerApp {
    fn request_close(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _window: &Window) {
        info!("close requested");
        self.should_exit = true;
    }

    fn configure(
        &mut self,
        _conn: &Connection,
        qh: &QueueHandle<Self>,
        _window: &Window,
        configure: WindowConfigure,
        _serial: u32,
    ) {
        debug!("window configured: {:?}", configure);

        // The logical viewport never resizes; only the surface does.
        let (logical_w, logical_h) = self.viewport.logical_size();
        let new_width = configure.new_size.0.map(|v| v.get()).unwrap_or(logical_w);
        let new_height = configure.new_size.1.map(|v| v.get()).unwrap_or(logical_h);
        if (new_width, new_height) != (self.width, self.height) {
            self.width = new_width;
            self.height = new_height;
            // Old shm buffers no longer fit
            self.pool = None;
        }

        let maximized = configure.state.contains(WindowState::MAXIMIZED);
        if maximized != self.maximized {
            self.maximized = maximized;
            if maximized {
                info!("window maximized");
            } else {
                info!("window restored");
            }
            self.persist_maximized();
        }
        self.fullscreen = configure.state.contains(WindowState::FULLSCREEN);

        self.configured = true;
        self.needs_redraw = true;

        if self.use_gpu && !self.gpu_initialized {
            self.init_gpu_renderer();
        }

        self.draw(qh);
    }
}

impl SeatHandler for ViewerApp {
    fn seat_state(&mut self) -> &mut SeatState {
        &mut self.seat_state
    }

    fn new_seat(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _seat: wl_seat::WlSeat) {
        debug!("new seat");
    }

    fn new_capability(
        &mut self,
        _conn: &Connection,
        qh: &QueueHandle<Self>,
        seat: wl_seat::WlSeat,
        capability: Capability,
    ) {
        debug!("new capability: {:?}", capability);

        if capability == Capability::Keyboard {
            if let Err(e) = self.seat_state.get_keyboard(qh, &seat, None) {
                error!("failed to get keyboard: {}", e);
            }
        }
        if capability == Capability::Pointer && self.themed_pointer.is_none() {
            let surface = self.compositor_state.create_surface(qh);
            match self.seat_state.get_pointer_with_theme(
                qh,
                &seat,
                self.shm.wl_shm(),
                surface,
                ThemeSpec::default(),
            ) {
                Ok(pointer) => self.themed_pointer = Some(pointer),
                Err(e) => error!("failed to get pointer: {}", e),
            }
        }
    }

    fn remove_capability(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _seat: wl_seat::WlSeat,
        _capability: Capability,
    ) {
        debug!("capability removed");
    }

    fn remove_seat(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _seat: wl_seat::WlSeat) {
        debug!("seat removed");
    }
}

impl KeyboardHandler for ViewerApp {
    fn enter(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _keyboard: &wl_keyboard::WlKeyboard,
        _surface: &wl_surface::WlSurface,
        _serial: u32,
        _raw: &[u32],
        _keysyms: &[Keysym],
    ) {
        debug!("keyboard entered surface");
    }

    fn leave(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _keyboard: &wl_keyboard::WlKeyboard,
        _surface: &wl_surface::WlSurface,
        _serial: u32,
    ) {
        debug!("keyboard left surface");
    }

    fn press_key(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _keyboard: &wl_keyboard::WlKeyboard,
        _serial: u32,
        event: KeyEvent,
    ) {
        debug!("key pressed: {:?}", event.keysym);

        if event.keysym == Keysym::F11 {
            if let Some(ref window) = self.window {
                if self.fullscreen {
                    info!("leaving fullscreen");
                    window.unset_fullscreen();
                } else {
                    info!("entering fullscreen");
                    window.set_fullscreen(None);
                }
            }
        } else if event.keysym == Keysym::Escape {
            // Escape only leaves fullscreen; it never closes the window
            if self.fullscreen {
                if let Some(ref window) = self.window {
                    info!("leaving fullscreen");
                    window.unset_fullscreen();
                }
            }
        }
    }

    fn release_key(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _keyboard: &wl_keyboard::WlKeyboard,
        _serial: u32,
        _event: KeyEvent,
    ) {
    }

    fn update_modifiers(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _keyboard: &wl_keyboard::WlKeyboard,
        _serial: u32,
        _modifiers: Modifiers,
        _layout: u32,
    ) {
    }
}

impl PointerHandler for ViewerApp {
    fn pointer_frame(
        &mut self,
        conn: &Connection,
        qh: &QueueHandle<Self>,
        _pointer: &wl_pointer::WlPointer,
        events: &[PointerEvent],
    ) {
        for event in events {
            match event.kind {
                PointerEventKind::Enter { serial } => {
                    debug!("pointer entered");
                    self.pointer_enter_serial = Some(serial);
                    self.pointer_pos = event.position;
                }
                PointerEventKind::Leave { .. } => {
                    debug!("pointer left");
                    if self.dragging {
                        self.dragging = false;
                        self.show_cursor(conn);
                    }
                }
                PointerEventKind::Motion { .. } => {
                    let (x, y) = event.position;
                    let (dx, dy) = (x - self.pointer_pos.0, y - self.pointer_pos.1);
                    self.pointer_pos = (x, y);

                    if self.dragging {
                        let scale = self.logical_scale();
                        self.viewport
                            .pan(dx as f32 / scale, dy as f32 / scale);
                        debug!("pan offset: {:?}", self.viewport.pan_offset());
                        self.needs_redraw = true;
                        self.draw(qh);
                    }
                }
                PointerEventKind::Press { button, .. } => {
                    if button == BTN_LEFT {
                        self.dragging = true;
                        self.hide_cursor();
                    }
                }
                PointerEventKind::Release { button, .. } => {
                    if button == BTN_LEFT && self.dragging {
                        self.dragging = false;
                        self.show_cursor(conn);
                    }
                }
                PointerEventKind::Axis { vertical, .. } => {
                    // Wayland's positive vertical axis is a scroll down; the
                    // viewport math uses the wheel convention (up = +1).
                    let notches = if vertical.discrete != 0 {
                        -vertical.discrete as f32
                    } else if vertical.absolute != 0.0 {
                        -(vertical.absolute.signum() as f32)
                    } else {
                        0.0
                    };

                    if notches != 0.0 {
                        self.viewport.wheel_zoom(notches);
                        debug!("zoom factor now {:.3}", self.viewport.zoom());
                        self.needs_redraw = true;
                        self.draw(qh);
                    }
                }
            }
        }
    }
}

impl ShmHandler for ViewerApp {
    fn shm_state(&mut self) -> &mut Shm {
        &mut self.shm
    }
}

impl ProvidesRegistryState for ViewerApp {
    fn registry(&mut self) -> &mut RegistryState {
        &mut self.registry_state
    }

    registry_handlers![OutputState, SeatState];
}

// Delegate macros
delegate_compositor!(ViewerApp);
delegate_output!(ViewerApp);
delegate_xdg_shell!(ViewerApp);
delegate_xdg_window!(ViewerApp);
delegate_seat!(ViewerApp);
delegate_keyboard!(ViewerApp);
delegate_pointer!(ViewerApp);
delegate_shm!(ViewerApp);
delegate_registry!(ViewerApp);

/// Run the viewer until the window is closed.
pub fn run(image: ImageData, args: &ViewerArgs) -> Result<()> {
    info!("connecting to Wayland display");

    let conn = Connection::connect_to_env().context("Failed to connect to Wayland display")?;

    let (globals, mut event_queue) =
        registry_queue_init(&conn).context("Failed to initialize registry")?;
    let qh = event_queue.handle();

    let compositor_state =
        CompositorState::bind(&globals, &qh).context("Failed to bind compositor")?;
    let xdg_shell = XdgShell::bind(&globals, &qh).context("Failed to bind xdg shell")?;
    let shm = Shm::bind(&globals, &qh).context("Failed to bind shm")?;

    // Get the display pointer for GPU rendering
    let display_ptr = conn.backend().display_ptr() as *mut std::ffi::c_void;

    // Read once, before the window is mapped
    let session_dir = session::install_dir();
    let start_maximized = session_dir
        .as_deref()
        .map(session::load_maximized)
        .unwrap_or(false);

    let viewport = Viewport::for_image(image.width, image.height);
    let (image_w, image_h) = viewport.image_size();
    let title = format!("{} | {}x{}", args.source.label(), image_w, image_h);

    let mut app = ViewerApp::new(
        RegistryState::new(&globals),
        SeatState::new(&globals, &qh),
        OutputState::new(&globals, &qh),
        shm,
        compositor_state,
        xdg_shell,
        display_ptr,
        image,
        viewport,
        session_dir,
        args.use_gpu,
    );

    let surface = app.compositor_state.create_surface(&qh);
    let window = app
        .xdg_shell
        .create_window(surface, WindowDecorations::RequestServer, &qh);
    window.set_title(title);
    window.set_app_id("rview");
    window.set_min_size(Some(MIN_WINDOW_SIZE));
    if start_maximized {
        info!("auto-maximizing window");
        window.set_maximized();
    } else {
        debug!("not auto-maximizing window");
    }

    // Commit the surface to trigger the first configure
    window.commit();

    app.window = Some(window);

    info!("starting event loop (GPU: {})", args.use_gpu);
    info!("controls: scroll to zoom, drag to pan, F11 fullscreen, Esc leaves fullscreen");

    // Main event loop
    loop {
        event_queue.blocking_dispatch(&mut app)?;

        if app.should_exit {
            info!("exiting");
            break;
        }
    }

    app.persist_maximized();

    Ok(())
}
