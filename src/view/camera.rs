use super::{viewports, DisplayMode, Viewport};
use glam::{Mat4, Vec3};
use winit::dpi::PhysicalPosition;
use winit::event::{ElementState, MouseButton, MouseScrollDelta};

/// Degrees per dragged pixel.
const ROTATE_SPEED: f32 = 0.5;
/// Translation units per dragged pixel.
const PAN_SPEED: f32 = 0.05;
const ZOOM_IN: f32 = 0.9;
const ZOOM_OUT: f32 = 1.1;
/// Closer than this and co-located fragments collapse onto one depth.
const MIN_RADIUS: f32 = 2.0;
const MAX_RADIUS: f32 = 1000.0;
/// Y rotation added to the secondary viewport of a stereo pair.
pub const STEREO_BIAS_DEGREES: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationAxis {
    X,
    Y,
    Z,
}

/// Matrices for one viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewMatrices {
    pub viewport: Viewport,
    pub projection: Mat4,
    pub model_view: Mat4,
}

impl ViewMatrices {
    pub fn mvp(&self) -> Mat4 {
        self.projection * self.model_view
    }
}

fn wrap_degrees(angle: f32) -> f32 {
    if angle >= 360.0 {
        angle - 360.0
    } else if angle <= -360.0 {
        angle + 360.0
    } else {
        angle
    }
}

/// Orbit-style view of the anatomy: Euler rotation about the fitted centre,
/// translation, zoom radius and an animated spin angle about Y.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewTransform {
    /// Rotations in degrees.
    pub rot_x: f32,
    pub rot_y: f32,
    pub rot_z: f32,
    pub translation: Vec3,
    pub radius: f32,
    /// Spin animation angle in degrees.
    pub angle: f32,
    /// Perspective field of view in degrees.
    pub fov: f32,
    pub orthographic: bool,
    center: Vec3,
    fitted_radius: f32,

    left_down: bool,
    right_down: bool,
    last_mouse_pos: Option<PhysicalPosition<f64>>,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewTransform {
    pub fn new() -> Self {
        Self {
            rot_x: 0.0,
            rot_y: 0.0,
            rot_z: 0.0,
            translation: Vec3::ZERO,
            radius: 10.0,
            angle: 0.0,
            fov: 20.0,
            orthographic: true,
            center: Vec3::ZERO,
            fitted_radius: 10.0,
            left_down: false,
            right_down: false,
            last_mouse_pos: None,
        }
    }

    /// Centre the scene on `bounds` and size the radius to half its diagonal.
    pub fn fit(&mut self, bounds: (Vec3, Vec3)) {
        let (lo, hi) = bounds;
        self.center = (lo + hi) * 0.5;
        self.fitted_radius = ((hi - lo).length() * 0.5).max(MIN_RADIUS);
        self.radius = self.fitted_radius;
        log::debug!("View fitted: centre {:?}, radius {:.2}", self.center, self.radius);
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn fitted_radius(&self) -> f32 {
        self.fitted_radius
    }

    pub fn reset(&mut self) {
        self.rot_x = 0.0;
        self.rot_y = 0.0;
        self.rot_z = 0.0;
        self.translation = Vec3::ZERO;
        self.angle = 0.0;
        self.radius = self.fitted_radius;
    }

    /// Quarter turn about one axis.
    pub fn rotate_90(&mut self, axis: RotationAxis) {
        match axis {
            RotationAxis::X => self.rot_x = wrap_degrees(self.rot_x + 90.0),
            RotationAxis::Y => self.rot_y = wrap_degrees(self.rot_y + 90.0),
            RotationAxis::Z => self.rot_z = wrap_degrees(self.rot_z + 90.0),
        }
    }

    /// Advance the spin angle, restarting from zero after a full turn.
    pub fn advance_spin(&mut self, step: f32) {
        self.angle += step;
        if self.angle >= 360.0 || self.angle <= -360.0 {
            self.angle = 0.0;
        }
    }

    pub fn zoom(&mut self, zoom_in: bool) {
        if zoom_in {
            self.radius = (self.radius * ZOOM_IN).max(MIN_RADIUS);
        } else if self.radius < MAX_RADIUS {
            self.radius *= ZOOM_OUT;
        }
    }

    /// Apply a mouse drag of (dx, dy) pixels with the given buttons held.
    /// Returns true when the view changed.
    pub fn drag(&mut self, dx: f32, dy: f32, left: bool, right: bool) -> bool {
        match (left, right) {
            (true, true) => {
                self.rot_z = wrap_degrees(self.rot_z + ROTATE_SPEED * dx);
            }
            (true, false) => {
                self.rot_x = wrap_degrees(self.rot_x + ROTATE_SPEED * dy);
                self.rot_y = wrap_degrees(self.rot_y + ROTATE_SPEED * dx);
            }
            (false, true) => {
                self.translation.x += PAN_SPEED * dx;
                self.translation.y -= PAN_SPEED * dy;
            }
            (false, false) => return false,
        }
        true
    }

    pub fn handle_mouse_button(&mut self, button: MouseButton, state: ElementState) {
        let pressed = state == ElementState::Pressed;
        match button {
            MouseButton::Left => self.left_down = pressed,
            MouseButton::Right => self.right_down = pressed,
            _ => {}
        }
        if !self.left_down && !self.right_down {
            self.last_mouse_pos = None;
        }
    }

    /// Returns true when the view changed.
    pub fn handle_mouse_move(&mut self, position: PhysicalPosition<f64>) -> bool {
        let changed = match self.last_mouse_pos {
            Some(last) => self.drag(
                (position.x - last.x) as f32,
                (position.y - last.y) as f32,
                self.left_down,
                self.right_down,
            ),
            None => false,
        };
        if self.left_down || self.right_down {
            self.last_mouse_pos = Some(position);
        }
        changed
    }

    pub fn handle_scroll(&mut self, delta: MouseScrollDelta) {
        let amount = match delta {
            MouseScrollDelta::LineDelta(_, y) => y,
            MouseScrollDelta::PixelDelta(pos) => pos.y as f32,
        };
        if amount != 0.0 {
            self.zoom(amount > 0.0);
        }
    }

    pub fn projection(&self, viewport: &Viewport) -> Mat4 {
        let r = self.radius;
        let aspect = viewport.aspect();
        if self.orthographic {
            let zd = 2.0 * r;
            let near = (zd - r) - 10.0;
            let far = (zd + r) + 10.0;
            let (half_w, half_h) = if aspect >= 1.0 {
                (r * aspect, r)
            } else {
                (r, r / aspect)
            };
            Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, near, far)
        } else {
            Mat4::perspective_rh(self.fov.to_radians(), aspect, 0.1, 2.0 * r + 10.0)
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0 * self.radius))
    }

    /// Model matrix. The secondary viewport mirrors X translation and may
    /// add the stereo Y bias.
    pub fn model(&self, secondary: bool, stereo_bias: bool) -> Mat4 {
        let mut translation = self.translation;
        let mut rot_y = self.rot_y;
        if secondary {
            translation.x = -translation.x;
            if stereo_bias {
                rot_y = wrap_degrees(rot_y + STEREO_BIAS_DEGREES);
            }
        }
        Mat4::from_translation(translation)
            * Mat4::from_rotation_x(self.rot_x.to_radians())
            * Mat4::from_rotation_y((rot_y + self.angle).to_radians())
            * Mat4::from_rotation_z(self.rot_z.to_radians())
            * Mat4::from_translation(-self.center)
    }

    /// Matrices for every viewport of `mode` over a `width` x `height` surface.
    pub fn matrices(&self, mode: DisplayMode, width: u32, height: u32) -> Vec<ViewMatrices> {
        viewports(mode.viewport_count(), width, height)
            .into_iter()
            .enumerate()
            .map(|(i, viewport)| ViewMatrices {
                viewport,
                projection: self.projection(&viewport),
                model_view: self.view() * self.model(i > 0, mode.has_stereo_bias()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn test_fit_centres_scene() {
        let mut view = ViewTransform::new();
        view.fit((Vec3::new(-2.0, 0.0, 0.0), Vec3::new(4.0, 8.0, 0.0)));
        assert!(approx(view.center(), Vec3::new(1.0, 4.0, 0.0)));
        assert!((view.radius - 5.0).abs() < 1e-5);

        let centre = view.model(false, false).transform_point3(view.center());
        assert!(approx(centre, Vec3::ZERO));
    }

    #[test]
    fn test_drag_modes() {
        let mut view = ViewTransform::new();
        assert!(view.drag(10.0, 4.0, true, false));
        assert_eq!((view.rot_x, view.rot_y), (2.0, 5.0));

        view.drag(6.0, 0.0, true, true);
        assert_eq!(view.rot_z, 3.0);

        view.drag(20.0, 10.0, false, true);
        assert!(approx(view.translation, Vec3::new(1.0, -0.5, 0.0)));

        assert!(!view.drag(5.0, 5.0, false, false));
    }

    #[test]
    fn test_angles_wrap() {
        let mut view = ViewTransform::new();
        view.rot_y = 359.0;
        view.drag(4.0, 0.0, true, false);
        assert!((view.rot_y - 1.0).abs() < 1e-5);

        view.angle = 359.5;
        view.advance_spin(1.0);
        assert_eq!(view.angle, 0.0);
    }

    #[test]
    fn test_zoom_limits() {
        let mut view = ViewTransform::new();
        view.radius = 2.1;
        view.zoom(true);
        assert_eq!(view.radius, MIN_RADIUS);

        view.radius = 1001.0;
        view.zoom(false);
        assert_eq!(view.radius, 1001.0);
    }

    #[test]
    fn test_reset_restores_fit() {
        let mut view = ViewTransform::new();
        view.fit((Vec3::ZERO, Vec3::new(0.0, 0.0, 20.0)));
        view.rotate_90(RotationAxis::X);
        view.translation = Vec3::ONE;
        view.zoom(true);
        view.advance_spin(12.0);
        view.reset();
        assert_eq!(view.rot_x, 0.0);
        assert_eq!(view.translation, Vec3::ZERO);
        assert_eq!(view.angle, 0.0);
        assert_eq!(view.radius, 10.0);
    }

    #[test]
    fn test_stereo_bias_only_in_stereo_modes() {
        let mut view = ViewTransform::new();
        view.translation = Vec3::new(2.0, 0.0, 0.0);

        let pair = view.matrices(DisplayMode::CtlStimPair, 800, 600);
        let probe = Vec3::new(0.0, 0.0, 1.0);
        let left = pair[0].model_view.transform_point3(probe);
        let right = pair[1].model_view.transform_point3(probe);
        // Mirrored X translation only.
        assert!((left.x + right.x).abs() < 1e-4);
        assert!((left.z - right.z).abs() < 1e-4);

        let stereo = view.matrices(DisplayMode::ControlStereo, 800, 600);
        let biased = stereo[1].model_view.transform_point3(probe);
        assert!((biased.z - right.z).abs() > 1e-4);

        assert_eq!(view.matrices(DisplayMode::DeltaOnly, 800, 600).len(), 1);
    }

    #[test]
    fn test_projection_keeps_scene_in_depth_range() {
        let mut view = ViewTransform::new();
        view.fit((Vec3::splat(-5.0), Vec3::splat(5.0)));
        for orthographic in [true, false] {
            view.orthographic = orthographic;
            let m = &view.matrices(DisplayMode::ControlOnly, 640, 480)[0];
            let clip = m.mvp() * view.center().extend(1.0);
            let ndc_z = clip.z / clip.w;
            assert!((0.0..=1.0).contains(&ndc_z), "depth {ndc_z} out of range");
        }
    }
}
