use glam::{Mat3, Mat4, Vec3};

/// Orbit camera around `target`, driven by mouse drags and scrolling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub target: Vec3,
    pub distance: f32,
    /// Elevation in degrees, clamped short of the poles.
    pub latitude: f32,
    /// Azimuth in degrees.
    pub longitude: f32,
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    pub aspect: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 2.0,
            latitude: 0.0,
            longitude: 0.0,
            fov_y: 45.0,
            near: 0.01,
            far: 100.0,
            aspect: 1.0,
        }
    }
}

impl Camera {
    pub fn position(&self) -> Vec3 {
        let lat = self.latitude.to_radians();
        let lon = self.longitude.to_radians();
        self.target
            + self.distance * Vec3::new(lat.cos() * lon.sin(), lat.sin(), lat.cos() * lon.cos())
    }

    /// Places the camera at `position`, keeping it aimed at the target.
    pub fn set_position(&mut self, position: Vec3) {
        let offset = position - self.target;
        let distance = offset.length();
        if distance <= f32::EPSILON {
            return;
        }
        self.distance = distance;
        self.latitude = (offset.y / distance).clamp(-1.0, 1.0).asin().to_degrees();
        self.longitude = offset.x.atan2(offset.z).to_degrees();
    }

    pub fn set_distance(&mut self, distance: f32) {
        self.distance = distance.max(self.near * 2.0);
    }

    pub fn orbit(&mut self, delta_longitude: f32, delta_latitude: f32) {
        self.longitude = (self.longitude + delta_longitude) % 360.0;
        self.latitude = (self.latitude + delta_latitude).clamp(-89.0, 89.0);
    }

    pub fn zoom(&mut self, steps: f32) {
        self.set_distance(self.distance * (1.0 - steps * 0.1).max(0.1));
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_y.to_radians(), self.aspect.max(1e-4), self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }

    pub fn normal_matrix(&self) -> Mat3 {
        Mat3::from_mat4(self.view()).inverse().transpose()
    }
}
