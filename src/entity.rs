//! Drawable scene objects.

use std::cell::RefCell;
use std::rc::Rc;

use crate::camera::Camera;
use crate::gpu::RenderBackend;
use crate::material::Material;
use crate::mesh::Mesh;
use crate::transform::Transform;

/// A mesh placed in the world with a material.
///
/// The mesh and material are shared handles; the transform belongs to this
/// entity alone.
#[derive(Debug, Clone)]
pub struct Entity {
    pub transform: Transform,
    mesh: Rc<Mesh>,
    material: Rc<RefCell<Material>>,
}

impl Entity {
    pub fn new(mesh: Rc<Mesh>, material: Rc<RefCell<Material>>) -> Self {
        Self {
            transform: Transform::new(),
            mesh,
            material,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn mesh(&self) -> &Rc<Mesh> {
        &self.mesh
    }

    pub fn material(&self) -> &Rc<RefCell<Material>> {
        &self.material
    }

    pub fn set_material(&mut self, material: Rc<RefCell<Material>>) {
        self.material = material;
    }

    /// Bind the material, upload this entity's uniforms and draw the mesh.
    ///
    /// Frame-wide values (lights, shadow data) must already be staged on the
    /// material's shaders; they are flushed together with the per-entity ones.
    /// Shader and resource bindings are left as this draw set them.
    pub fn draw(&self, backend: &mut dyn RenderBackend, camera: &Camera, total_time: f32) {
        let material = self.material.borrow();
        material.bind(backend);

        let vs = material.vertex_shader();
        vs.set_matrix4x4("world", self.transform.world_matrix());
        vs.set_matrix4x4(
            "world_inverse_transpose",
            self.transform.world_inverse_transpose_matrix(),
        );
        vs.set_matrix4x4("view", camera.view_matrix());
        vs.set_matrix4x4("projection", camera.projection_matrix());

        let ps = material.pixel_shader();
        ps.set_float4("color_tint", material.color_tint);
        ps.set_float2("uv_scale", material.uv_scale);
        ps.set_float2("uv_offset", material.uv_offset);
        ps.set_float("roughness", material.roughness);
        ps.set_float3("camera_position", camera.position());
        ps.set_float("time", total_time);

        vs.copy_all_buffer_data(backend);
        ps.copy_all_buffer_data(backend);

        self.mesh.draw(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraSettings;
    use crate::gpu::{HeadlessBackend, RecordedCommand};
    use crate::shader::Shader;
    use crate::shaders;
    use glam::{Vec3, Vec4};

    fn lit_material(backend: &mut HeadlessBackend) -> Rc<RefCell<Material>> {
        let vs = Rc::new(Shader::new(backend, shaders::lit_vertex()).unwrap());
        let ps = Rc::new(Shader::new(backend, shaders::lit_pixel()).unwrap());
        Material::new(vs, ps).shared()
    }

    #[test]
    fn draw_uploads_both_stages_then_draws() {
        let mut backend = HeadlessBackend::new(32, 32);
        let mesh = Rc::new(Mesh::cube(&mut backend).unwrap());
        let material = lit_material(&mut backend);
        let mut entity = Entity::new(mesh, material.clone());
        entity.transform.set_position(Vec3::new(1.0, 2.0, 3.0));
        let camera = Camera::new(Vec3::new(0.0, 0.0, -4.0), 1.0, CameraSettings::default());
        backend.clear_commands();

        entity.draw(&mut backend, &camera, 2.5);

        let material = material.borrow();
        let vs = material.vertex_shader();
        assert_eq!(
            vs.read_matrix4x4("world"),
            Some(entity.transform.world_matrix())
        );
        assert_eq!(vs.read_matrix4x4("view"), Some(camera.view_matrix()));
        assert_eq!(
            material.pixel_shader().read_data("time"),
            Some(2.5f32.to_ne_bytes().to_vec())
        );

        let commands = backend.commands();
        let uploads = commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::SetUniforms { .. }))
            .count();
        assert_eq!(uploads, 2);
        assert!(matches!(
            commands.last(),
            Some(RecordedCommand::Draw { count: 36, .. })
        ));
    }

    #[test]
    fn shared_material_edits_reach_every_entity() {
        let mut backend = HeadlessBackend::new(32, 32);
        let mesh = Rc::new(Mesh::cube(&mut backend).unwrap());
        let material = lit_material(&mut backend);
        let a = Entity::new(mesh.clone(), material.clone());
        let b = Entity::new(mesh, material.clone());

        material.borrow_mut().color_tint = Vec4::new(1.0, 0.0, 0.0, 1.0);

        assert_eq!(a.material().borrow().color_tint, b.material().borrow().color_tint);
        assert!(Rc::ptr_eq(a.mesh(), b.mesh()));
    }
}
