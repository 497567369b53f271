//! Typed access to host game objects
//!
//! Thin wrappers that pair the SDK's pre-bound entry points with the safe
//! accessor in [`crate::memory`]. Feature modules talk to the game only
//! through this surface; raw `call*`/`read`/`write` never appear in module
//! code.
//!
//! Returned handles are host-owned and may go stale at any time. A fault on
//! a cached handle means "drop the cache and relocate", not "crash".

use std::ffi::c_void;

use grimoire_sdk::{Camera, Component, GameObject, Runtime, Transform, Vector3};

use crate::memory::{self, MemoryResult};

/// Unity `Camera.MonoOrStereoscopicEye.Mono`.
const EYE_MONO: i32 = 2;

pub struct Foreign<'a> {
    runtime: &'a Runtime,
}

impl<'a> Foreign<'a> {
    pub fn new(runtime: &'a Runtime) -> Self {
        Foreign { runtime }
    }

    pub fn runtime(&self) -> &Runtime {
        self.runtime
    }

    /// `GameObject.Find(name)`; `Ok(None)` when no object matches.
    pub fn find_game_object(&self, name: &str) -> MemoryResult<Option<*mut GameObject>> {
        let managed = self.runtime.new_string(name);
        if managed.is_null() {
            return Ok(None);
        }
        let found: *mut GameObject =
            unsafe { memory::call1(self.runtime.game_object_find, managed)? };
        Ok((!found.is_null()).then_some(found))
    }

    /// `GameObject.GetComponent(typeName)` via the string overload.
    pub fn get_component(
        &self,
        object: *mut GameObject,
        type_name: &str,
    ) -> MemoryResult<Option<*mut Component>> {
        let managed = self.runtime.new_string(type_name);
        if managed.is_null() {
            return Ok(None);
        }
        let component: *mut Component =
            unsafe { memory::call2(self.runtime.game_object_get_component, object, managed)? };
        Ok((!component.is_null()).then_some(component))
    }

    pub fn is_active(&self, object: *mut GameObject) -> MemoryResult<bool> {
        unsafe { memory::call1(self.runtime.game_object_get_active, object) }
    }

    pub fn object_transform(&self, object: *mut GameObject) -> MemoryResult<Option<*mut Transform>> {
        let t: *mut Transform =
            unsafe { memory::call1(self.runtime.game_object_get_transform, object)? };
        Ok((!t.is_null()).then_some(t))
    }

    pub fn component_transform(
        &self,
        component: *mut Component,
    ) -> MemoryResult<Option<*mut Transform>> {
        let t: *mut Transform =
            unsafe { memory::call1(self.runtime.component_get_transform, component)? };
        Ok((!t.is_null()).then_some(t))
    }

    pub fn position(&self, transform: *mut Transform) -> MemoryResult<Vector3> {
        let mut out = Vector3::ZERO;
        unsafe {
            memory::call2::<_, _, ()>(self.runtime.transform_get_position, transform, &mut out)?;
        }
        Ok(out)
    }

    pub fn set_position(&self, transform: *mut Transform, position: Vector3) -> MemoryResult<()> {
        unsafe {
            memory::call2::<_, _, ()>(self.runtime.transform_set_position, transform, &position)
        }
    }

    /// Rotate a local-space direction into world space.
    pub fn transform_direction(
        &self,
        transform: *mut Transform,
        local: Vector3,
    ) -> MemoryResult<Vector3> {
        let mut out = Vector3::ZERO;
        unsafe {
            memory::call3::<_, _, _, ()>(
                self.runtime.transform_direction,
                transform,
                &local,
                &mut out,
            )?;
        }
        Ok(out)
    }

    pub fn main_camera(&self) -> MemoryResult<Option<*mut Camera>> {
        let camera: *mut Camera = unsafe { memory::call0(self.runtime.camera_get_main)? };
        Ok((!camera.is_null()).then_some(camera))
    }

    /// World-space point to screen coordinates. `z <= 0` means behind the
    /// camera.
    pub fn world_to_screen(&self, camera: *mut Camera, world: Vector3) -> MemoryResult<Vector3> {
        let mut out = Vector3::ZERO;
        unsafe {
            memory::call4::<_, _, _, _, ()>(
                self.runtime.camera_world_to_screen,
                camera,
                &world,
                EYE_MONO,
                &mut out,
            )?;
        }
        Ok(out)
    }

    /// `Behaviour.set_enabled` on any behaviour-derived component.
    pub fn set_behaviour_enabled(
        &self,
        component: *mut Component,
        enabled: bool,
    ) -> MemoryResult<()> {
        unsafe {
            memory::call2::<_, _, ()>(self.runtime.behaviour_set_enabled, component, enabled)
        }
    }

    /// Read an object reference embedded at a known field offset.
    pub fn object_field(
        &self,
        component: *mut Component,
        offset: usize,
    ) -> MemoryResult<Option<*mut GameObject>> {
        let object: *mut GameObject = memory::read(component as *const c_void, offset)?;
        Ok((!object.is_null()).then_some(object))
    }

    pub fn read_flag(&self, component: *mut Component, offset: usize) -> MemoryResult<bool> {
        let raw: u8 = memory::read(component as *const c_void, offset)?;
        Ok(raw != 0)
    }

    pub fn write_flag(
        &self,
        component: *mut Component,
        offset: usize,
        value: bool,
    ) -> MemoryResult<()> {
        memory::write::<u8>(component as *const c_void, offset, value as u8)
    }
}
