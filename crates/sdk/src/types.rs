//! Raw IL2CPP and Unity types
//!
//! Everything the host hands us is opaque: these types exist so pointers
//! into the game's heap carry *which kind* of object they claim to be, not
//! so we can dereference them directly. Lifetime is owned entirely by the
//! host; any pointer may go stale at any instant.

use std::ffi::c_void;
use std::fmt;
use std::ops::{Add, Mul, Sub};

/// Opaque IL2CPP application domain.
#[repr(C)]
pub struct Il2CppDomain {
    _opaque: [u8; 0],
}

/// Opaque IL2CPP assembly.
#[repr(C)]
pub struct Il2CppAssembly {
    _opaque: [u8; 0],
}

/// Opaque IL2CPP image (one per assembly).
#[repr(C)]
pub struct Il2CppImage {
    _opaque: [u8; 0],
}

/// Opaque IL2CPP class descriptor.
#[repr(C)]
pub struct Il2CppClass {
    _opaque: [u8; 0],
}

/// IL2CPP method descriptor.
///
/// Only the first field is relied upon: the JIT-compiled entry point sits at
/// offset 0 in every IL2CPP version this targets.
#[repr(C)]
pub struct MethodInfo {
    /// Native entry point of the compiled method body.
    pub method_pointer: *const c_void,
    _opaque: [u8; 0],
}

/// Managed `System.String`. Opaque; created through `il2cpp_string_new`.
#[repr(C)]
pub struct Il2CppString {
    _opaque: [u8; 0],
}

/// `UnityEngine.GameObject` instance in the host heap.
#[repr(C)]
pub struct GameObject {
    _opaque: [u8; 0],
}

/// `UnityEngine.Component` (or any subclass) instance in the host heap.
#[repr(C)]
pub struct Component {
    _opaque: [u8; 0],
}

/// `UnityEngine.Transform` instance in the host heap.
#[repr(C)]
pub struct Transform {
    _opaque: [u8; 0],
}

/// `UnityEngine.Camera` instance in the host heap.
#[repr(C)]
pub struct Camera {
    _opaque: [u8; 0],
}

/// A resolved foreign function entry point.
///
/// Wraps the raw pointer so it can live in `Send + Sync` containers; the
/// pointer itself is only ever *called* through the core accessor, which
/// re-validates it first.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ForeignFn(pub *const c_void);

// SAFETY: the pointer is an immutable code address resolved once at startup;
// it is never written through and never freed by us.
unsafe impl Send for ForeignFn {}
unsafe impl Sync for ForeignFn {}

impl ForeignFn {
    pub const fn null() -> Self {
        ForeignFn(std::ptr::null())
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    pub fn addr(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ForeignFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignFn({:#x})", self.0 as usize)
    }
}

/// `UnityEngine.Vector3`, blittable across the runtime boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3::new(0.0, 0.0, 0.0);
    pub const FORWARD: Vector3 = Vector3::new(0.0, 0.0, 1.0);
    pub const RIGHT: Vector3 = Vector3::new(1.0, 0.0, 0.0);
    pub const UP: Vector3 = Vector3::new(0.0, 1.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Vector3 { x, y, z }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn distance(&self, other: &Vector3) -> f32 {
        (*self - *other).length()
    }

    /// Normalized copy; zero-length vectors come back unchanged.
    pub fn normalized(&self) -> Vector3 {
        let len = self.length();
        if len <= f32::EPSILON {
            *self
        } else {
            *self * (1.0 / len)
        }
    }
}

impl Add for Vector3 {
    type Output = Vector3;
    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Vector3;
    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vector3 {
    type Output = Vector3;
    fn mul(self, rhs: f32) -> Vector3 {
        Vector3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_arithmetic() {
        let a = Vector3::new(1.0, 2.0, 3.0);
        let b = Vector3::new(4.0, 5.0, 6.0);
        assert_eq!(a + b, Vector3::new(5.0, 7.0, 9.0));
        assert_eq!(b - a, Vector3::new(3.0, 3.0, 3.0));
        assert_eq!(a * 2.0, Vector3::new(2.0, 4.0, 6.0));
    }

    #[test]
    fn test_vector_distance() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(3.0, 4.0, 0.0);
        assert_eq!(a.distance(&b), 5.0);
    }

    #[test]
    fn test_normalize_zero_is_identity() {
        let z = Vector3::ZERO;
        assert_eq!(z.normalized(), z);
    }

    #[test]
    fn test_foreign_fn_null() {
        let f = ForeignFn::null();
        assert!(f.is_null());
        assert_eq!(f.addr(), 0);
    }
}
