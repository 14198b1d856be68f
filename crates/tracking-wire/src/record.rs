use crate::{Quaternion, Vector3};

/// A fixed-layout record with a known byte size.
///
/// `read` is handed a reader over exactly `SIZE` bytes; `write` must append exactly
/// `SIZE` bytes.
pub trait Record: Sized + Copy + Default {
    const NAME: &'static str;
    const SIZE: usize;

    fn read(r: &mut FieldReader<'_>) -> Self;

    fn write(&self, w: &mut FieldWriter<'_>);
}

/// Sequential little-endian field reader. Reads past the end yield zeroes.
pub struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        if let Some(src) = self.bytes.get(self.pos..self.pos.saturating_add(N)) {
            out.copy_from_slice(src);
        }
        self.pos = self.pos.saturating_add(N);
        out
    }

    pub fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    pub fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    pub fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    pub fn i64(&mut self) -> i64 {
        i64::from_le_bytes(self.take())
    }

    pub fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }

    pub fn vector3(&mut self) -> Vector3 {
        Vector3 {
            x: self.f32(),
            y: self.f32(),
            z: self.f32(),
        }
    }

    pub fn quaternion(&mut self) -> Quaternion {
        Quaternion {
            x: self.f32(),
            y: self.f32(),
            z: self.f32(),
            w: self.f32(),
        }
    }
}

/// Appending little-endian field writer.
pub struct FieldWriter<'a> {
    out: &'a mut Vec<u8>,
}

impl<'a> FieldWriter<'a> {
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        Self { out }
    }

    pub fn u32(&mut self, v: u32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i64(&mut self, v: i64) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    pub fn f32(&mut self, v: f32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    pub fn vector3(&mut self, v: Vector3) {
        self.f32(v.x);
        self.f32(v.y);
        self.f32(v.z);
    }

    pub fn quaternion(&mut self, q: Quaternion) {
        self.f32(q.x);
        self.f32(q.y);
        self.f32(q.z);
        self.f32(q.w);
    }
}

impl Record for u32 {
    const NAME: &'static str = "u32";
    const SIZE: usize = 4;

    fn read(r: &mut FieldReader<'_>) -> Self {
        r.u32()
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.u32(*self);
    }
}

impl Record for Vector3 {
    const NAME: &'static str = "Vector3";
    const SIZE: usize = 12;

    fn read(r: &mut FieldReader<'_>) -> Self {
        r.vector3()
    }

    fn write(&self, w: &mut FieldWriter<'_>) {
        w.vector3(*self);
    }
}
