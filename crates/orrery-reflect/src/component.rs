//! Component layout metadata attached to class definitions.
//!
//! Only classes that opt in through [`ClassBuilder::component`] may be laid
//! out in archetypes. The layout records `size`/`align` of the Rust type, its
//! default value as bytes, and a type-erased byte codec built on `bytemuck`:
//! values are written with `bytes_of` (requires `NoUninit`) and read back with
//! a validated unaligned read (requires `CheckedBitPattern`), so component
//! storage is a plain byte arena addressed by offsets.
//!
//! [`ClassBuilder::component`]: crate::definition::ClassBuilder::component

use std::any::Any;
use std::fmt;

use bytemuck::{CheckedBitPattern, NoUninit};

use crate::ReflectError;

type DecodeFn = Box<dyn Fn(&[u8]) -> Result<Box<dyn Any + Send>, ReflectError> + Send + Sync>;
type EncodeFn = Box<dyn Fn(&dyn Any, &mut [u8]) -> Result<(), ReflectError> + Send + Sync>;

// ---------------------------------------------------------------------------
// ComponentLayout
// ---------------------------------------------------------------------------

/// Size, alignment and byte codec of a component type.
pub struct ComponentLayout {
    /// `std::mem::size_of::<T>()`
    pub size: usize,
    /// `std::mem::align_of::<T>()`
    pub align: usize,
    /// Bytes of `T::default()`.
    pub default_bytes: Vec<u8>,
    decode: DecodeFn,
    encode: EncodeFn,
}

impl fmt::Debug for ComponentLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentLayout")
            .field("size", &self.size)
            .field("align", &self.align)
            .field("default_bytes", &self.default_bytes)
            .finish_non_exhaustive()
    }
}

impl ComponentLayout {
    /// Layout and codec for `T`. `name` is used in error messages.
    pub fn of<T>(name: &str) -> Self
    where
        T: NoUninit + CheckedBitPattern + Default + Send + 'static,
    {
        let decode_name = name.to_owned();
        let encode_name = name.to_owned();
        Self {
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            default_bytes: bytemuck::bytes_of(&T::default()).to_vec(),
            decode: Box::new(move |bytes: &[u8]| -> Result<Box<dyn Any + Send>, ReflectError> {
                let value: T = bytemuck::checked::try_pod_read_unaligned(bytes).map_err(|e| {
                    ReflectError::ComponentBytes {
                        component: decode_name.clone(),
                        details: e.to_string(),
                    }
                })?;
                Ok(Box::new(value) as Box<dyn Any + Send>)
            }),
            encode: Box::new(move |value: &dyn Any, out: &mut [u8]| -> Result<(), ReflectError> {
                let value = value.downcast_ref::<T>().ok_or_else(|| ReflectError::TypeMismatch {
                    expected: encode_name.clone(),
                    found: "another type".to_owned(),
                })?;
                write_bytes(&encode_name, bytemuck::bytes_of(value), out)
            }),
        }
    }

    /// Decode `bytes` into a boxed value of the component type.
    pub fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Any + Send>, ReflectError> {
        (self.decode)(bytes)
    }

    /// Encode a value of the component type into `out`.
    pub fn encode(&self, value: &dyn Any, out: &mut [u8]) -> Result<(), ReflectError> {
        (self.encode)(value, out)
    }
}

fn write_bytes(name: &str, src: &[u8], out: &mut [u8]) -> Result<(), ReflectError> {
    if src.is_empty() {
        return Ok(());
    }
    if out.len() != src.len() {
        return Err(ReflectError::ComponentBytes {
            component: name.to_owned(),
            details: format!("expected {} bytes, got {}", src.len(), out.len()),
        });
    }
    out.copy_from_slice(src);
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Debug, Default, Clone, Copy, PartialEq, bytemuck_derive::Pod, bytemuck_derive::Zeroable)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[repr(C)]
    #[derive(
        Debug,
        Default,
        Clone,
        Copy,
        PartialEq,
        bytemuck_derive::NoUninit,
        bytemuck_derive::CheckedBitPattern,
    )]
    struct Flag {
        on: bool,
    }

    #[test]
    fn size_and_align_match_rust_layout() {
        let pos = ComponentLayout::of::<Position>("Position");
        assert_eq!((pos.size, pos.align), (8, 4));
        assert_eq!(pos.default_bytes, vec![0u8; 8]);

        let flag = ComponentLayout::of::<Flag>("Flag");
        assert_eq!((flag.size, flag.align), (1, 1));
    }

    #[test]
    fn encode_then_decode_unaligned() {
        let layout = ComponentLayout::of::<Position>("Position");
        // Offset by one byte so the read is unaligned.
        let mut arena = vec![0u8; 9];
        layout
            .encode(&Position { x: 1.5, y: -2.0 }, &mut arena[1..])
            .unwrap();
        let decoded = layout.decode(&arena[1..]).unwrap();
        assert_eq!(
            decoded.downcast_ref::<Position>(),
            Some(&Position { x: 1.5, y: -2.0 })
        );
    }

    #[test]
    fn invalid_bit_pattern_rejected() {
        let layout = ComponentLayout::of::<Flag>("Flag");
        let err = layout.decode(&[2]).unwrap_err();
        assert!(matches!(err, ReflectError::ComponentBytes { .. }));
        assert!(layout.decode(&[1]).is_ok());
    }

    #[test]
    fn wrong_value_type_rejected() {
        let layout = ComponentLayout::of::<Flag>("Flag");
        let mut out = [0u8; 1];
        assert!(matches!(
            layout.encode(&Position::default(), &mut out),
            Err(ReflectError::TypeMismatch { .. })
        ));
    }
}
