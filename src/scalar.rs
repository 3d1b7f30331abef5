//! The closed set of element types that can live in a remote segment.
//!
//! Every element travels through the rings, reply buffers and cache as a raw `u64`
//! bit pattern; [RemoteScalar] is the only place that knows how to convert. The
//! arithmetic helpers give the remote atomics one generic implementation instead of a
//! table of per-type entry points.

mod private {
    pub trait Sealed {}
}

/// Tag identifying the concrete scalar type behind a [RemoteScalar].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    Isize,
    Usize,
    F32,
    F64,
}

impl ScalarKind {
    pub fn is_integer(&self) -> bool {
        !matches!(self, ScalarKind::F32 | ScalarKind::F64)
    }
}

/// An element type supported by remote access.
///
/// This trait is sealed; it is implemented for the primitive integer and floating point types.
/// Integer arithmetic wraps on overflow, matching the behavior of network atomics.
pub trait RemoteScalar:
    private::Sealed + Copy + Send + Sync + PartialEq + std::fmt::Debug + 'static
{
    const KIND: ScalarKind;

    fn to_bits(self) -> u64;
    fn from_bits(bits: u64) -> Self;

    fn zero() -> Self;
    fn one() -> Self;

    fn op_add(self, rhs: Self) -> Self;
    fn op_sub(self, rhs: Self) -> Self;
    fn op_mul(self, rhs: Self) -> Self;
    /// panics if `rhs` is zero for integer kinds
    fn op_div(self, rhs: Self) -> Self;
    /// panics if `rhs` is zero for integer kinds
    fn op_rem(self, rhs: Self) -> Self;
}

/// Integer kinds additionally support the bitwise and shift operations.
pub trait RemoteInteger: RemoteScalar {
    fn op_and(self, rhs: Self) -> Self;
    fn op_or(self, rhs: Self) -> Self;
    fn op_xor(self, rhs: Self) -> Self;
    fn op_shl(self, rhs: u32) -> Self;
    fn op_shr(self, rhs: u32) -> Self;
}

macro_rules! impl_remote_int {
    ($($t:ty => $kind:ident),* $(,)?) => {
        $(
            impl private::Sealed for $t {}

            impl RemoteScalar for $t {
                const KIND: ScalarKind = ScalarKind::$kind;

                #[inline(always)]
                fn to_bits(self) -> u64 {
                    // sign extension is undone by the truncating cast in from_bits
                    self as i128 as u64
                }
                #[inline(always)]
                fn from_bits(bits: u64) -> Self {
                    bits as $t
                }
                fn zero() -> Self {
                    0
                }
                fn one() -> Self {
                    1
                }
                fn op_add(self, rhs: Self) -> Self {
                    self.wrapping_add(rhs)
                }
                fn op_sub(self, rhs: Self) -> Self {
                    self.wrapping_sub(rhs)
                }
                fn op_mul(self, rhs: Self) -> Self {
                    self.wrapping_mul(rhs)
                }
                fn op_div(self, rhs: Self) -> Self {
                    self.wrapping_div(rhs)
                }
                fn op_rem(self, rhs: Self) -> Self {
                    self.wrapping_rem(rhs)
                }
            }

            impl RemoteInteger for $t {
                fn op_and(self, rhs: Self) -> Self {
                    self & rhs
                }
                fn op_or(self, rhs: Self) -> Self {
                    self | rhs
                }
                fn op_xor(self, rhs: Self) -> Self {
                    self ^ rhs
                }
                fn op_shl(self, rhs: u32) -> Self {
                    self.wrapping_shl(rhs)
                }
                fn op_shr(self, rhs: u32) -> Self {
                    self.wrapping_shr(rhs)
                }
            }
        )*
    };
}

macro_rules! impl_remote_float {
    ($($t:ty => $kind:ident, $bits:ty),* $(,)?) => {
        $(
            impl private::Sealed for $t {}

            impl RemoteScalar for $t {
                const KIND: ScalarKind = ScalarKind::$kind;

                #[inline(always)]
                fn to_bits(self) -> u64 {
                    <$t>::to_bits(self) as u64
                }
                #[inline(always)]
                fn from_bits(bits: u64) -> Self {
                    <$t>::from_bits(bits as $bits)
                }
                fn zero() -> Self {
                    0.0
                }
                fn one() -> Self {
                    1.0
                }
                fn op_add(self, rhs: Self) -> Self {
                    self + rhs
                }
                fn op_sub(self, rhs: Self) -> Self {
                    self - rhs
                }
                fn op_mul(self, rhs: Self) -> Self {
                    self * rhs
                }
                fn op_div(self, rhs: Self) -> Self {
                    self / rhs
                }
                fn op_rem(self, rhs: Self) -> Self {
                    self % rhs
                }
            }
        )*
    };
}

impl_remote_int!(
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    isize => Isize,
    usize => Usize,
);

impl_remote_float!(f32 => F32, u32, f64 => F64, u64);
