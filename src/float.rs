use std::fmt::{Debug, Display};

use num_traits::{Float as NumFloat, FloatConst, FromPrimitive};

/// Primitive floating-point types a [`Dual`](crate::Dual) can be built on.
///
/// Records and estimates are always `f64`; the trait keeps [`Dual`](crate::Dual)
/// generic over its primal type.
pub trait Float:
    NumFloat + FloatConst + FromPrimitive + Copy + Send + Sync + Default + Debug + Display + 'static
{
}

impl Float for f64 {}
