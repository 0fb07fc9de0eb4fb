//! Parallel/sequential execution switch.
//!
//! The `cfg` logic for the `parallel` feature lives here so call sites stay
//! the same either way. `force_sequential` keeps execution on the calling
//! thread even when rayon is compiled in.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Map `f` over `slice`, preserving input order in the output.
#[inline]
pub fn map_slice<T, F, R>(slice: &[T], f: F, force_sequential: bool) -> Vec<R>
where
    T: Sync,
    F: Fn(&T) -> R + Sync + Send,
    R: Send,
{
    #[cfg(feature = "parallel")]
    {
        if force_sequential {
            slice.iter().map(f).collect()
        } else {
            slice.par_iter().map(f).collect()
        }
    }

    #[cfg(not(feature = "parallel"))]
    {
        let _ = force_sequential;
        slice.iter().map(f).collect()
    }
}
