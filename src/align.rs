/// Alignment every payload handed out by the heap satisfies.
pub const ALIGNMENT: usize = 16;

/// Rounds `value` up to the next multiple of `alignment`, which must be a
/// power of two.
///
/// # Examples
///
/// ```rust
/// use segalloc::align_to;
///
/// assert_eq!(align_to!(13, 8), 16);
/// assert_eq!(align_to!(32, 32), 32);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $alignment:expr) => {
    ($value + $alignment - 1) & !($alignment - 1)
  };
}

/// Rounds `value` up to the heap's payload alignment (16 bytes).
///
/// # Examples
///
/// ```rust
/// use segalloc::align;
///
/// assert_eq!(align!(1), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(17), 32);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::align::ALIGNMENT)
  };
}

/// Overflow-checked form of [`align!`], used on caller-supplied sizes.
pub fn align_up(value: usize) -> Option<usize> {
  value
    .checked_add(ALIGNMENT - 1)
    .map(|v| v & !(ALIGNMENT - 1))
}
