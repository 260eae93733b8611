use thiserror::Error;

/// Failure reported by a [`HeapGrowth`](crate::HeapGrowth) provider.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthError {
  #[error("heap exhausted: requested {requested} bytes, {available} bytes left")]
  Exhausted { requested: usize, available: usize },

  #[error("program break refused to move by {requested} bytes")]
  BreakRefused { requested: usize },

  #[error("growth request of {requested} bytes cannot be expressed as a break increment")]
  Oversized { requested: usize },
}

/// Errors surfaced by allocation, reallocation and heap setup.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
  #[error("out of memory: {0}")]
  OutOfMemory(#[from] GrowthError),

  /// Growth for `class` succeeded yet the retry found no block of `needed`
  /// bytes. Unreachable while the heap invariants hold.
  #[error("heap invariant violated: growth of class {class} produced no block of {needed} bytes")]
  InvariantViolation { class: usize, needed: usize },

  #[error("request of {requested} bytes exceeds the addressable block size")]
  RequestTooLarge { requested: usize },

  #[error("invalid heap configuration: {0}")]
  InvalidConfig(&'static str),
}

impl AllocError {
  pub fn is_out_of_memory(&self) -> bool {
    matches!(self, AllocError::OutOfMemory(_))
  }
}

pub type AllocResult<T> = Result<T, AllocError>;
