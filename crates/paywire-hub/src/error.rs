//! Error type for `paywire-hub`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The durable tier failed a read or write.
  #[error("durable store error: {0}")]
  Persistence(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error(transparent)]
  Core(#[from] paywire_core::Error),
}

impl Error {
  pub(crate) fn persistence<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Persistence(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
