//! Identity stem separation
//!
//! Returns the full mix as a single stem named `mix`. Model-based
//! separation plugs in behind [`StemSeparator`] without pipeline changes.

use async_trait::async_trait;

use super::{CollaboratorError, StemSeparator, Stem, StereoSignal};

/// Stem name used for the unseparated mix
pub const MIX_STEM: &str = "mix";

#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughSeparator;

#[async_trait]
impl StemSeparator for PassthroughSeparator {
    async fn separate(&self, signal: StereoSignal) -> Result<Vec<Stem>, CollaboratorError> {
        if signal.is_empty() {
            return Err(CollaboratorError::new("Cannot separate an empty signal"));
        }
        Ok(vec![Stem {
            name: MIX_STEM.to_string(),
            signal,
        }])
    }
}
