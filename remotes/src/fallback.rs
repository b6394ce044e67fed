//! Push scheme negotiation.

use cnab_oci_core::Scheme;

use crate::registry::RegistryHint;

/// Chooses the push scheme and decides whether a rejected push may be
/// retried under the compatible one.
#[derive(Debug, Clone, Copy)]
pub struct FallbackNegotiator {
    allow_fallback: bool,
}

impl FallbackNegotiator {
    pub fn new(allow_fallback: bool) -> Self {
        Self { allow_fallback }
    }

    pub fn allow_fallback(&self) -> bool {
        self.allow_fallback
    }

    /// First scheme to try against a registry.
    pub fn select_scheme(&self, hint: RegistryHint) -> Scheme {
        match hint {
            RegistryHint::CompatibleOnly if self.allow_fallback => Scheme::Compatible,
            _ => Scheme::Full,
        }
    }

    /// Scheme to retry with after `current` was rejected, if any.
    ///
    /// There is at most one fallback per push.
    pub fn after_rejection(&self, current: Scheme) -> Option<Scheme> {
        match current {
            Scheme::Full if self.allow_fallback => Some(Scheme::Compatible),
            _ => None,
        }
    }
}

impl Default for FallbackNegotiator {
    fn default() -> Self {
        Self::new(true)
    }
}
