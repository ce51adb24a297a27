// SPDX-License-Identifier: CEPL-1.0
//! Capability negotiation against the versioned vendor extension
//! interface. Pure negotiation: no GPU state is touched here.

use thiserror::Error;
use tracing::{info, warn};

use crate::version::ExtensionVersion;

/// Properties the vendor driver reports once a context exists. Diagnostics
/// only.
#[derive(Clone, Copy, Debug, Default)]
pub struct VendorDeviceInfo {
    pub gpu_max_freq_mhz: u32,
    pub generation: u32,
    pub execution_units: u32,
    pub package_tdp_watts: u32,
    pub max_fill_rate: u32,
}

#[derive(Debug, Error)]
pub enum VendorError {
    #[error("vendor extension library unavailable: {0}")]
    LibraryUnavailable(String),
    #[error("missing symbol in vendor extension library: {0}")]
    MissingSymbol(String),
    #[error("vendor extension call failed: {0}")]
    CallFailed(&'static str),
    #[error("vendor context already destroyed")]
    ContextGone,
}

/// Access to the vendor capability library.
///
/// The production implementation wraps the real shared library; tests
/// substitute an in-memory fake. Loading and unloading touch process-global
/// state and must not race other users of the same library.
pub trait VendorProvider {
    type Context;

    /// Load the library. Fails closed when it is not installed.
    fn load(&mut self) -> Result<(), VendorError>;

    /// First half of the two-call enumerate pattern: how many extension
    /// versions the driver supports.
    fn version_count(&mut self) -> Result<u32, VendorError>;

    /// Second half: fill `out` (sized from
    /// [`version_count`](Self::version_count)) with the supported versions
    /// in driver enumeration order.
    fn versions(&mut self, out: &mut [ExtensionVersion]) -> Result<(), VendorError>;

    /// Create the device-bound extension context for the selected version.
    fn create_context(
        &mut self,
        version: ExtensionVersion,
    ) -> Result<(Self::Context, VendorDeviceInfo), VendorError>;

    /// Destroy a context. Best-effort: callers log failures and proceed.
    fn destroy_context(&mut self, context: &mut Self::Context) -> Result<(), VendorError>;

    /// Unload the library. Infallible by contract; problems are the
    /// provider's to log.
    fn unload(&mut self);
}

/// An activated extension: the driver context, the version that was
/// actually selected, and the reported device properties.
pub struct ActiveExtension<C> {
    pub context: C,
    pub version: ExtensionVersion,
    pub device_info: VendorDeviceInfo,
}

/// Negotiate the vendor capability extension.
///
/// Scans the driver's supported versions in enumeration order and activates
/// the FIRST entry that is component-wise `>= required`: first match, not
/// best match. When several entries qualify, the capabilities in effect are
/// those of the earliest enumerated one.
///
/// Every failure path logs and returns `None`; whether a missing capability
/// is fatal is the caller's policy, not this function's.
pub fn try_activate<P: VendorProvider>(
    provider: &mut P,
    required: ExtensionVersion,
) -> Option<ActiveExtension<P::Context>> {
    if let Err(e) = provider.load() {
        warn!("vendor extension library load failed: {e}");
        return None;
    }
    info!("vendor extension library loaded");

    let count = match provider.version_count() {
        Ok(n) => n,
        Err(e) => {
            warn!("vendor version enumeration (sizing call) failed: {e}");
            provider.unload();
            return None;
        }
    };

    let mut versions = vec![ExtensionVersion::default(); count as usize];
    if let Err(e) = provider.versions(&mut versions) {
        warn!("vendor version enumeration (fill call) failed: {e}");
        provider.unload();
        return None;
    }

    info!("driver supports {count} extension version(s):");
    for (i, v) in versions.iter().enumerate() {
        info!("  [{} of {}] version {v}", i + 1, count);
    }
    info!("locating requested extension version {required}");

    let mut selected = None;
    for v in versions.iter().copied() {
        if v.satisfies(&required) {
            selected = Some(v);
            break;
        }
        info!("{v} does not satisfy {required}, trying the next one");
    }

    let Some(version) = selected else {
        warn!("no supported extension version satisfies {required}");
        provider.unload();
        return None;
    };
    info!("selected extension version {version}");

    match provider.create_context(version) {
        Ok((context, device_info)) => {
            info!(
                "vendor device: {} MHz, generation {}, {} execution units, {} W TDP, \
                 fill rate {} px/clk",
                device_info.gpu_max_freq_mhz,
                device_info.generation,
                device_info.execution_units,
                device_info.package_tdp_watts,
                device_info.max_fill_rate,
            );
            Some(ActiveExtension { context, version, device_info })
        }
        Err(e) => {
            warn!("vendor context creation failed: {e}");
            provider.unload();
            None
        }
    }
}

/// Tear an activated extension down: destroy the context, then unload the
/// library. Both calls are best-effort; failures are logged, never
/// propagated, and shutdown proceeds regardless.
pub fn deactivate<P: VendorProvider>(provider: &mut P, active: &mut ActiveExtension<P::Context>) {
    if let Err(e) = provider.destroy_context(&mut active.context) {
        warn!("vendor context destruction failed: {e}");
    }
    provider.unload();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeProvider {
        supported: Vec<ExtensionVersion>,
        fail_load: bool,
        fail_create: bool,
        loaded: bool,
        sizing_calls: u32,
        fill_calls: u32,
        destroy_calls: u32,
    }

    struct FakeContext {
        alive: bool,
    }

    impl VendorProvider for FakeProvider {
        type Context = FakeContext;

        fn load(&mut self) -> Result<(), VendorError> {
            if self.fail_load {
                return Err(VendorError::LibraryUnavailable("not installed".into()));
            }
            self.loaded = true;
            Ok(())
        }

        fn version_count(&mut self) -> Result<u32, VendorError> {
            self.sizing_calls += 1;
            Ok(self.supported.len() as u32)
        }

        fn versions(&mut self, out: &mut [ExtensionVersion]) -> Result<(), VendorError> {
            self.fill_calls += 1;
            assert_eq!(out.len(), self.supported.len(), "caller must size from the first call");
            out.copy_from_slice(&self.supported);
            Ok(())
        }

        fn create_context(
            &mut self,
            _version: ExtensionVersion,
        ) -> Result<(FakeContext, VendorDeviceInfo), VendorError> {
            if self.fail_create {
                return Err(VendorError::CallFailed("create_context"));
            }
            Ok((FakeContext { alive: true }, VendorDeviceInfo::default()))
        }

        fn destroy_context(&mut self, context: &mut FakeContext) -> Result<(), VendorError> {
            self.destroy_calls += 1;
            if !context.alive {
                return Err(VendorError::ContextGone);
            }
            context.alive = false;
            Ok(())
        }

        fn unload(&mut self) {
            self.loaded = false;
        }
    }

    fn provider(versions: &[(u32, u32, u32)]) -> FakeProvider {
        FakeProvider {
            supported: versions
                .iter()
                .map(|&(t, a, r)| ExtensionVersion::new(t, a, r))
                .collect(),
            ..FakeProvider::default()
        }
    }

    #[test]
    fn selects_first_qualifying_version_not_best() {
        let mut p = provider(&[(1, 0, 0), (3, 4, 1), (5, 0, 0)]);
        let active = try_activate(&mut p, ExtensionVersion::new(3, 4, 1)).unwrap();
        // (5,0,0) also qualifies but enumerates later.
        assert_eq!(active.version, ExtensionVersion::new(3, 4, 1));
    }

    #[test]
    fn enumerate_uses_two_calls() {
        let mut p = provider(&[(3, 4, 1)]);
        try_activate(&mut p, ExtensionVersion::new(3, 4, 1)).unwrap();
        assert_eq!(p.sizing_calls, 1);
        assert_eq!(p.fill_calls, 1);
    }

    #[test]
    fn load_failure_is_fail_closed() {
        let mut p = provider(&[(3, 4, 1)]);
        p.fail_load = true;
        assert!(try_activate(&mut p, ExtensionVersion::new(3, 4, 1)).is_none());
    }

    #[test]
    fn no_qualifying_version_unloads_and_returns_none() {
        let mut p = provider(&[(1, 0, 0), (3, 3, 9)]);
        assert!(try_activate(&mut p, ExtensionVersion::new(3, 4, 1)).is_none());
        assert!(!p.loaded);
    }

    #[test]
    fn context_creation_failure_unloads_and_returns_none() {
        let mut p = provider(&[(3, 4, 1)]);
        p.fail_create = true;
        assert!(try_activate(&mut p, ExtensionVersion::new(3, 4, 1)).is_none());
        assert!(!p.loaded);
    }

    #[test]
    fn deactivate_tolerates_double_destroy() {
        let mut p = provider(&[(3, 4, 1)]);
        let mut active = try_activate(&mut p, ExtensionVersion::new(3, 4, 1)).unwrap();
        deactivate(&mut p, &mut active);
        // Second destroy reports an error internally but must not panic or
        // propagate.
        deactivate(&mut p, &mut active);
        assert_eq!(p.destroy_calls, 2);
        assert!(!p.loaded);
    }
}
