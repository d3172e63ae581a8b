//! Platform capability probes.

use anyhow::{bail, Context};
use libloading::Library;
use tracing::{debug, warn};

use vblit_core::PlatformConfig;

/// Read-only platform facts, queried once per graphics context.
pub trait PlatformProbe: Send + Sync {
    /// Required row alignment of renderable images, in bytes.
    fn pixel_alignment(&self) -> anyhow::Result<u32>;
}

/// Queries `get_gpu_pixel_alignment` from the Adreno utility library.
#[derive(Debug, Clone)]
pub struct AdrenoProbe {
    library: String,
}

impl AdrenoProbe {
    pub fn new(library: impl Into<String>) -> Self {
        Self {
            library: library.into(),
        }
    }

    pub fn from_config(config: &PlatformConfig) -> Self {
        Self::new(config.adreno_library.clone())
    }
}

impl PlatformProbe for AdrenoProbe {
    fn pixel_alignment(&self) -> anyhow::Result<u32> {
        // SAFETY: Loading the vendor utility library only runs its static
        // initializers, which have no preconditions.
        let lib = unsafe { Library::new(&self.library) }
            .with_context(|| format!("failed to load {}", self.library))?;

        // SAFETY: The symbol is declared as `unsigned int (void)` by the
        // vendor headers and the library stays loaded for the call.
        let alignment = unsafe {
            let query = lib
                .get::<unsafe extern "C" fn() -> u32>(b"get_gpu_pixel_alignment\0")
                .context("get_gpu_pixel_alignment not found")?;
            query()
        };

        // The library reports 1 when it cannot determine the alignment.
        if alignment <= 1 {
            bail!("{} reported alignment {alignment}", self.library);
        }
        debug!(library = %self.library, alignment, "Queried GPU pixel alignment");
        Ok(alignment)
    }
}

/// A probe with a fixed answer, for hosts without vendor libraries.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe {
    alignment: u32,
}

impl FixedProbe {
    pub fn new(alignment: u32) -> Self {
        Self { alignment }
    }
}

impl PlatformProbe for FixedProbe {
    fn pixel_alignment(&self) -> anyhow::Result<u32> {
        if self.alignment <= 1 {
            bail!("invalid fixed alignment {}", self.alignment);
        }
        Ok(self.alignment)
    }
}

/// Alignment to use: the configured override, else the probe's answer,
/// else the configured default.
pub fn resolve_alignment(probe: &dyn PlatformProbe, config: &PlatformConfig) -> u32 {
    if let Some(alignment) = config.alignment_override.filter(|a| *a > 1) {
        debug!(alignment, "Using configured pixel alignment");
        return alignment;
    }

    match probe.pixel_alignment() {
        Ok(alignment) => alignment,
        Err(err) => {
            warn!(
                "Pixel alignment query failed, using {}: {:#}",
                config.default_alignment, err
            );
            config.default_alignment.max(1)
        }
    }
}
