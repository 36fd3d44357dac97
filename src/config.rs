//! Run parameters for the engine entry point

use crate::device::Backend;
use crate::error::{Result, SnmgError};

/// Google's damping factor
pub const DEFAULT_DAMPING_FACTOR: f32 = 0.85;

/// Default number of power iterations
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Parameters of one `PageRank` run
///
/// Setters chain on `&mut Self`; nothing is checked until
/// [`validate`](Self::validate).
///
/// # Example
///
/// ```
/// use snmg_pagerank::PageRankConfig;
///
/// let mut config = PageRankConfig::default();
/// config.damping_factor(0.9).max_iterations(50).num_devices(2);
/// assert!(config.validate(4).is_ok());
/// assert!(config.validate(1).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRankConfig {
    /// Damping factor α, in (0, 1)
    pub damping_factor: f32,

    /// Power iterations to run (upper bound when a tolerance is set)
    pub max_iterations: usize,

    /// Devices to run on
    pub num_devices: usize,

    /// Optional early exit on the L1 distance between successive iterates
    pub tolerance: Option<f32>,

    /// Where the local multiply runs
    pub backend: Backend,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping_factor: DEFAULT_DAMPING_FACTOR,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            num_devices: 1,
            tolerance: None,
            backend: Backend::default(),
        }
    }
}

impl PageRankConfig {
    /// Sets the damping factor α
    pub fn damping_factor(&mut self, alpha: f32) -> &mut Self {
        self.damping_factor = alpha;
        self
    }

    /// Sets the iteration count
    pub fn max_iterations(&mut self, max_iterations: usize) -> &mut Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the device count
    pub fn num_devices(&mut self, num_devices: usize) -> &mut Self {
        self.num_devices = num_devices;
        self
    }

    /// Sets the early-exit tolerance; `None` runs exactly `max_iterations`
    pub fn tolerance(&mut self, tolerance: Option<f32>) -> &mut Self {
        self.tolerance = tolerance;
        self
    }

    /// Sets the backend
    pub fn backend(&mut self, backend: Backend) -> &mut Self {
        self.backend = backend;
        self
    }

    /// Check the parameters against `available_devices`
    ///
    /// # Errors
    ///
    /// Returns [`SnmgError::InvalidArgument`] if:
    /// - the damping factor is not strictly between 0 and 1
    /// - `max_iterations` is 0
    /// - `num_devices` is 0 or exceeds `available_devices`
    /// - the tolerance is negative or not finite
    pub fn validate(&self, available_devices: usize) -> Result<()> {
        let alpha = self.damping_factor;
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(SnmgError::invalid_argument(format!(
                "damping factor must be in (0, 1), got {alpha}"
            )));
        }
        if self.max_iterations == 0 {
            return Err(SnmgError::invalid_argument(
                "max_iterations must be positive",
            ));
        }
        if self.num_devices == 0 || self.num_devices > available_devices {
            return Err(SnmgError::invalid_argument(format!(
                "num_devices must be in 1..={available_devices}, got {}",
                self.num_devices
            )));
        }
        if let Some(tolerance) = self.tolerance {
            if !tolerance.is_finite() || tolerance < 0.0 {
                return Err(SnmgError::invalid_argument(format!(
                    "tolerance must be finite and non-negative, got {tolerance}"
                )));
            }
        }
        Ok(())
    }
}
