//! Uniform-grid interpolation tables for voltage-dependent rate functions
//!
//! A [`RateTable`] samples one or more co-computed series (for example an
//! equilibrium value and a time constant per gate) on a uniform voltage grid
//! and answers lookups by linear interpolation, clamping flat outside the
//! grid. A [`TableCache`] owns the table for one mechanism kind and rebuilds
//! it lazily when the ambient temperature changes.

use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::error::*;

/// Values sampled at one knot, one entry per series
pub type Samples = SmallVec<[f64; 4]>;

/// Voltage grid a table is sampled on
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TableDomain {
    /// Lowest knot (mV)
    pub v_min: f64,
    /// Highest knot (mV)
    pub v_max: f64,
    /// Number of knots including both ends
    pub n_knots: usize,
}

impl Default for TableDomain {
    fn default() -> Self {
        Self {
            v_min: -100.0,
            v_max: 100.0,
            n_knots: 401,
        }
    }
}

impl TableDomain {
    /// Create a validated domain
    pub fn new(v_min: f64, v_max: f64, n_knots: usize) -> Result<Self> {
        if !v_min.is_finite() || !v_max.is_finite() {
            return Err(MechanismError::invalid_config(format!(
                "table bounds must be finite (got [{}, {}])",
                v_min, v_max
            )));
        }
        if v_max <= v_min {
            return Err(MechanismError::invalid_config(format!(
                "table v_max {} must exceed v_min {}",
                v_max, v_min
            )));
        }
        if n_knots < 2 {
            return Err(MechanismError::invalid_config(format!(
                "table needs at least 2 knots (got {})",
                n_knots
            )));
        }
        Ok(Self {
            v_min,
            v_max,
            n_knots,
        })
    }

    /// Validate the domain
    pub fn validate(&self) -> Result<()> {
        Self::new(self.v_min, self.v_max, self.n_knots)?;
        Ok(())
    }

    /// Grid spacing (mV)
    pub fn step(&self) -> f64 {
        (self.v_max - self.v_min) / (self.n_knots - 1) as f64
    }

    /// Voltage of knot `i`
    pub fn knot(&self, i: usize) -> f64 {
        self.v_min + i as f64 * self.step()
    }
}

/// Tabulated rate function of membrane voltage
#[derive(Debug, Clone)]
pub struct RateTable {
    domain: TableDomain,
    inv_step: f64,
    n_series: usize,
    /// Knot-major storage: `values[knot * n_series + series]`
    values: Vec<f64>,
    celsius: f64,
}

impl RateTable {
    /// Sample `f` on every knot of `domain`.
    ///
    /// All knots must yield the same number of series; `celsius` is recorded
    /// so a cache can tell when the table is stale.
    pub fn build<F>(domain: TableDomain, celsius: f64, f: F) -> Result<Self>
    where
        F: Fn(f64) -> Samples,
    {
        domain.validate()?;

        let first = f(domain.v_min);
        let n_series = first.len();
        if n_series == 0 {
            return Err(MechanismError::invalid_config(
                "rate function returned no series",
            ));
        }

        let mut values = Vec::with_capacity(domain.n_knots * n_series);
        values.extend_from_slice(&first);
        for i in 1..domain.n_knots {
            let sample = f(domain.knot(i));
            if sample.len() != n_series {
                return Err(MechanismError::invalid_config(format!(
                    "rate function returned {} series at knot {} (expected {})",
                    sample.len(),
                    i,
                    n_series
                )));
            }
            values.extend_from_slice(&sample);
        }

        Ok(Self {
            domain,
            inv_step: 1.0 / domain.step(),
            n_series,
            values,
            celsius,
        })
    }

    /// Interpolated values of every series at `v`
    pub fn lookup(&self, v: f64) -> Samples {
        let last = self.domain.n_knots - 1;
        let xi = self.inv_step * (v - self.domain.v_min);
        if xi <= 0.0 {
            return self.knot_values(0).iter().copied().collect();
        }
        let i = xi as usize;
        if i >= last {
            return self.knot_values(last).iter().copied().collect();
        }
        let theta = xi - i as f64;
        let lo = self.knot_values(i);
        let hi = self.knot_values(i + 1);
        lo.iter()
            .zip(hi)
            .map(|(a, b)| a + theta * (b - a))
            .collect()
    }

    /// Raw values stored at knot `i`
    pub fn knot_values(&self, i: usize) -> &[f64] {
        let start = i * self.n_series;
        &self.values[start..start + self.n_series]
    }

    /// Grid the table was sampled on
    pub fn domain(&self) -> TableDomain {
        self.domain
    }

    /// Number of co-sampled series
    pub fn series_count(&self) -> usize {
        self.n_series
    }

    /// Temperature the table was built at (degC)
    pub fn celsius(&self) -> f64 {
        self.celsius
    }
}

/// Per-kind table holder with lazy rebuild on temperature change.
///
/// Readers take the read lock only long enough to clone the published
/// `Arc`; a rebuild happens under the write lock and replaces the `Arc`
/// wholesale, so in-flight readers keep a consistent table.
#[derive(Debug, Default)]
pub struct TableCache {
    published: RwLock<Option<Arc<RateTable>>>,
}

impl TableCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the table for `celsius`, building it first if missing or stale
    pub fn get_or_build<F>(&self, celsius: f64, build: F) -> Result<Arc<RateTable>>
    where
        F: FnOnce() -> Result<RateTable>,
    {
        if let Some(table) = self.published.read().as_ref() {
            if table.celsius() == celsius {
                return Ok(Arc::clone(table));
            }
        }

        let mut slot = self.published.write();
        // Another writer may have rebuilt while we waited for the lock.
        if let Some(table) = slot.as_ref() {
            if table.celsius() == celsius {
                return Ok(Arc::clone(table));
            }
        }
        log::debug!("Rebuilding rate table for celsius={}", celsius);
        let table = Arc::new(build()?);
        *slot = Some(Arc::clone(&table));
        Ok(table)
    }

    /// Currently published table, if any
    pub fn current(&self) -> Option<Arc<RateTable>> {
        self.published.read().clone()
    }

    /// Drop the published table
    pub fn invalidate(&self) {
        *self.published.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn square_table() -> RateTable {
        RateTable::build(TableDomain::default(), 6.3, |v| smallvec![v * v, -v]).unwrap()
    }

    #[test]
    fn test_domain_validation() {
        assert!(TableDomain::new(-100.0, 100.0, 401).is_ok());
        assert!(TableDomain::new(100.0, -100.0, 401).is_err());
        assert!(TableDomain::new(-100.0, 100.0, 1).is_err());
        assert!(TableDomain::new(f64::NAN, 100.0, 10).is_err());
        assert_eq!(TableDomain::default().step(), 0.5);
    }

    #[test]
    fn test_lookup_on_knots_is_exact() {
        let table = square_table();
        for i in [0usize, 1, 57, 200, 399, 400] {
            let v = table.domain().knot(i);
            let got = table.lookup(v);
            assert_eq!(got[0], v * v);
            assert_eq!(got[1], -v);
        }
    }

    #[test]
    fn test_lookup_interpolates_linear_exactly() {
        let table = square_table();
        let got = table.lookup(-12.3);
        assert!((got[1] - 12.3).abs() < 1e-12);
        // Chord error of v^2 is bounded by h^2/4 * f''/2 = 0.0625
        assert!((got[0] - 12.3 * 12.3).abs() <= 0.0625 + 1e-12);
    }

    #[test]
    fn test_lookup_clamps_flat() {
        let table = square_table();
        assert_eq!(table.lookup(-250.0), table.lookup(-100.0));
        assert_eq!(table.lookup(100.0), table.lookup(1e6));
        assert_eq!(table.lookup(100.25)[1], -100.0);
    }

    #[test]
    fn test_build_rejects_ragged_series() {
        let result = RateTable::build(TableDomain::default(), 6.3, |v| {
            if v > 0.0 {
                smallvec![1.0]
            } else {
                smallvec![1.0, 2.0]
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_cache_rebuilds_only_on_temperature_change() {
        let cache = TableCache::new();
        let builds = AtomicUsize::new(0);
        let build = |celsius: f64| {
            builds.fetch_add(1, Ordering::SeqCst);
            RateTable::build(TableDomain::default(), celsius, |v| smallvec![v])
        };

        let a = cache.get_or_build(6.3, || build(6.3)).unwrap();
        let b = cache.get_or_build(6.3, || build(6.3)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        let c = cache.get_or_build(20.0, || build(20.0)).unwrap();
        assert_eq!(c.celsius(), 20.0);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        // Old handle is still usable
        assert_eq!(a.celsius(), 6.3);

        cache.invalidate();
        assert!(cache.current().is_none());
    }

    #[test]
    fn test_cache_consistent_under_concurrent_temperature_changes() {
        let cache = TableCache::new();
        let temperatures = [6.3, 20.0];

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let cache = &cache;
                scope.spawn(move || {
                    for i in 0..200 {
                        let celsius = temperatures[(worker + i) % 2];
                        let table = cache
                            .get_or_build(celsius, || {
                                RateTable::build(TableDomain::default(), celsius, |v| smallvec![v + celsius])
                            })
                            .unwrap();
                        assert_eq!(table.celsius(), celsius);
                        assert_eq!(table.series_count(), 1);
                        assert!((table.lookup(0.0)[0] - celsius).abs() < 1e-12);
                        assert!((table.lookup(-30.0)[0] - (celsius - 30.0)).abs() < 1e-12);
                    }
                });
            }
        });

        let last = cache.current().unwrap();
        assert!(temperatures.contains(&last.celsius()));
    }
}
