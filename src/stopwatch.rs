//! Stopwatch - coarse phase timing recorder
//!
//! Records named elapsed times and renders them as an aligned table. Used for
//! coarse phase attribution around the criterion benches; not a profiler.

use instant::{Duration, Instant};

/// Accumulates named timing results
#[derive(Debug, Default)]
pub struct Stopwatch {
    prefix: String,
    results: Vec<(String, Duration)>,
}

impl Stopwatch {
    /// Recorder whose result names carry the given prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            results: Vec::new(),
        }
    }

    /// Run a closure, record its elapsed time under `prefix + name`
    pub fn measure<T>(&mut self, name: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        self.results.push((format!("{}{name}", self.prefix), elapsed));
        result
    }

    /// Recorded results in measurement order
    #[inline]
    pub fn results(&self) -> &[(String, Duration)] {
        &self.results
    }
}

impl std::fmt::Display for Stopwatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let indent = self
            .results
            .iter()
            .map(|(name, _)| name.len())
            .max()
            .unwrap_or(0);
        let rule = "=".repeat(indent + 17);

        writeln!(f, "{rule}")?;
        writeln!(f, "Stopwatch results")?;
        writeln!(f, "{rule}")?;
        for (name, elapsed) in &self.results {
            writeln!(
                f,
                "{name:<width$}{:.8} s",
                elapsed.as_secs_f64(),
                width = indent + 5
            )?;
        }
        Ok(())
    }
}
