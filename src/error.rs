use thiserror::Error;

/// Failures surfaced by the rifting engine.
///
/// Configuration problems are detected before any solve. Convergence failures
/// carry enough context for the caller to decide whether the run continues.
#[derive(Debug, Error)]
pub enum RiftError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(
        "{solver} did not converge after {iterations} iterations (residual {residual:.3e}, tolerance {tolerance:.3e})"
    )]
    ConvergenceFailure {
        solver: &'static str,
        iterations: usize,
        residual: f64,
        tolerance: f64,
    },

    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    #[error("checkpoint failure at step {step}: {reason}")]
    Persistence { step: u64, reason: String },

    #[error("step {step} failed: {source}")]
    AtStep {
        step: u64,
        #[source]
        source: Box<RiftError>,
    },
}

pub type RiftResult<T> = Result<T, RiftError>;

impl RiftError {
    pub fn config(msg: impl Into<String>) -> Self {
        RiftError::Configuration(msg.into())
    }

    pub fn instability(msg: impl Into<String>) -> Self {
        RiftError::NumericalInstability(msg.into())
    }

    pub fn persistence(step: u64, reason: impl std::fmt::Display) -> Self {
        RiftError::Persistence {
            step,
            reason: reason.to_string(),
        }
    }

    /// Attaches the step index unless the error already carries one.
    pub fn at_step(self, step: u64) -> Self {
        match self {
            RiftError::AtStep { .. } | RiftError::Persistence { .. } => self,
            other => RiftError::AtStep {
                step,
                source: Box::new(other),
            },
        }
    }

    /// Unwraps step context to the underlying failure.
    pub fn root(&self) -> &RiftError {
        match self {
            RiftError::AtStep { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_convergence_failure(&self) -> bool {
        matches!(self.root(), RiftError::ConvergenceFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_step_wraps_once() {
        let err = RiftError::instability("NaN in pressure").at_step(7).at_step(9);
        match &err {
            RiftError::AtStep { step, .. } => assert_eq!(*step, 7),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(err.root(), RiftError::NumericalInstability(_)));
    }

    #[test]
    fn test_persistence_keeps_its_own_step() {
        let err = RiftError::persistence(12, "disk full").at_step(13);
        assert!(matches!(err, RiftError::Persistence { step: 12, .. }));
        assert!(err.to_string().contains("step 12"));
    }

    #[test]
    fn test_convergence_message() {
        let err = RiftError::ConvergenceFailure {
            solver: "picard",
            iterations: 100,
            residual: 2.0e-3,
            tolerance: 5.0e-4,
        };
        assert!(err.is_convergence_failure());
        let msg = err.to_string();
        assert!(msg.contains("picard"));
        assert!(msg.contains("100 iterations"));
    }
}
