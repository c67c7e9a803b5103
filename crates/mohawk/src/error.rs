//! Errors and the error-reporting seam.
//!
//! Nothing in the pipeline lets a failure cross a flush or evaluation
//! boundary. Failures are contained at the site that produced them and handed
//! to a [`Reporter`], so one bad computation cannot keep the rest of a batched
//! flush from completing.

/// Everything that can go wrong inside the pipeline without being a
/// programming error in the caller.
#[derive(Debug)]
pub enum PipelineError {
    /// A watcher expression returned an error. The previous value is
    /// retained and the flush continues.
    Evaluation {
        /// The watch label or component name that owns the expression.
        label: String,
        /// The underlying error.
        source: anyhow::Error,
    },
    /// The same watcher re-queued itself more times than the configured
    /// threshold within a single flush.
    RunawayFlush {
        /// The watch label or component name.
        label: String,
        /// Whether the runaway entry is a render boundary (as opposed to a
        /// user watch).
        render: bool,
        /// How many times the entry re-appeared before the abort.
        repeats: usize,
    },
    /// Observed state was written outside of a commit bracket while the
    /// runtime is in strict mode.
    StrictMutation {
        /// The key or mutator that performed the write.
        label: String,
    },
    /// An existing host subtree did not match the node shape expected during
    /// hydration. Hydration is abandoned and a full render takes its place.
    HydrationMismatch {
        /// Description of the expected node.
        expected: String,
        /// Description of what the host held instead.
        found: String,
    },
    /// A reactive insert was refused because the target map is a root
    /// observation point.
    RootGrowth {
        /// The key that was being added.
        key: String,
    },
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Evaluation { label, source } => {
                write!(f, "error evaluating '{}': {}", label, source)
            }
            PipelineError::RunawayFlush {
                label,
                render,
                repeats,
            } => {
                if *render {
                    write!(
                        f,
                        "possible infinite update loop in the render of '{}' ({} repeats)",
                        label, repeats
                    )
                } else {
                    write!(
                        f,
                        "possible infinite update loop in watch '{}' ({} repeats)",
                        label, repeats
                    )
                }
            }
            PipelineError::StrictMutation { label } => {
                write!(f, "'{}' was written outside of a commit", label)
            }
            PipelineError::HydrationMismatch { expected, found } => {
                write!(f, "hydration expected {} but found {}", expected, found)
            }
            PipelineError::RootGrowth { key } => {
                write!(f, "cannot add reactive key '{}' to a root store", key)
            }
        }
    }
}

impl std::error::Error for PipelineError {}

/// Collaborator that receives contained failures.
pub trait Reporter {
    /// Take note of the error. Implementations must not panic.
    fn report(&self, error: &PipelineError);
}

/// The default reporter, which forwards to the [`log`] facade.
#[derive(Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, error: &PipelineError) {
        match error {
            PipelineError::StrictMutation { .. } => log::warn!("{}", error),
            _ => log::error!("{}", error),
        }
    }
}
