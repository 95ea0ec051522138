//! Ordered catalog of the fingerprinting pipeline steps.
//!
//! The registry order is the execution order. Every step carries the same
//! weight (1/N) in the overall progress, so progress math only ever needs
//! [`StepRegistry::len`] and index lookup.

/// A named stage within one pipeline phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStep {
    /// Position in the registry, starting at 0.
    pub index: usize,
    /// Canonical lowercase phrase as it appears in backend logs.
    pub name: &'static str,
    /// Human-readable label used for display.
    pub label: &'static str,
    /// Lowercase synonyms that also identify this step.
    pub keywords: &'static [&'static str],
}

impl PipelineStep {
    /// Returns true if the canonical phrase or any keyword occurs in `line_lower`.
    ///
    /// `line_lower` must already be lowercased.
    pub fn matches(&self, line_lower: &str) -> bool {
        line_lower.contains(self.name) || self.keywords.iter().any(|k| line_lower.contains(k))
    }
}

static PIPELINE_STEPS: [PipelineStep; 7] = [
    PipelineStep {
        index: 0,
        name: "ingesting",
        label: "Ingesting audio",
        keywords: &["ingest", "loading audio"],
    },
    PipelineStep {
        index: 1,
        name: "generating transforms",
        label: "Generating transforms",
        keywords: &["transform", "augment"],
    },
    PipelineStep {
        index: 2,
        name: "building index",
        label: "Building index",
        keywords: &["faiss", "indexing", "embedding"],
    },
    PipelineStep {
        index: 3,
        name: "running queries",
        label: "Running queries",
        keywords: &["queries", "querying"],
    },
    PipelineStep {
        index: 4,
        name: "analyzing",
        label: "Analyzing results",
        keywords: &["analyze", "analysis"],
    },
    PipelineStep {
        index: 5,
        name: "capturing failures",
        label: "Capturing failures",
        keywords: &["failure case", "capturing"],
    },
    PipelineStep {
        index: 6,
        name: "generating report",
        label: "Generating report",
        keywords: &["writing report", "report"],
    },
];

/// Read-only view over the pipeline steps.
#[derive(Debug, Clone, Copy)]
pub struct StepRegistry {
    steps: &'static [PipelineStep],
}

impl StepRegistry {
    /// Returns the registry of the fingerprinting pipeline.
    pub fn pipeline() -> Self {
        Self {
            steps: &PIPELINE_STEPS,
        }
    }

    /// Builds a registry over a custom step table.
    ///
    /// Steps must be listed in execution order with `index` equal to position.
    pub fn from_static(steps: &'static [PipelineStep]) -> Self {
        debug_assert!(steps.iter().enumerate().all(|(i, s)| s.index == i));
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&'static PipelineStep> {
        self.steps.get(index)
    }

    pub fn steps(&self) -> &'static [PipelineStep] {
        self.steps
    }

    /// Index of the final step, if any.
    pub fn last_index(&self) -> Option<usize> {
        self.steps.len().checked_sub(1)
    }

    /// First step, in registry order, mentioned by the line.
    ///
    /// First hit wins, not the longest match, so results stay deterministic.
    pub fn find_in(&self, line_lower: &str) -> Option<&'static PipelineStep> {
        self.steps.iter().find(|step| step.matches(line_lower))
    }

    /// Display label for a step index, or a generic fallback.
    pub fn label_for(&self, index: usize) -> String {
        match self.get(index) {
            Some(step) => step.label.to_string(),
            None => format!("Step {}", index + 1),
        }
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::pipeline()
    }
}
