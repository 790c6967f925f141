use crate::{AttachOutcome, LoadedImage, runtime::VersionFamily};

/// A candidate runtime visited during one attach call.
#[derive(Debug, Clone)]
pub struct InterpreterRecord {
    /// The runtime image.
    pub image: LoadedImage,

    /// The version family, if it could be determined.
    pub family: Option<VersionFamily>,

    /// Whether the image follows the debug-build naming convention.
    pub is_debug: bool,

    /// The outcome for this candidate, or `None` after a local failure.
    pub outcome: Option<AttachOutcome>,
}

/// Every candidate runtime visited during one attach call.
#[derive(Debug, Default)]
pub struct InterpreterRegistry {
    records: Vec<InterpreterRecord>,
}

impl InterpreterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a candidate.
    pub fn push(&mut self, record: InterpreterRecord) {
        self.records.push(record);
    }

    /// Forgets every candidate.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Returns the recorded candidates in visiting order.
    pub fn records(&self) -> &[InterpreterRecord] {
        &self.records
    }

    /// Returns the number of recorded candidates.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Checks whether no candidate was recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the record of the candidate that attached successfully.
    pub fn attached(&self) -> Option<&InterpreterRecord> {
        self.records
            .iter()
            .find(|record| record.outcome == Some(AttachOutcome::Success))
    }

    /// Returns the most specific outcome observed.
    ///
    /// Outcomes rank by their numeric code; a success always wins.
    pub fn most_specific(&self) -> Option<AttachOutcome> {
        if self.attached().is_some() {
            return Some(AttachOutcome::Success);
        }

        self.records.iter().filter_map(|record| record.outcome).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Address;

    fn record(outcome: Option<AttachOutcome>) -> InterpreterRecord {
        InterpreterRecord {
            image: LoadedImage::new(Address(0x1000), "python27.dll"),
            family: None,
            is_debug: false,
            outcome,
        }
    }

    #[test]
    fn later_more_specific_outcome_wins() {
        let mut registry = InterpreterRegistry::new();
        assert_eq!(registry.most_specific(), None);

        registry.push(record(Some(AttachOutcome::DetectionEntryPointMissing)));
        registry.push(record(None));
        registry.push(record(Some(AttachOutcome::RequiredEntryPointMissing)));
        registry.push(record(Some(AttachOutcome::RuntimeNotInitialized)));

        assert_eq!(registry.len(), 4);
        assert_eq!(
            registry.most_specific(),
            Some(AttachOutcome::RequiredEntryPointMissing)
        );

        registry.push(record(Some(AttachOutcome::Success)));
        assert_eq!(registry.most_specific(), Some(AttachOutcome::Success));
    }
}
