use std::fmt::{self, Display, Formatter};

/// What happened to one recipient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure { reason: String },
}

/// Outcome for one recipient of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryResult {
    recipient: String,
    outcome: Outcome,
}

impl DeliveryResult {
    pub fn success(recipient: impl Into<String>) -> Self {
        DeliveryResult {
            recipient: recipient.into(),
            outcome: Outcome::Success,
        }
    }

    pub fn failure(recipient: impl Into<String>, reason: impl Into<String>) -> Self {
        DeliveryResult {
            recipient: recipient.into(),
            outcome: Outcome::Failure {
                reason: reason.into(),
            },
        }
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// The failure reason, `None` on success.
    pub fn reason(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success => None,
            Outcome::Failure { reason } => Some(reason),
        }
    }
}

impl Display for DeliveryResult {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match &self.outcome {
            Outcome::Success => write!(f, "sent to {}", self.recipient),
            Outcome::Failure { reason } => write!(f, "failed for {}: {}", self.recipient, reason),
        }
    }
}

/// Every result of one run, in completion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    results: Vec<DeliveryResult>,
}

impl Report {
    pub fn new(results: Vec<DeliveryResult>) -> Self {
        Report { results }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn results(&self) -> &[DeliveryResult] {
        &self.results
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeliveryResult> {
        self.results.iter()
    }

    pub fn successes(&self) -> impl Iterator<Item = &DeliveryResult> {
        self.results.iter().filter(|result| result.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeliveryResult> {
        self.results.iter().filter(|result| !result.is_success())
    }

    pub fn succeeded_count(&self) -> usize {
        self.successes().count()
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    /// The result for `recipient`, if it was in the run. With duplicate
    /// entries, any one of them.
    pub fn get(&self, recipient: &str) -> Option<&DeliveryResult> {
        self.results
            .iter()
            .find(|result| result.recipient == recipient)
    }
}

impl From<Report> for Vec<DeliveryResult> {
    fn from(report: Report) -> Self {
        report.results
    }
}

impl IntoIterator for Report {
    type Item = DeliveryResult;
    type IntoIter = std::vec::IntoIter<DeliveryResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl<'a> IntoIterator for &'a Report {
    type Item = &'a DeliveryResult;
    type IntoIter = std::slice::Iter<'a, DeliveryResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}
