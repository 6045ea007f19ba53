//! Mock originality checker for testing.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::verification::{
    CheckHandle, CheckReport, CheckStatus, OriginalityChecker, VerificationError,
};

/// Mock implementation of the OriginalityChecker trait.
///
/// Reports are handed out in submission order; when the script runs out the
/// default uniqueness is returned. Submitted texts are recorded.
///
/// # Example
///
/// ```rust,ignore
/// let checker = MockChecker::new();
/// checker.push_uniqueness(40.0);
/// checker.push_uniqueness(65.0);
/// ```
#[derive(Debug)]
pub struct MockChecker {
    script: Arc<RwLock<VecDeque<Result<CheckReport, VerificationError>>>>,
    default_uniqueness: Arc<RwLock<f32>>,
    /// Polls answered with Pending before a check resolves.
    pending_polls: Arc<RwLock<u32>>,
    submissions: Arc<RwLock<Vec<String>>>,
    results: Arc<RwLock<Vec<Option<Result<CheckReport, VerificationError>>>>>,
    polls: Arc<RwLock<Vec<u32>>>,
}

impl Default for MockChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChecker {
    pub fn new() -> Self {
        Self {
            script: Arc::new(RwLock::new(VecDeque::new())),
            default_uniqueness: Arc::new(RwLock::new(100.0)),
            pending_polls: Arc::new(RwLock::new(0)),
            submissions: Arc::new(RwLock::new(Vec::new())),
            results: Arc::new(RwLock::new(Vec::new())),
            polls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn push_uniqueness(&self, uniqueness: f32) {
        self.push_report(CheckReport::new(uniqueness));
    }

    pub fn push_report(&self, report: CheckReport) {
        self.script.write().unwrap().push_back(Ok(report));
    }

    /// The next submission resolves to this error when polled.
    pub fn push_error(&self, error: VerificationError) {
        self.script.write().unwrap().push_back(Err(error));
    }

    pub fn set_default_uniqueness(&self, uniqueness: f32) {
        *self.default_uniqueness.write().unwrap() = uniqueness;
    }

    pub fn set_pending_polls(&self, polls: u32) {
        *self.pending_polls.write().unwrap() = polls;
    }

    /// Texts submitted so far, in order.
    pub fn submissions(&self) -> Vec<String> {
        self.submissions.read().unwrap().clone()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.read().unwrap().len()
    }
}

#[async_trait]
impl OriginalityChecker for MockChecker {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, text: &str) -> Result<CheckHandle, VerificationError> {
        let next = self
            .script
            .write()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(CheckReport::new(*self.default_uniqueness.read().unwrap())));

        let mut submissions = self.submissions.write().unwrap();
        let index = submissions.len();
        submissions.push(text.to_string());
        self.results.write().unwrap().push(Some(next));
        self.polls.write().unwrap().push(0);
        Ok(CheckHandle(index.to_string()))
    }

    async fn poll(&self, handle: &CheckHandle) -> Result<CheckStatus, VerificationError> {
        let index: usize = handle
            .0
            .parse()
            .map_err(|_| VerificationError::Http(format!("unknown handle {}", handle.0)))?;

        {
            let mut polls = self.polls.write().unwrap();
            let seen = polls
                .get_mut(index)
                .ok_or_else(|| VerificationError::Http(format!("unknown handle {}", index)))?;
            *seen += 1;
            if *seen <= *self.pending_polls.read().unwrap() {
                return Ok(CheckStatus::Pending);
            }
        }

        let result = self.results.write().unwrap()[index].take();
        match result {
            Some(Ok(report)) => Ok(CheckStatus::Done(report)),
            Some(Err(e)) => Err(e),
            None => Err(VerificationError::Http("result already collected".to_string())),
        }
    }
}
