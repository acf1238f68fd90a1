//! Per-resource results and the run-level report

use std::fmt;

use deckhand_common::Error;
use deckhand_resource::{ResourceRef, Target};

/// Lifecycle operation kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Create in dependency order
    Create,
    /// Delete in reverse dependency order
    Delete,
    /// Patch in dependency order, creating what is missing
    Patch,
}

impl Operation {
    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Delete => "delete",
            Operation::Patch => "patch",
        }
    }

    /// True for operations that walk groups backwards
    pub fn is_reverse(self) -> bool {
        matches!(self, Operation::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a resource failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureStage {
    /// The client call raised or reported failure
    Execute,
    /// The call succeeded but read-back did not observe the end state
    Validate,
    /// Not attempted because a hard prerequisite failed
    Prerequisite,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureStage::Execute => "execute",
            FailureStage::Validate => "validate",
            FailureStage::Prerequisite => "prerequisite",
        })
    }
}

/// Why a resource failed
#[derive(Debug)]
pub struct Failure {
    /// Stage
    pub stage: FailureStage,
    /// Underlying error
    pub error: Error,
}

/// What happened to one resource
#[derive(Debug)]
pub struct OperationResult {
    /// Owning group
    pub group: String,
    /// Group target
    pub target: Target,
    /// The resource
    pub resource: ResourceRef,
    /// A mutating client call was issued and returned success
    pub executed: bool,
    /// The expected end state was observed
    pub validated: bool,
    /// Set when the resource did not reach its end state
    pub failure: Option<Failure>,
}

impl OperationResult {
    pub(crate) fn new(group: &str, target: Target, resource: ResourceRef) -> Self {
        Self {
            group: group.to_string(),
            target,
            resource,
            executed: false,
            validated: false,
            failure: None,
        }
    }

    pub(crate) fn fail(mut self, stage: FailureStage, error: Error) -> Self {
        self.failure = Some(Failure { stage, error });
        self
    }

    /// Reached its end state
    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && self.validated
    }

    /// A client operation was tried for this resource
    pub fn attempted(&self) -> bool {
        !matches!(
            self.failure,
            Some(Failure {
                stage: FailureStage::Prerequisite,
                ..
            })
        )
    }

    /// Failure stage, if any
    pub fn failure_stage(&self) -> Option<FailureStage> {
        self.failure.as_ref().map(|f| f.stage)
    }
}

/// A resource that a dry run would have touched
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedAction {
    /// Owning group
    pub group: String,
    /// Group target
    pub target: Target,
    /// The resource
    pub resource: ResourceRef,
}

/// Outcome of one lifecycle run
#[derive(Debug)]
pub struct RunReport {
    /// Operation
    pub operation: Operation,
    /// Nothing was sent to a target
    pub dry_run: bool,
    /// Per-resource results, in processing order
    pub results: Vec<OperationResult>,
    /// Dry-run plan, in processing order
    pub planned: Vec<PlannedAction>,
}

impl RunReport {
    pub(crate) fn new(operation: Operation, dry_run: bool) -> Self {
        Self {
            operation,
            dry_run,
            results: Vec::new(),
            planned: Vec::new(),
        }
    }

    /// Every resource executed (or was already in place) and validated
    pub fn is_success(&self) -> bool {
        self.results.iter().all(OperationResult::succeeded)
    }

    /// Number of resources that reached their end state
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded()).count()
    }

    /// Number of resources in the run
    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Results that failed
    pub fn failures(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.iter().filter(|r| !r.succeeded())
    }

    /// Look up the result for one resource
    pub fn result(&self, group: &str, kind: &str, name: &str) -> Option<&OperationResult> {
        self.results.iter().find(|r| {
            r.group == group && r.resource.kind == kind && r.resource.name == name
        })
    }

    /// `N/M resources succeeded`
    pub fn tally(&self) -> String {
        format!("{}/{} resources succeeded", self.succeeded(), self.total())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            writeln!(
                f,
                "{} (dry run): {} resources would be affected",
                self.operation,
                self.planned.len()
            )?;
            for action in &self.planned {
                writeln!(f, "  {} [{}] {}", action.group, action.target, action.resource)?;
            }
            return Ok(());
        }

        writeln!(f, "{}: {}", self.operation, self.tally())?;
        for result in self.failures() {
            match &result.failure {
                Some(failure) => writeln!(
                    f,
                    "  {} [{}] {} failed at {}: {}",
                    result.group, result.target, result.resource, failure.stage, failure.error
                )?,
                None => writeln!(
                    f,
                    "  {} [{}] {} was not validated",
                    result.group, result.target, result.resource
                )?,
            }
        }
        Ok(())
    }
}
