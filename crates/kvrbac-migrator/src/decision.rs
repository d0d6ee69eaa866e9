//! Pure decision logic for mutating actions: whether to simulate, ask or
//! proceed, how to read an operator's answer, and which status an outcome
//! is logged with.

use kvrbac_domain::{Action, Status};

/// How a mutating action is carried out under the run's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Dry-run: no call is made.
    Simulate,
    /// The operator must approve first.
    Ask,
    Proceed,
}

/// Dry-run wins over confirmation: a simulated action is never prompted for.
pub fn mutation_gate(what_if: bool, confirm: bool) -> Gate {
    match (what_if, confirm) {
        (true, _) => Gate::Simulate,
        (false, true) => Gate::Ask,
        (false, false) => Gate::Proceed,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Approve,
    Decline,
}

/// `y` or `yes` (any case) approves; anything else, including an empty line,
/// declines.
pub fn parse_answer(input: &str) -> Approval {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Approval::Approve,
        _ => Approval::Decline,
    }
}

/// Result of one add or remove attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Simulated,
    Applied,
    Declined,
    Failed(String),
}

impl Outcome {
    pub fn status(&self) -> Status {
        match self {
            Outcome::Simulated => Status::Simulated,
            Outcome::Applied => Status::Success,
            Outcome::Declined | Outcome::Failed(_) => Status::Error,
        }
    }

    /// Whether a follow-up removal of the old assignment may run.
    pub fn proceeds(&self) -> bool {
        matches!(self, Outcome::Simulated | Outcome::Applied)
    }

    pub fn message(&self, action: Action) -> String {
        let removing = action == Action::RemoveOld;
        match self {
            Outcome::Simulated if removing => "WhatIf: would remove old assignment".into(),
            Outcome::Simulated => "WhatIf: would add assignment".into(),
            Outcome::Applied if removing => "Removed old assignment".into(),
            Outcome::Applied => "Added assignment".into(),
            Outcome::Declined => "Declined by operator".into(),
            Outcome::Failed(msg) => msg.clone(),
        }
    }
}
