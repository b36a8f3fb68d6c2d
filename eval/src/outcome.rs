use gym::core::types::TurnStatus;
use gym::cycle::CycleOutcome;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Fail,
    Error,
}

/// Success needs every turn `ok` and every check passing; a turn that never
/// finished cleanly is an error regardless of the checks.
pub fn classify_outcome(cycle: &CycleOutcome) -> Outcome {
    if cycle.turns.iter().any(|t| t.status != TurnStatus::Ok) {
        return Outcome::Error;
    }
    if cycle.checks.iter().all(|c| c.passed) {
        Outcome::Success
    } else {
        Outcome::Fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gym::core::types::{CheckResult, ExpectationKind, ExpectationRef, TurnResult};

    fn check(passed: bool) -> CheckResult {
        let expectation = ExpectationRef {
            kind: ExpectationKind::File,
            target: "a.txt".to_string(),
        };
        if passed {
            CheckResult::pass(expectation, "ok")
        } else {
            CheckResult::fail(expectation, "missing")
        }
    }

    fn turn(status: TurnStatus) -> TurnResult {
        TurnResult {
            status,
            ..TurnResult::spawn_failed("p", String::new())
        }
    }

    fn cycle(status: TurnStatus, passed: bool) -> CycleOutcome {
        CycleOutcome {
            turns: vec![turn(status)],
            diffs: Vec::new(),
            checks: vec![check(passed)],
            passed: status == TurnStatus::Ok && passed,
        }
    }

    #[test]
    fn success_when_turns_ok_and_checks_pass() {
        assert_eq!(classify_outcome(&cycle(TurnStatus::Ok, true)), Outcome::Success);
    }

    #[test]
    fn fail_when_turns_ok_but_checks_fail() {
        assert_eq!(classify_outcome(&cycle(TurnStatus::Ok, false)), Outcome::Fail);
    }

    #[test]
    fn error_when_any_turn_did_not_finish() {
        assert_eq!(
            classify_outcome(&cycle(TurnStatus::TimedOut, true)),
            Outcome::Error
        );
        assert_eq!(
            classify_outcome(&cycle(TurnStatus::SpawnFailed, false)),
            Outcome::Error
        );
    }
}
