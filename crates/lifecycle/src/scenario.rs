//! Scenario runner – execute scripted command flows from YAML files.

use crate::commands::{BridgeContext, CommandRegistry};
use crate::types::*;

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to parse scenario YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("scenario has no steps")]
    Empty,
}

/// Load a scenario from a YAML string.
pub fn load_scenario(yaml: &str) -> Result<Scenario, ScenarioError> {
    let scenario: Scenario = serde_yaml::from_str(yaml)?;
    if scenario.steps.is_empty() {
        return Err(ScenarioError::Empty);
    }
    Ok(scenario)
}

/// Execute every step in order and return the overall result. A step whose
/// status or data differs from its expectation fails the scenario but does
/// not stop it.
pub fn run_scenario(
    scenario: &Scenario,
    ctx: &BridgeContext,
    registry: &CommandRegistry,
) -> ScenarioResult {
    let mut step_results = Vec::with_capacity(scenario.steps.len());
    let mut overall = Status::Pass;

    for (i, step) in scenario.steps.iter().enumerate() {
        let r = registry.execute(&step.call, step.args.clone(), ctx);
        if r.status != step.expect_status {
            tracing::warn!(
                step = i,
                call = %step.call,
                expected = ?step.expect_status,
                actual = ?r.status,
                "scenario step status mismatch"
            );
            overall = Status::Fail;
        } else if let Some(expected) = step.expect_data.as_ref().filter(|e| **e != r.data) {
            tracing::warn!(
                step = i,
                call = %step.call,
                %expected,
                actual = %r.data,
                "scenario step data mismatch"
            );
            overall = Status::Fail;
        }
        step_results.push(r);
    }

    ScenarioResult {
        name: scenario.name.clone(),
        overall_status: overall,
        step_results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HostContext;
    use crate::host::ProcessHost;
    use crate::manager::LifecycleManager;
    use crate::testing::{FakeEngine, FakeNotifier};
    use std::sync::Arc;

    fn bridge(app: &std::path::Path) -> BridgeContext {
        let manager = Arc::new(LifecycleManager::new(HostContext::new(
            app,
            Arc::new(FakeEngine::default()),
        )));
        let host = Arc::new(ProcessHost::new(
            manager.clone(),
            Arc::new(FakeNotifier::default()),
        ));
        BridgeContext::new(manager, host)
    }

    #[test]
    fn test_parse_scenario() {
        let yaml = r#"
name: basic test
steps:
  - call: "applyConfig"
    args: { port: 8080 }
    expect_status: "pass"
  - call: "getHttpPort"
    expect_data: 8080
"#;
        let s = load_scenario(yaml).expect("should parse");
        assert_eq!(s.name, Some("basic test".into()));
        assert_eq!(s.steps.len(), 2);
        assert_eq!(s.steps[1].expect_status, Status::Pass);
        assert_eq!(s.steps[1].expect_data, Some(serde_json::json!(8080)));
    }

    #[test]
    fn test_parse_scenario_rejects_empty_and_garbage() {
        assert!(matches!(load_scenario("steps: []"), Err(ScenarioError::Empty)));
        assert!(matches!(load_scenario("steps: 3"), Err(ScenarioError::Parse(_))));
    }

    #[test]
    fn test_run_scenario_service_flow() {
        let yaml = r#"
name: start, reconfigure, stop
steps:
  - call: "applyConfig"
    args: { port: 9000, proxyMode: "custom", proxyHost: "10.0.0.5", proxyPort: 8888 }
  - call: "startService"
    expect_data: true
  - call: "applyConfig"
    args: { port: 9100 }
    expect_status: "error"
  - call: "getHttpPort"
    expect_data: 9000
  - call: "stopService"
  - call: "isServiceRunning"
    expect_data: false
"#;
        let app = tempfile::tempdir().unwrap();
        let ctx = bridge(app.path());
        let scenario = load_scenario(yaml).unwrap();
        let result = run_scenario(&scenario, &ctx, &CommandRegistry::new());
        assert_eq!(result.overall_status, Status::Pass);
        assert_eq!(result.step_results.len(), 6);
    }

    #[test]
    fn test_run_scenario_reports_mismatch_and_continues() {
        let yaml = r#"
steps:
  - call: "noSuchCommand"
  - call: "getHttpPort"
    expect_data: 1
  - call: "getHttpPort"
"#;
        let app = tempfile::tempdir().unwrap();
        let ctx = bridge(app.path());
        let scenario = load_scenario(yaml).unwrap();
        let result = run_scenario(&scenario, &ctx, &CommandRegistry::new());
        assert_eq!(result.overall_status, Status::Fail);
        assert_eq!(result.step_results.len(), 3);
        assert_eq!(result.step_results[2].status, Status::Pass);
    }
}
