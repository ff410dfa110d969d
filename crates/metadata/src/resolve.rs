//! Flattening of configSets into an ordered execution plan.

use crate::error::ResolutionError;
use crate::types::{DEFAULT_CONFIG, DEFAULT_CONFIG_SET, Init, SetEntry};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One config to apply, in plan order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// configSet that directly lists this config
    pub config_set: String,
    /// Index of the step in the whole plan
    pub position: usize,
    /// Name of the config to apply
    pub config: String,
}

impl PlanStep {
    /// Stable `set/config` label, used to fingerprint plans across runs
    pub fn label(&self) -> String {
        format!("{}/{}", self.config_set, self.config)
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (configSet {})", self.config, self.config_set)
    }
}

/// The flattened run-list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    /// A plan running only the default config
    pub fn single() -> Self {
        Self {
            steps: vec![PlanStep {
                config_set: DEFAULT_CONFIG_SET.to_string(),
                position: 0,
                config: DEFAULT_CONFIG.to_string(),
            }],
        }
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// `set/config` labels of every step, in order
    pub fn labels(&self) -> Vec<String> {
        self.steps.iter().map(PlanStep::label).collect()
    }
}

/// Resolve the requested configSets into an execution plan.
///
/// A single-config document ignores `requested` and runs `"config"`.
/// Repeated configs are kept: a config listed twice runs twice.
pub fn resolve<S: AsRef<str>>(
    init: &Init,
    requested: &[S],
) -> Result<ExecutionPlan, ResolutionError> {
    let (config_sets, configs) = match init {
        Init::Single(_) => return Ok(ExecutionPlan::single()),
        Init::Sets {
            config_sets,
            configs,
        } => (config_sets, configs),
    };

    let mut walker = Walker {
        config_sets,
        has_config: |name: &str| configs.contains_key(name),
        stack: Vec::new(),
        steps: Vec::new(),
    };
    for name in requested {
        walker.expand(name.as_ref(), None)?;
    }

    Ok(ExecutionPlan {
        steps: walker.steps,
    })
}

struct Walker<'a, F> {
    config_sets: &'a IndexMap<String, Vec<SetEntry>>,
    has_config: F,
    /// configSets currently being expanded, outermost first
    stack: Vec<&'a str>,
    steps: Vec<PlanStep>,
}

impl<'a, F> Walker<'a, F>
where
    F: Fn(&str) -> bool,
{
    fn expand(&mut self, name: &str, referenced_from: Option<&str>) -> Result<(), ResolutionError> {
        let config_sets = self.config_sets;
        let Some((set_name, entries)) = config_sets.get_key_value(name) else {
            return Err(ResolutionError::UnknownSet {
                name: name.to_string(),
                referenced_from: referenced_from.map(str::to_string),
            });
        };

        if let Some(start) = self.stack.iter().position(|open| *open == name) {
            let mut path: Vec<String> = self.stack[start..].iter().map(|s| s.to_string()).collect();
            path.push(name.to_string());
            return Err(ResolutionError::Cycle { path });
        }

        self.stack.push(set_name.as_str());
        for entry in entries {
            match entry {
                SetEntry::Config(config) => {
                    if !(self.has_config)(config) {
                        return Err(ResolutionError::UnknownConfig {
                            set: set_name.clone(),
                            config: config.clone(),
                        });
                    }
                    self.steps.push(PlanStep {
                        config_set: set_name.clone(),
                        position: self.steps.len(),
                        config: config.clone(),
                    });
                }
                SetEntry::Set { config_set } => self.expand(config_set, Some(set_name))?,
            }
        }
        self.stack.pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_value;
    use serde_json::{Value, json};

    fn init(sets: Value, configs: &[&str]) -> Init {
        let mut section = json!({ "configSets": sets });
        for name in configs {
            section[*name] = json!({});
        }
        decode_value(json!({ "AWS::CloudFormation::Init": section }))
            .unwrap()
            .init
    }

    fn pairs(plan: &ExecutionPlan) -> Vec<(String, String)> {
        plan.steps()
            .iter()
            .map(|s| (s.config_set.clone(), s.config.clone()))
            .collect()
    }

    fn pair(set: &str, config: &str) -> (String, String) {
        (set.to_string(), config.to_string())
    }

    #[test]
    fn test_single_config_ignores_requested() {
        let init = Init::Single(crate::Config::default());
        let plan = resolve(&init, &["whatever"]).unwrap();
        assert_eq!(plan, ExecutionPlan::single());
        assert_eq!(plan.steps()[0].label(), "default/config");
    }

    #[test]
    fn test_empty_config_sets_runs_default_config() {
        let init = init(json!({}), &["config", "extra"]);
        let plan = resolve(&init, &["default", "web"]).unwrap();
        assert_eq!(plan, ExecutionPlan::single());
        assert_eq!(pairs(&plan), [pair("default", "config")]);
    }

    #[test]
    fn test_default_references_ascending() {
        let init = init(
            json!({
                "ascending": ["1", "2"],
                "descending": ["2", "1"],
                "default": [{ "ConfigSet": "ascending" }]
            }),
            &["1", "2"],
        );

        let plan = resolve(&init, &["default"]).unwrap();
        assert_eq!(pairs(&plan), [pair("ascending", "1"), pair("ascending", "2")]);
        let positions: Vec<_> = plan.steps().iter().map(|s| s.position).collect();
        assert_eq!(positions, [0, 1]);

        let plan = resolve(&init, &["descending", "ascending"]).unwrap();
        assert_eq!(
            pairs(&plan),
            [
                pair("descending", "2"),
                pair("descending", "1"),
                pair("ascending", "1"),
                pair("ascending", "2"),
            ]
        );
        assert_eq!(plan.steps()[3].position, 3);
    }

    #[test]
    fn test_nested_references_expand_in_place() {
        let init = init(
            json!({
                "inner": ["b"],
                "middle": ["a", { "ConfigSet": "inner" }, "c"],
                "outer": [{ "ConfigSet": "middle" }, "d"]
            }),
            &["a", "b", "c", "d"],
        );

        let plan = resolve(&init, &["outer"]).unwrap();
        assert_eq!(
            pairs(&plan),
            [
                pair("middle", "a"),
                pair("inner", "b"),
                pair("middle", "c"),
                pair("outer", "d"),
            ]
        );
    }

    #[test]
    fn test_repeated_configs_are_kept() {
        let init = init(json!({ "twice": ["a", "a"], "again": [{ "ConfigSet": "twice" }, "a"] }), &["a"]);
        let plan = resolve(&init, &["again"]).unwrap();
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_self_cycle() {
        let init = init(json!({ "loop": ["a", { "ConfigSet": "loop" }] }), &["a"]);
        let err = resolve(&init, &["loop"]).unwrap_err();
        assert_eq!(
            err,
            ResolutionError::Cycle {
                path: vec!["loop".to_string(), "loop".to_string()]
            }
        );
    }

    #[test]
    fn test_mutual_cycle_reports_path() {
        let init = init(
            json!({
                "start": [{ "ConfigSet": "x" }],
                "x": [{ "ConfigSet": "y" }],
                "y": [{ "ConfigSet": "x" }]
            }),
            &[],
        );
        let err = resolve(&init, &["start"]).unwrap_err();
        assert_eq!(err.to_string(), "configSet cycle: x -> y -> x");
    }

    #[test]
    fn test_same_set_twice_is_not_a_cycle() {
        let init = init(
            json!({ "base": ["a"], "both": [{ "ConfigSet": "base" }, { "ConfigSet": "base" }] }),
            &["a"],
        );
        assert_eq!(resolve(&init, &["both"]).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_set() {
        let init = init(json!({ "default": [{ "ConfigSet": "ghost" }] }), &[]);
        let err = resolve(&init, &["default"]).unwrap_err();
        assert_eq!(
            err,
            ResolutionError::UnknownSet {
                name: "ghost".to_string(),
                referenced_from: Some("default".to_string())
            }
        );

        let err = resolve(&init, &["missing"]).unwrap_err();
        assert_eq!(err.to_string(), "unknown configSet 'missing'");
    }

    #[test]
    fn test_unknown_config() {
        let init = init(json!({ "default": ["a", "b"] }), &["a"]);
        let err = resolve(&init, &["default"]).unwrap_err();
        assert_eq!(
            err,
            ResolutionError::UnknownConfig {
                set: "default".to_string(),
                config: "b".to_string()
            }
        );
    }
}
