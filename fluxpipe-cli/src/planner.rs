//! Scenario Planner
//!
//! Builds the fixed scenario suite and filters it.
//!
//! Suite order:
//! - single-stream scenarios, synchronized rounds, full reps
//! - loaded scenarios for every parallel level, deferred join, half reps
//! - single-threaded transform scenarios, synchronized rounds, half reps
//!
//! Filtering is a regex match on the scenario name; order is preserved.

use crate::supervisor::{TestConfiguration, TransformCommands};
use regex::Regex;

/// Inputs for building the suite
#[derive(Debug, Clone)]
pub struct SuiteSettings {
    /// Reps per round for single-stream scenarios, halved for the rest
    pub reps: u32,
    /// Rounds per scenario
    pub rounds: u32,
    /// Worker counts for loaded scenarios
    pub parallel_levels: Vec<u32>,
    /// Flag asking the transform to run single-threaded
    pub single_thread_flag: String,
    /// Flag asking the transform to skip its own verification
    pub skip_verify_flag: String,
    /// Compare output digests
    pub verify: bool,
}

impl Default for SuiteSettings {
    fn default() -> Self {
        Self {
            reps: 8,
            rounds: 1,
            parallel_levels: vec![2, 4, 6, 8, 12, 16],
            single_thread_flag: "-singlethread".to_string(),
            skip_verify_flag: "-skipverify".to_string(),
            verify: true,
        }
    }
}

/// One named measurement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub name: String,
    pub config: TestConfiguration,
    pub commands: TransformCommands,
}

/// Ordered scenarios to run
pub struct ExecutionPlan {
    pub scenarios: Vec<Scenario>,
}

/// Build the full suite in execution order
pub fn build_suite(settings: &SuiteSettings, commands: &TransformCommands) -> Vec<Scenario> {
    let single = TestConfiguration {
        parallel_encode_workers: 1,
        parallel_decode_workers: 1,
        reps_per_round: settings.reps.max(1),
        round_count: settings.rounds.max(1),
        synchronize_every_round: true,
        verify: settings.verify,
    };
    let encode_only = |cfg: TestConfiguration, workers: u32| TestConfiguration {
        parallel_encode_workers: workers,
        parallel_decode_workers: 0,
        ..cfg
    };
    let decode_only = |cfg: TestConfiguration, workers: u32| TestConfiguration {
        parallel_encode_workers: 0,
        parallel_decode_workers: workers,
        ..cfg
    };
    let skip_verify = commands.with_flag(&settings.skip_verify_flag);
    let single_thread = commands.with_flag(&settings.single_thread_flag);
    let scenario = |name: String, config: TestConfiguration, commands: &TransformCommands| {
        Scenario {
            name,
            config,
            commands: commands.clone(),
        }
    };

    let mut suite = vec![
        scenario(
            "Verified encode followed by decode".to_string(),
            single,
            commands,
        ),
        scenario("Verified encode".to_string(), encode_only(single, 1), commands),
        scenario(
            "Unverified encode".to_string(),
            encode_only(single, 1),
            &skip_verify,
        ),
        scenario("decode".to_string(), decode_only(single, 1), commands),
    ];

    let halved = TestConfiguration {
        reps_per_round: (settings.reps / 2).max(1),
        ..single
    };
    let loaded = TestConfiguration {
        synchronize_every_round: false,
        ..halved
    };
    for &p in &settings.parallel_levels {
        if p == 0 {
            continue;
        }
        suite.push(scenario(
            format!("Loaded {} Verified encode", p),
            encode_only(loaded, p),
            commands,
        ));
        suite.push(scenario(
            format!("Loaded {} Unverified encode", p),
            encode_only(loaded, p),
            &skip_verify,
        ));
        suite.push(scenario(
            format!("Loaded {} decode", p),
            decode_only(loaded, p),
            commands,
        ));
    }

    suite.push(scenario(
        "1-way encode followed by decode".to_string(),
        halved,
        &single_thread,
    ));
    suite.push(scenario(
        "1-way encode".to_string(),
        encode_only(halved, 1),
        &single_thread,
    ));
    suite.push(scenario(
        "1-way decode".to_string(),
        decode_only(halved, 1),
        &single_thread,
    ));

    suite
}

/// Keep scenarios whose name matches `filter`, in suite order
pub fn build_plan(scenarios: Vec<Scenario>, filter: Option<&Regex>) -> ExecutionPlan {
    let scenarios = scenarios
        .into_iter()
        .filter(|s| filter.is_none_or(|re| re.is_match(&s.name)))
        .collect();
    ExecutionPlan { scenarios }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxpipe_core::CommandSpec;

    fn commands() -> TransformCommands {
        TransformCommands::symmetric(CommandSpec::new("lepton").arg("-"))
    }

    #[test]
    fn test_suite_names_in_order() {
        let suite = build_suite(&SuiteSettings::default(), &commands());
        let names: Vec<&str> = suite.iter().map(|s| s.name.as_str()).collect();

        assert_eq!(suite.len(), 4 + 6 * 3 + 3);
        assert_eq!(
            &names[..4],
            &[
                "Verified encode followed by decode",
                "Verified encode",
                "Unverified encode",
                "decode"
            ]
        );
        assert_eq!(
            &names[4..7],
            &[
                "Loaded 2 Verified encode",
                "Loaded 2 Unverified encode",
                "Loaded 2 decode"
            ]
        );
        assert_eq!(names[names.len() - 4], "Loaded 16 decode");
        assert_eq!(
            &names[names.len() - 3..],
            &[
                "1-way encode followed by decode",
                "1-way encode",
                "1-way decode"
            ]
        );
    }

    #[test]
    fn test_suite_configurations() {
        let suite = build_suite(&SuiteSettings::default(), &commands());

        let first = &suite[0].config;
        assert_eq!(first.operation_count(), 2);
        assert_eq!(first.reps_per_round, 8);
        assert!(first.synchronize_every_round);

        let loaded = suite
            .iter()
            .find(|s| s.name == "Loaded 6 decode")
            .unwrap();
        assert_eq!(loaded.config.parallel_decode_workers, 6);
        assert_eq!(loaded.config.parallel_encode_workers, 0);
        assert_eq!(loaded.config.reps_per_round, 4);
        assert!(!loaded.config.synchronize_every_round);

        let one_way = suite.last().unwrap();
        assert_eq!(one_way.config.reps_per_round, 4);
        assert!(one_way.config.synchronize_every_round);
        assert!(one_way.commands.decode.has_flag("-singlethread"));
    }

    #[test]
    fn test_flags_forwarded() {
        let suite = build_suite(&SuiteSettings::default(), &commands());
        let unverified = &suite[2];
        assert!(unverified.commands.encode.has_flag("-skipverify"));
        assert!(!suite[1].commands.encode.has_flag("-skipverify"));
        assert_eq!(unverified.commands.encode.to_string(), "lepton - -skipverify");
    }

    #[test]
    fn test_regex_filter_preserves_order() {
        let suite = build_suite(&SuiteSettings::default(), &commands());
        let re = Regex::new("^Loaded (2|16) ").unwrap();
        let plan = build_plan(suite, Some(&re));
        let names: Vec<&str> = plan.scenarios.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names.len(), 6);
        assert_eq!(names[0], "Loaded 2 Verified encode");
        assert_eq!(names[5], "Loaded 16 decode");
    }

    #[test]
    fn test_no_filter_keeps_everything() {
        let suite = build_suite(&SuiteSettings::default(), &commands());
        let len = suite.len();
        assert_eq!(build_plan(suite, None).scenarios.len(), len);
    }

    #[test]
    fn test_single_rep_is_not_halved_to_zero() {
        let settings = SuiteSettings {
            reps: 1,
            parallel_levels: vec![2],
            ..SuiteSettings::default()
        };
        let suite = build_suite(&settings, &commands());
        assert!(suite.iter().all(|s| s.config.reps_per_round == 1));
    }
}
