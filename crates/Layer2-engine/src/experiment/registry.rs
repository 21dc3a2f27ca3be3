//! Experiment registry

use super::example::ExampleMeasurer;
use super::{ExperimentMeasurer, InputPolicy, OptionKind, OptionSpec};
use probe_foundation::OptionValue;
use std::collections::BTreeMap;

type Factory = fn(&ExperimentSpec, &BTreeMap<String, OptionValue>) -> Box<dyn ExperimentMeasurer>;

/// Static description of a runnable experiment
pub struct ExperimentSpec {
    pub name: &'static str,
    pub input_policy: InputPolicy,
    /// Whether a running measurement stops early on cancellation
    pub interruptible: bool,
    pub options: &'static [OptionSpec],
    factory: Factory,
}

impl ExperimentSpec {
    pub fn option(&self, name: &str) -> Option<&OptionSpec> {
        self.options.iter().find(|o| o.name == name)
    }

    pub(crate) fn build(&self, options: &BTreeMap<String, OptionValue>) -> Box<dyn ExperimentMeasurer> {
        (self.factory)(self, options)
    }
}

impl std::fmt::Debug for ExperimentSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentSpec")
            .field("name", &self.name)
            .field("input_policy", &self.input_policy)
            .field("interruptible", &self.interruptible)
            .finish()
    }
}

const EXAMPLE_OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        name: "sleep_time_ms",
        kind: OptionKind::Int,
        doc: "how long each measurement lasts",
    },
    OptionSpec {
        name: "return_error",
        kind: OptionKind::Bool,
        doc: "fail every measurement",
    },
    OptionSpec {
        name: "message",
        kind: OptionKind::Str,
        doc: "message logged when a measurement starts",
    },
];

fn build_example(
    spec: &ExperimentSpec,
    options: &BTreeMap<String, OptionValue>,
) -> Box<dyn ExperimentMeasurer> {
    Box::new(ExampleMeasurer::from_options(spec.name, spec.interruptible, options))
}

fn build_failing_example(
    spec: &ExperimentSpec,
    options: &BTreeMap<String, OptionValue>,
) -> Box<dyn ExperimentMeasurer> {
    let mut options = options.clone();
    options.insert("return_error".into(), OptionValue::Bool(true));
    Box::new(ExampleMeasurer::from_options(spec.name, spec.interruptible, &options))
}

static REGISTRY: &[ExperimentSpec] = &[
    ExperimentSpec {
        name: "example",
        input_policy: InputPolicy::None,
        interruptible: true,
        options: EXAMPLE_OPTIONS,
        factory: build_example,
    },
    ExperimentSpec {
        name: "example_with_input",
        input_policy: InputPolicy::Required,
        interruptible: true,
        options: EXAMPLE_OPTIONS,
        factory: build_example,
    },
    ExperimentSpec {
        name: "example_with_failure",
        input_policy: InputPolicy::None,
        interruptible: true,
        options: EXAMPLE_OPTIONS,
        factory: build_failing_example,
    },
    ExperimentSpec {
        name: "example_with_input_non_interruptible",
        input_policy: InputPolicy::Required,
        interruptible: false,
        options: EXAMPLE_OPTIONS,
        factory: build_example,
    },
];

/// Find an experiment by (possibly CamelCase) name
pub fn lookup(name: &str) -> Option<&'static ExperimentSpec> {
    let name = canonical_name(name);
    REGISTRY.iter().find(|spec| spec.name == name)
}

/// `ExampleWithInput` → `example_with_input`
///
/// Snake-case names pass through unchanged.
pub fn canonical_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
                if prev.is_ascii_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_ascii_uppercase() && next_is_lower)
                {
                    out.push('_');
                }
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
