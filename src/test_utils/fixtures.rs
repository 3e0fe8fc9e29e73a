use crate::bundler::model::{Bundle, GeneratedAgent};

/// An agent whose content clears the minimum length.
#[must_use]
pub fn agent(name: &str) -> GeneratedAgent {
    GeneratedAgent::new(
        name,
        format!(
            "You are {name}. Read the user's request carefully, answer with concise and \
             correct output, and explain any assumptions you had to make along the way."
        ),
    )
    .with_role(format!("{name} role"))
    .with_capabilities(["read", "write"])
}

/// `demo_bundle` v1.0.0 with the single agent `echo_agent`.
#[must_use]
pub fn demo_bundle() -> Bundle {
    let echo = GeneratedAgent::new(
        "echo_agent",
        "You are an echo agent. Repeat every message back to the user verbatim, \
         preserving whitespace and punctuation exactly as received.",
    )
    .with_role("Echoes input")
    .with_capabilities(["echo"])
    .with_tests("Given 'hi', respond 'hi'.")
    .with_documentation("Echo agent usage notes.");
    Bundle::new("demo_bundle", "1.0.0", "Echo demo bundle", vec![echo])
}

#[must_use]
pub fn bundle_with_agents(name: &str, version: &str, agents: &[&str]) -> Bundle {
    Bundle::new(
        name,
        version,
        format!("{name} test bundle"),
        agents.iter().map(|n| agent(n)).collect(),
    )
}
