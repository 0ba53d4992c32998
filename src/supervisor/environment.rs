//! Child process environment assembly.
//!
//! The spawned CLI inherits the server's environment with two curations:
//! variables that would confuse a nested CLI run are stripped, and stored
//! credentials are injected so agent code can reach the services the user
//! has configured. Project-scoped overrides win over global credentials.

use std::collections::HashMap;

/// Variables stripped from the inherited environment before spawning.
///
/// `CLAUDECODE` marks an already-running CLI and would trip the child's
/// nesting detection. `ANTHROPIC_API_KEY` is the server's own key for
/// title generation; the child must authenticate with its subscription,
/// not the user's metered key.
pub const STRIPPED_ENV_VARS: &[&str] = &["CLAUDECODE", "ANTHROPIC_API_KEY"];

/// Credential variable reserved for server-side title generation; never
/// injected into a child even when stored as a global credential.
pub const TITLE_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Merge the child environment from its four sources.
///
/// Precedence, lowest to highest: inherited server environment (minus
/// [`STRIPPED_ENV_VARS`]), global credentials (minus `excluded` and
/// [`TITLE_KEY_VAR`]), project-scoped overrides.
#[must_use]
pub fn merge_env(
    inherited: impl IntoIterator<Item = (String, String)>,
    globals: HashMap<String, String>,
    excluded: &[String],
    overrides: HashMap<String, String>,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = inherited
        .into_iter()
        .filter(|(key, _)| !STRIPPED_ENV_VARS.contains(&key.as_str()))
        .collect();

    for (key, value) in globals {
        if key == TITLE_KEY_VAR || excluded.contains(&key) {
            continue;
        }
        env.insert(key, value);
    }

    env.extend(overrides);
    env
}
