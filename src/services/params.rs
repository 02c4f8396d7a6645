//! Parameter resolution.
//!
//! Precedence, lowest to highest: pipeline defaults, application
//! overrides, caller-supplied trigger parameters, VCS-derived keys,
//! canonical injected keys. Merging is upsert-by-name: a replacement
//! keeps the original position, a new name appends, so order within a
//! source is preserved and later sources win on collision.
//!
//! The resolver is pure: the VCS lookups happen in the coordinator before
//! the transaction and arrive here as plain data.

use crate::models::entity::User;
use crate::models::parameter::Parameter;

/// VCS-derived values captured by the coordinator. `author`/`message` are
/// only present when the commit could be fetched; clone URLs only when the
/// repository resolved.
#[derive(Debug, Clone, Default)]
pub struct VcsValues {
    pub branch: String,
    pub hash: String,
    pub author: Option<String>,
    pub message: Option<String>,
    pub ssh_url: Option<String>,
    pub http_url: Option<String>,
}

/// Identity of the build under creation, injected at highest precedence.
#[derive(Debug, Clone)]
pub struct CanonicalKeys<'a> {
    pub project_key: &'a str,
    pub pipeline_name: &'a str,
    pub application_name: &'a str,
    pub environment_name: &'a str,
    pub build_number: i64,
    pub version: i64,
    pub triggered_by: Option<&'a User>,
}

/// Upsert every parameter of `source` into `target`.
fn merge(target: &mut Vec<Parameter>, source: &[Parameter]) {
    for param in source {
        match target.iter_mut().find(|p| p.name == param.name) {
            Some(existing) => {
                existing.kind = param.kind;
                existing.value = param.value.clone();
            }
            None => target.push(param.clone()),
        }
    }
}

fn upsert(target: &mut Vec<Parameter>, name: &str, value: impl Into<String>) {
    merge(target, &[Parameter::string(name, value)]);
}

/// Assemble the final parameter list for a new build.
pub fn resolve(
    pipeline_defaults: &[Parameter],
    application_overrides: &[Parameter],
    trigger_params: &[Parameter],
    vcs: &VcsValues,
    canonical: &CanonicalKeys<'_>,
) -> Vec<Parameter> {
    let mut params = Vec::new();
    merge(&mut params, pipeline_defaults);
    merge(&mut params, application_overrides);
    merge(&mut params, trigger_params);

    upsert(&mut params, "git.branch", &vcs.branch);
    upsert(&mut params, "git.hash", &vcs.hash);
    if let Some(author) = &vcs.author {
        upsert(&mut params, "git.author", author);
    }
    if let Some(message) = &vcs.message {
        upsert(&mut params, "git.message", message);
    }
    if let Some(url) = &vcs.ssh_url {
        upsert(&mut params, "git.url", url);
    }
    if let Some(url) = &vcs.http_url {
        upsert(&mut params, "git.http_url", url);
    }

    upsert(&mut params, "cds.pipeline", canonical.pipeline_name);
    upsert(&mut params, "cds.project", canonical.project_key);
    upsert(&mut params, "cds.application", canonical.application_name);
    upsert(&mut params, "cds.environment", canonical.environment_name);
    upsert(&mut params, "cds.buildNumber", canonical.build_number.to_string());
    upsert(&mut params, "cds.version", canonical.version.to_string());
    if let Some(user) = canonical.triggered_by {
        upsert(&mut params, "cds.triggered_by.username", &user.username);
        upsert(&mut params, "cds.triggered_by.fullname", &user.fullname);
        upsert(&mut params, "cds.triggered_by.email", &user.email);
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parameter::value_of;

    fn canonical<'a>(user: Option<&'a User>) -> CanonicalKeys<'a> {
        CanonicalKeys {
            project_key: "ACME",
            pipeline_name: "build-shop",
            application_name: "shop",
            environment_name: "production",
            build_number: 1,
            version: 1,
            triggered_by: user,
        }
    }

    fn vcs_main() -> VcsValues {
        VcsValues {
            branch: "main".into(),
            hash: "abc123".into(),
            ..VcsValues::default()
        }
    }

    #[test]
    fn canonical_keys_always_present() {
        let params = resolve(&[], &[], &[], &vcs_main(), &canonical(None));
        for key in [
            "cds.pipeline",
            "cds.project",
            "cds.application",
            "cds.environment",
            "cds.buildNumber",
            "cds.version",
            "git.branch",
            "git.hash",
        ] {
            assert!(value_of(&params, key).is_some(), "missing {key}");
        }
        assert_eq!(value_of(&params, "cds.buildNumber"), Some("1"));
        assert_eq!(value_of(&params, "git.branch"), Some("main"));
        assert_eq!(value_of(&params, "git.hash"), Some("abc123"));
        // No commit metadata without a responsive VCS.
        assert!(value_of(&params, "git.author").is_none());
        assert!(value_of(&params, "git.url").is_none());
    }

    #[test]
    fn higher_precedence_wins_keeping_position() {
        let defaults = vec![
            Parameter::string("retries", "1"),
            Parameter::string("target", "staging"),
        ];
        let overrides = vec![Parameter::string("retries", "3")];
        let caller = vec![Parameter::string("target", "production")];

        let params = resolve(&defaults, &overrides, &caller, &vcs_main(), &canonical(None));

        assert_eq!(params[0].name, "retries");
        assert_eq!(params[0].value, "3");
        assert_eq!(params[1].name, "target");
        assert_eq!(params[1].value, "production");
    }

    #[test]
    fn canonical_overrides_caller_spoofing() {
        let caller = vec![Parameter::string("cds.buildNumber", "999")];
        let params = resolve(&[], &[], &caller, &vcs_main(), &canonical(None));
        assert_eq!(value_of(&params, "cds.buildNumber"), Some("1"));
    }

    #[test]
    fn triggered_by_keys_injected_for_manual_builds() {
        let user = User {
            id: 9,
            username: "ada".into(),
            fullname: "Ada Lovelace".into(),
            email: "ada@acme.io".into(),
        };
        let params = resolve(&[], &[], &[], &vcs_main(), &canonical(Some(&user)));
        assert_eq!(value_of(&params, "cds.triggered_by.username"), Some("ada"));
        assert_eq!(
            value_of(&params, "cds.triggered_by.fullname"),
            Some("Ada Lovelace")
        );
        assert_eq!(
            value_of(&params, "cds.triggered_by.email"),
            Some("ada@acme.io")
        );
    }

    #[test]
    fn vcs_enrichment_keys_present_when_resolvable() {
        let vcs = VcsValues {
            branch: "main".into(),
            hash: "abc123".into(),
            author: Some("ada".into()),
            message: Some("fix checkout".into()),
            ssh_url: Some("git@vcs:acme/shop.git".into()),
            http_url: Some("https://vcs/acme/shop.git".into()),
        };
        let params = resolve(&[], &[], &[], &vcs, &canonical(None));
        assert_eq!(value_of(&params, "git.author"), Some("ada"));
        assert_eq!(value_of(&params, "git.message"), Some("fix checkout"));
        assert_eq!(value_of(&params, "git.url"), Some("git@vcs:acme/shop.git"));
        assert_eq!(
            value_of(&params, "git.http_url"),
            Some("https://vcs/acme/shop.git")
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_params() -> impl Strategy<Value = Vec<Parameter>> {
            proptest::collection::vec(
                ("[a-d]{1,2}", "[a-z]{0,4}")
                    .prop_map(|(name, value)| Parameter::string(name, value)),
                0..8,
            )
        }

        proptest! {
            #[test]
            fn resolved_names_are_unique(
                defaults in arb_params(),
                overrides in arb_params(),
                caller in arb_params(),
            ) {
                let params = resolve(&defaults, &overrides, &caller, &vcs_main(), &canonical(None));
                let mut names: Vec<_> = params.iter().map(|p| p.name.clone()).collect();
                names.sort();
                names.dedup();
                prop_assert_eq!(names.len(), params.len(), "duplicate names survived merge");
            }

            #[test]
            fn last_writer_wins_within_one_source(caller in arb_params()) {
                let params = resolve(&[], &[], &caller, &vcs_main(), &canonical(None));
                for p in &caller {
                    let expected = caller.iter().rfind(|c| c.name == p.name).unwrap();
                    prop_assert_eq!(
                        crate::models::parameter::value_of(&params, &p.name).unwrap(),
                        expected.value.as_str()
                    );
                }
            }
        }
    }
}
