use crate::error::Result;
use crate::patch::{BackupPolicy, PatchRule};
use crate::version;

/// Which bundled script a rule set targets, relative to the install root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptTarget {
    /// `out/vs/workbench/workbench.desktop.main.js`
    Workbench,
    /// `out/main.js`
    MainJs,
}

/// A patch-rule set applicable to one script within a version range. New app
/// builds get a new entry here; the engine mechanics never change.
#[derive(Debug)]
pub struct RuleSet {
    pub target: ScriptTarget,
    pub min_version: Option<&'static str>,
    pub max_version: Option<&'static str>,
    pub backup: BackupPolicy,
    pub rules: Vec<PatchRule>,
}

/// The rule sets whose version range contains `version`. Platform-scoped
/// rules inside a set are filtered later by the engine.
pub fn sets_for(version: &str) -> Result<Vec<RuleSet>> {
    let mut selected = Vec::new();
    for set in all_sets() {
        if version::compare(version, set.min_version, set.max_version)? {
            selected.push(set);
        }
    }
    Ok(selected)
}

fn all_sets() -> Vec<RuleSet> {
    vec![
        RuleSet {
            target: ScriptTarget::Workbench,
            min_version: None,
            max_version: None,
            backup: BackupPolicy::Timestamped,
            rules: workbench_rules(),
        },
        // main.js only carries the patchable machine-id shape from 0.45.0 on.
        RuleSet {
            target: ScriptTarget::MainJs,
            min_version: Some(version::MIN_PATCH_VERSION),
            max_version: None,
            backup: BackupPolicy::FixedSuffixIfAbsent,
            rules: main_js_rules(),
        },
    ]
}

// Minified fragments below are taken verbatim from shipped Cursor builds;
// identifier soup differs per platform bundle, hence the scoped variants.
fn workbench_rules() -> Vec<PatchRule> {
    use crate::platform::Platform;

    vec![
        // "Upgrade to Pro" button: swap the pay handler for a plain link.
        PatchRule::literal_for(
            Platform::Windows,
            r#"$(k,E(Ks,{title:"Upgrade to Pro",size:"small",get codicon(){return F.rocket},get onClick(){return t.pay}}),null)"#,
            r#"$(k,E(Ks,{title:"Pro",size:"small",get codicon(){return F.rocket},get onClick(){return function(){window.open("https://cursor.com","_blank")}}}),null)"#,
        ),
        PatchRule::literal_for(
            Platform::Linux,
            r#"$(k,E(Ks,{title:"Upgrade to Pro",size:"small",get codicon(){return F.rocket},get onClick(){return t.pay}}),null)"#,
            r#"$(k,E(Ks,{title:"Pro",size:"small",get codicon(){return F.rocket},get onClick(){return function(){window.open("https://cursor.com","_blank")}}}),null)"#,
        ),
        PatchRule::literal_for(
            Platform::MacOs,
            r#"M(x,I(as,{title:"Upgrade to Pro",size:"small",get codicon(){return $.rocket},get onClick(){return t.pay}}),null)"#,
            r#"M(x,I(as,{title:"Pro",size:"small",get codicon(){return $.rocket},get onClick(){return function(){window.open("https://cursor.com","_blank")}}}),null)"#,
        ),
        // Older bundles use a third identifier set for the same button.
        PatchRule::literal(
            r#"B(k,D(Ln,{title:"Upgrade to Pro",size:"small",get codicon(){return A.rocket},get onClick(){return t.pay}}),null)"#,
            r#"B(k,D(Ln,{title:"Pro",size:"small",get codicon(){return A.rocket},get onClick(){return function(){window.open("https://cursor.com","_blank")}}}),null)"#,
        ),
        // Trial badge and toast suppression.
        PatchRule::literal("<div>Pro Trial", "<div>Pro"),
        PatchRule::literal("notifications-toasts", "notifications-toasts hidden"),
        // Token-limit lookup short-circuits before consulting the model name.
        PatchRule::literal(
            r#"async getEffectiveTokenLimit(e){const n=e.modelName;if(!n)return 2e5;"#,
            r#"async getEffectiveTokenLimit(e){return 9000000;const n=e.modelName;if(!n)return 9e5;"#,
        ),
    ]
}

fn main_js_rules() -> Vec<PatchRule> {
    vec![
        PatchRule::nullish_fallback("getMachineId"),
        PatchRule::nullish_fallback("getMacMachineId"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_threshold_selects_workbench_only() {
        let sets = sets_for("0.44.9").unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].target, ScriptTarget::Workbench);
    }

    #[test]
    fn at_threshold_selects_both_scripts() {
        let sets = sets_for("0.45.0").unwrap();
        let targets: Vec<_> = sets.iter().map(|s| s.target).collect();
        assert!(targets.contains(&ScriptTarget::Workbench));
        assert!(targets.contains(&ScriptTarget::MainJs));
    }

    #[test]
    fn main_js_uses_fixed_suffix_backups() {
        let sets = sets_for("1.0.0").unwrap();
        let main = sets.iter().find(|s| s.target == ScriptTarget::MainJs).unwrap();
        assert_eq!(main.backup, BackupPolicy::FixedSuffixIfAbsent);
        let workbench = sets.iter().find(|s| s.target == ScriptTarget::Workbench).unwrap();
        assert_eq!(workbench.backup, BackupPolicy::Timestamped);
    }

    #[test]
    fn invalid_version_propagates() {
        assert!(sets_for("abc").is_err());
    }
}
