//! Stage plan per language target.

use crate::config::StageTimeouts;
use crate::core::{Language, StageKind};
use crate::stages::{
    CiStage, DocumentStage, FetchStage, GenerateStage, ProbeStage, PublishStage, ServeStage,
    SetupStage, Stage, StageSpec, TestStage,
};
use std::sync::Arc;

/// The fixed stage sequence for `language`.
///
/// Setup only runs for targets with a separate dependency install (Jest and
/// Julia packages). Documentation and CI are best-effort; every other stage
/// is required.
#[must_use]
pub fn default_plan(language: Language, timeouts: &StageTimeouts) -> Vec<StageSpec> {
    StageKind::ALL
        .into_iter()
        .filter(|kind| *kind != StageKind::Setup || matches!(language, Language::Html | Language::Julia))
        .map(|kind| {
            let timeout = timeouts.for_stage(kind);
            match kind {
                StageKind::Document | StageKind::Ci => StageSpec::best_effort(kind, timeout),
                _ => StageSpec::required(kind, timeout),
            }
        })
        .collect()
}

/// The built-in implementation of `kind`.
#[must_use]
pub fn default_stage(kind: StageKind) -> Arc<dyn Stage> {
    match kind {
        StageKind::Fetch => Arc::new(FetchStage),
        StageKind::Generate => Arc::new(GenerateStage),
        StageKind::Setup => Arc::new(SetupStage),
        StageKind::Serve => Arc::new(ServeStage::new()),
        StageKind::Probe => Arc::new(ProbeStage),
        StageKind::Test => Arc::new(TestStage),
        StageKind::Document => Arc::new(DocumentStage),
        StageKind::Ci => Arc::new(CiStage),
        StageKind::Publish => Arc::new(PublishStage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StagePolicy;
    use pretty_assertions::assert_eq;

    fn kinds(language: Language) -> Vec<StageKind> {
        default_plan(language, &StageTimeouts::default())
            .into_iter()
            .map(|s| s.stage)
            .collect()
    }

    #[test]
    fn test_python_has_no_setup() {
        assert_eq!(
            kinds(Language::Python),
            vec![
                StageKind::Fetch,
                StageKind::Generate,
                StageKind::Serve,
                StageKind::Probe,
                StageKind::Test,
                StageKind::Document,
                StageKind::Ci,
                StageKind::Publish,
            ]
        );
    }

    #[test]
    fn test_html_and_julia_install_before_serving() {
        for language in [Language::Html, Language::Julia] {
            let plan = kinds(language);
            let setup = plan.iter().position(|k| *k == StageKind::Setup).unwrap();
            let serve = plan.iter().position(|k| *k == StageKind::Serve).unwrap();
            assert!(setup < serve);
        }
    }

    #[test]
    fn test_policies() {
        for spec in default_plan(Language::Julia, &StageTimeouts::default()) {
            let expected = match spec.stage {
                StageKind::Document | StageKind::Ci => StagePolicy::BestEffort,
                _ => StagePolicy::Required,
            };
            assert_eq!(spec.policy, expected, "{}", spec.stage);
        }
    }

    #[test]
    fn test_default_stage_kinds_match() {
        for kind in StageKind::ALL {
            assert_eq!(default_stage(kind).kind(), kind);
        }
    }
}
