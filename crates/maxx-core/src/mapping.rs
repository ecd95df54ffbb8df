use maxx_common::{ClientType, MappingScope, glob_match};
use maxx_storage::entities::model_mappings;

/// Scope ids available when resolving a mapping for one candidate route.
#[derive(Debug, Clone, Copy, Default)]
pub struct MappingContext {
    pub route_id: Option<i64>,
    pub api_token_id: Option<i64>,
    pub project_id: Option<i64>,
    pub provider_id: Option<i64>,
    pub client_type: Option<ClientType>,
    pub provider_type: Option<&'static str>,
}

/// Resolve the effective model: eligible mappings ordered by priority
/// ascending, ties broken by scope specificity (route beats global).
/// First match wins; `None` means the request model stands.
pub fn resolve_mapped_model(
    mappings: &[model_mappings::Model],
    ctx: &MappingContext,
    model: &str,
) -> Option<String> {
    let mut best: Option<(&model_mappings::Model, u8)> = None;
    for mapping in mappings {
        let Some(scope) = MappingScope::parse(&mapping.scope) else {
            continue;
        };
        if !scope_applies(scope, mapping.scope_id, ctx) {
            continue;
        }
        if let Some(filter) = &mapping.client_type
            && ctx.client_type.map(|ct| ct.as_str()) != Some(filter.as_str())
        {
            continue;
        }
        if let Some(filter) = &mapping.provider_type
            && ctx.provider_type != Some(filter.as_str())
        {
            continue;
        }
        if !glob_match(&mapping.pattern, model) {
            continue;
        }
        let specificity = scope.specificity();
        let wins = match best {
            None => true,
            Some((current, current_specificity)) => {
                mapping.priority < current.priority
                    || (mapping.priority == current.priority
                        && specificity > current_specificity)
            }
        };
        if wins {
            best = Some((mapping, specificity));
        }
    }
    best.map(|(mapping, _)| mapping.target.clone())
}

fn scope_applies(scope: MappingScope, scope_id: Option<i64>, ctx: &MappingContext) -> bool {
    match scope {
        MappingScope::Global => true,
        MappingScope::Provider => scope_id.is_some() && scope_id == ctx.provider_id,
        MappingScope::Project => scope_id.is_some() && scope_id == ctx.project_id,
        MappingScope::ApiToken => scope_id.is_some() && scope_id == ctx.api_token_id,
        MappingScope::Route => scope_id.is_some() && scope_id == ctx.route_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn mapping(
        scope: &str,
        scope_id: Option<i64>,
        pattern: &str,
        target: &str,
        priority: i32,
    ) -> model_mappings::Model {
        model_mappings::Model {
            id: 0,
            scope: scope.into(),
            scope_id,
            client_type: None,
            provider_type: None,
            pattern: pattern.into(),
            target: target.into(),
            priority,
            is_enabled: true,
            is_builtin: false,
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn builtin_sonnet_rule_applies() {
        let mappings = vec![mapping("global", None, "*sonnet*", "claude-sonnet-4-5", 1000)];
        let ctx = MappingContext::default();
        assert_eq!(
            resolve_mapped_model(&mappings, &ctx, "claude-3-5-sonnet-20241022").as_deref(),
            Some("claude-sonnet-4-5")
        );
        assert_eq!(resolve_mapped_model(&mappings, &ctx, "gpt-4o"), None);
    }

    #[test]
    fn lower_priority_wins() {
        let mappings = vec![
            mapping("global", None, "m", "low-priority", 100),
            mapping("global", None, "m", "high-priority", 10),
        ];
        assert_eq!(
            resolve_mapped_model(&mappings, &MappingContext::default(), "m").as_deref(),
            Some("high-priority")
        );
    }

    #[test]
    fn equal_priority_breaks_on_specificity() {
        let mappings = vec![
            mapping("global", None, "m", "from-global", 50),
            mapping("route", Some(9), "m", "from-route", 50),
        ];
        let ctx = MappingContext {
            route_id: Some(9),
            ..Default::default()
        };
        assert_eq!(
            resolve_mapped_model(&mappings, &ctx, "m").as_deref(),
            Some("from-route")
        );
    }

    #[test]
    fn foreign_scope_never_matches() {
        let mappings = vec![mapping("route", Some(9), "*", "hijack", 1)];
        let ctx = MappingContext {
            route_id: Some(4),
            ..Default::default()
        };
        assert_eq!(resolve_mapped_model(&mappings, &ctx, "anything"), None);
    }
}
