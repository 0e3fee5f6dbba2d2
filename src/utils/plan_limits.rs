use serde::Serialize;

use crate::models::plan::{PlanDefinition, Resource, UNLIMITED};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitCheck {
    pub allowed: bool,
    pub limit: i64,
    pub remaining: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanLimitError {
    #[error("{} limit of {limit} reached", .resource.as_str())]
    LimitReached { resource: Resource, limit: i64 },
}

/// Checks whether one more `resource` may be created given `current_count`.
///
/// Must run before the resource is created: a count equal to the limit is
/// already at the cap.
pub fn check_limit(plan: &PlanDefinition, resource: Resource, current_count: i64) -> LimitCheck {
    let limit = plan.limits.limit_for(resource);
    if limit == UNLIMITED {
        return LimitCheck {
            allowed: true,
            limit,
            remaining: UNLIMITED,
        };
    }

    let remaining = (limit - current_count.max(0)).max(0);
    LimitCheck {
        allowed: remaining > 0,
        limit,
        remaining,
    }
}

pub fn ensure_within_limit(
    plan: &PlanDefinition,
    resource: Resource,
    current_count: i64,
) -> Result<LimitCheck, PlanLimitError> {
    let check = check_limit(plan, resource, current_count);
    if check.allowed {
        Ok(check)
    } else {
        Err(PlanLimitError::LimitReached {
            resource,
            limit: check.limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plan::{plan_definition, PlanTier, ResourceLimits};

    fn plan_with_project_limit(limit: i64) -> PlanDefinition {
        PlanDefinition {
            id: PlanTier::Free,
            name: "Test",
            base_price_usd: 0,
            limits: ResourceLimits {
                max_projects: limit,
                max_applications: limit,
                ai_tokens_per_month: limit,
            },
            features: &[],
        }
    }

    #[test]
    fn single_slot_plan() {
        let plan = plan_with_project_limit(1);
        assert_eq!(
            check_limit(&plan, Resource::Projects, 0),
            LimitCheck {
                allowed: true,
                limit: 1,
                remaining: 1
            }
        );
        assert_eq!(
            check_limit(&plan, Resource::Projects, 1),
            LimitCheck {
                allowed: false,
                limit: 1,
                remaining: 0
            }
        );
    }

    #[test]
    fn unlimited_is_always_allowed() {
        let plan = plan_with_project_limit(UNLIMITED);
        let check = check_limit(&plan, Resource::Projects, 1_000_000);
        assert!(check.allowed);
        assert_eq!(check.remaining, UNLIMITED);
        assert_eq!(check.limit, UNLIMITED);
    }

    #[test]
    fn over_the_cap_never_goes_negative() {
        let plan = plan_with_project_limit(3);
        let check = check_limit(&plan, Resource::Applications, 10);
        assert!(!check.allowed);
        assert_eq!(check.remaining, 0);

        let check = check_limit(&plan, Resource::Applications, -5);
        assert_eq!(check.remaining, 3);
    }

    #[test]
    fn ensure_within_limit_reports_resource() {
        let free = plan_definition(PlanTier::Free);
        assert!(ensure_within_limit(free, Resource::Projects, 0).is_ok());
        let err = ensure_within_limit(free, Resource::Projects, 1).unwrap_err();
        assert_eq!(
            err,
            PlanLimitError::LimitReached {
                resource: Resource::Projects,
                limit: 1
            }
        );
        assert_eq!(err.to_string(), "projects limit of 1 reached");
    }
}
