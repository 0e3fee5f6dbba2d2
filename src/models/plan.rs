use serde::{Deserialize, Serialize};

/// Sentinel limit value meaning "no cap".
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Standard,
    Max,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Standard => "standard",
            PlanTier::Max => "max",
        }
    }

    /// Parses a plan identifier. Returns `None` for anything outside the catalog.
    pub fn from_id(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "free" => Some(PlanTier::Free),
            "standard" => Some(PlanTier::Standard),
            "max" => Some(PlanTier::Max),
            _ => None,
        }
    }

    pub fn is_paid(self) -> bool {
        !matches!(self, PlanTier::Free)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Projects,
    Applications,
    AiTokens,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Projects => "projects",
            Resource::Applications => "applications",
            Resource::AiTokens => "ai_tokens",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    pub max_projects: i64,
    pub max_applications: i64,
    pub ai_tokens_per_month: i64,
}

impl ResourceLimits {
    pub fn limit_for(&self, resource: Resource) -> i64 {
        match resource {
            Resource::Projects => self.max_projects,
            Resource::Applications => self.max_applications,
            Resource::AiTokens => self.ai_tokens_per_month,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDefinition {
    pub id: PlanTier,
    pub name: &'static str,
    pub base_price_usd: u32,
    pub limits: ResourceLimits,
    pub features: &'static [&'static str],
}

static PLAN_CATALOG: [PlanDefinition; 3] = [
    PlanDefinition {
        id: PlanTier::Free,
        name: "Free",
        base_price_usd: 0,
        limits: ResourceLimits {
            max_projects: 1,
            max_applications: 3,
            ai_tokens_per_month: 10_000,
        },
        features: &["1 project", "3 fund applications", "Basic AI drafting"],
    },
    PlanDefinition {
        id: PlanTier::Standard,
        name: "Standard",
        base_price_usd: 19,
        limits: ResourceLimits {
            max_projects: 5,
            max_applications: 25,
            ai_tokens_per_month: 250_000,
        },
        features: &[
            "5 projects",
            "25 fund applications",
            "Full AI drafting and review",
            "Fund matching",
        ],
    },
    PlanDefinition {
        id: PlanTier::Max,
        name: "Max",
        base_price_usd: 49,
        limits: ResourceLimits {
            max_projects: UNLIMITED,
            max_applications: UNLIMITED,
            ai_tokens_per_month: 1_000_000,
        },
        features: &[
            "Unlimited projects",
            "Unlimited fund applications",
            "Priority AI drafting and review",
            "Fund matching",
            "Priority support",
        ],
    },
];

/// Every plan, cheapest first.
pub fn catalog() -> &'static [PlanDefinition] {
    &PLAN_CATALOG
}

pub fn plan_definition(tier: PlanTier) -> &'static PlanDefinition {
    match tier {
        PlanTier::Free => &PLAN_CATALOG[0],
        PlanTier::Standard => &PLAN_CATALOG[1],
        PlanTier::Max => &PLAN_CATALOG[2],
    }
}

/// Looks up a plan by its identifier.
///
/// `None` means "not a plan we sell"; it must never be read as the free tier.
pub fn get_plan(plan_id: &str) -> Option<&'static PlanDefinition> {
    PlanTier::from_id(plan_id).map(plan_definition)
}
