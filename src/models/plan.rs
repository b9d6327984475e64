use serde::Serialize;

/// A subscription plan. Plans gate features per user.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Plan {
    pub id: &'static str,
    pub name: &'static str,
    pub enable_app_tokens: bool,
}

pub static PLANS: &[Plan] = &[
    Plan { id: "free", name: "Free", enable_app_tokens: false },
    Plan { id: "subscribed", name: "Subscribed", enable_app_tokens: true },
    Plan { id: "vip", name: "VIP", enable_app_tokens: true },
    Plan { id: "unlimited", name: "Unlimited", enable_app_tokens: true },
    Plan { id: "root", name: "Root", enable_app_tokens: true },
];

pub fn find(id: &str) -> Option<&'static Plan> {
    PLANS.iter().find(|p| p.id == id)
}

/// A plan attribute a route can require to hold a given value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAttr {
    EnableAppTokens(bool),
}

impl PlanAttr {
    pub fn name(&self) -> &'static str {
        match self {
            PlanAttr::EnableAppTokens(_) => "enable_app_tokens",
        }
    }
}

impl Plan {
    pub fn satisfies(&self, attr: &PlanAttr) -> bool {
        match attr {
            PlanAttr::EnableAppTokens(v) => self.enable_app_tokens == *v,
        }
    }
}
