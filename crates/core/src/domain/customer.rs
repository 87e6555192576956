use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::order::Order;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(pub String);

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoyaltyTier {
    #[default]
    Standard,
    Silver,
    Gold,
    Platinum,
}

impl LoyaltyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Platinum => "platinum",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" => Some(Self::Standard),
            "silver" => Some(Self::Silver),
            "gold" => Some(Self::Gold),
            "platinum" => Some(Self::Platinum),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub id: CustomerId,
    pub display_name: Option<String>,
    pub loyalty_tier: LoyaltyTier,
}

/// Session-scoped background facts handed to the reasoner alongside the history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerContext {
    pub customer_id: CustomerId,
    pub display_name: Option<String>,
    pub loyalty_tier: LoyaltyTier,
    pub orders: Vec<Order>,
    /// Set when the profile could not be fetched; the next turn fetches again.
    pub degraded: bool,
}

impl CustomerContext {
    pub fn from_profile(profile: CustomerProfile, orders: Vec<Order>) -> Self {
        Self {
            customer_id: profile.id,
            display_name: profile.display_name,
            loyalty_tier: profile.loyalty_tier,
            orders,
            degraded: false,
        }
    }

    pub fn degraded(customer_id: CustomerId) -> Self {
        Self {
            customer_id,
            display_name: None,
            loyalty_tier: LoyaltyTier::Standard,
            orders: Vec::new(),
            degraded: true,
        }
    }
}
