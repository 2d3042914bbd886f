use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub gym_id: Uuid,
    pub user_id: Uuid,
    pub membership_type: MembershipType,
    /// Authoritative for `SessionBased` only. Never negative.
    pub remaining_sessions: i32,
    /// Authoritative for `Monthly` only.
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MembershipType {
    SessionBased,
    Monthly,
}

/// What a payment buys: `quantity` sessions or months of `membership_type`.
/// `membership_id` pins the membership to extend; otherwise the activator picks one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MembershipPurchase {
    pub membership_type: MembershipType,
    pub quantity: i32,
    pub membership_id: Option<Uuid>,
}

impl MembershipPurchase {
    pub fn monthly(months: i32) -> Self {
        Self {
            membership_type: MembershipType::Monthly,
            quantity: months,
            membership_id: None,
        }
    }

    pub fn sessions(count: i32) -> Self {
        Self {
            membership_type: MembershipType::SessionBased,
            quantity: count,
            membership_id: None,
        }
    }
}

/// The causal record of a payment funding a membership period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipGrant {
    pub payment_id: Uuid,
    pub membership_id: Uuid,
    pub membership_type: MembershipType,
    pub quantity: i32,
    pub granted_at: DateTime<Utc>,
}

/// Renewals extend from the later of `now` and the current expiry, so buying
/// early never shortens a plan that is still running.
pub fn extend_expiry(
    current: Option<DateTime<Utc>>,
    months: u32,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let base = match current {
        Some(expiry) if expiry > now => expiry,
        _ => now,
    };
    base.checked_add_months(Months::new(months))
}

impl Membership {
    pub fn new(gym_id: Uuid, user_id: Uuid, membership_type: MembershipType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            gym_id,
            user_id,
            membership_type,
            remaining_sessions: 0,
            expires_at: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a purchased quantity. Returns `None` if the quantity is not
    /// positive or the resulting expiry is out of range.
    pub fn apply_purchase(&mut self, quantity: i32, now: DateTime<Utc>) -> Option<()> {
        if quantity <= 0 {
            return None;
        }

        match self.membership_type {
            MembershipType::SessionBased => {
                self.remaining_sessions = self.remaining_sessions.checked_add(quantity)?;
            }
            MembershipType::Monthly => {
                self.expires_at = Some(extend_expiry(self.expires_at, quantity as u32, now)?);
            }
        }

        self.is_active = true;
        self.updated_at = now;
        Some(())
    }

    /// Whether the holder may check in right now.
    pub fn permits_entry(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }

        match self.membership_type {
            MembershipType::SessionBased => self.remaining_sessions > 0,
            MembershipType::Monthly => self.expires_at.map(|e| e >= now).unwrap_or(false),
        }
    }
}
